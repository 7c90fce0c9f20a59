use std::env;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use interview_room::agent::{AgentClient, CodeAgent};
use interview_room::api::{self, AppState};
use interview_room::auth::{CredentialVerifier, JwtVerifier};
use interview_room::config::Config;
use interview_room::session::RoomSessionController;
use interview_room::store::{MemoryRoomStore, RoomStore};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            return;
        }
    };

    let agent: Arc<dyn CodeAgent> = match AgentClient::new(config.agent.clone()) {
        Ok(client) => {
            tracing::info!(url = %client.base_url(), "Code agent client configured");
            Arc::new(client)
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to create code agent client");
            return;
        }
    };

    let verifier: Arc<dyn CredentialVerifier> = Arc::new(JwtVerifier::new(&config.auth.jwt_secret));
    let store: Arc<dyn RoomStore> = Arc::new(MemoryRoomStore::new());

    let controller = Arc::new(RoomSessionController::new(
        verifier.clone(),
        store,
        agent.clone(),
        config.generation.queue_capacity,
    ));

    let routes = api::routes(AppState {
        controller,
        verifier,
        agent,
    });

    let bind_address = config.bind_address();
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        queue_capacity = config.generation.queue_capacity,
        "Interview room server listening"
    );

    warp::serve(routes).run(bind_address).await;
}

/// `RUST_LOG` filters (default `info`); `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
