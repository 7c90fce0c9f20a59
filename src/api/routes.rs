use std::convert::Infallible;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::Filter;

use super::websocket;
use crate::agent::CodeAgent;
use crate::auth::CredentialVerifier;
use crate::session::RoomSessionController;

/// Shared handles the HTTP and WebSocket routes need.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<RoomSessionController>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub agent: Arc<dyn CodeAgent>,
}

/// Every route the server exposes.
pub fn routes(state: AppState) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    room_websocket_route(state.controller.clone())
        .or(health_check())
        .or(agent_health(state.agent.clone()))
        .or(room_fetch(state.controller.clone()))
        .or(verify_token(state.verifier))
}

pub fn room_websocket_route(
    controller: Arc<RoomSessionController>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_controller(controller))
        .map(|ws: warp::ws::Ws, controller: Arc<RoomSessionController>| {
            ws.on_upgrade(move |websocket| websocket::handle_room_websocket(websocket, controller))
        })
}

pub fn health_check() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| {
            warp::reply::json(&json!({
                "status": "healthy",
                "service": "Interview Room Server",
                "version": env!("CARGO_PKG_VERSION")
            }))
        })
}

/// Liveness of the code agent. Informational only; nothing is gated on it.
pub fn agent_health(
    agent: Arc<dyn CodeAgent>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "health" / "agent")
        .and(warp::get())
        .and(warp::any().map(move || agent.clone()))
        .then(|agent: Arc<dyn CodeAgent>| async move {
            if agent.health().await {
                warp::reply::with_status(
                    warp::reply::json(&json!({
                        "ok": true,
                        "agent_available": true,
                        "message": "Code agent is reachable"
                    })),
                    StatusCode::OK,
                )
            } else {
                warp::reply::with_status(
                    warp::reply::json(&json!({
                        "ok": false,
                        "agent_available": false,
                        "message": "Code agent is not reachable"
                    })),
                    StatusCode::SERVICE_UNAVAILABLE,
                )
            }
        })
}

/// Read-only room document for UI hydration. The password is never included.
pub fn room_fetch(
    controller: Arc<RoomSessionController>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "rooms" / String)
        .and(warp::get())
        .and(with_controller(controller))
        .then(|room_code: String, controller: Arc<RoomSessionController>| async move {
            match controller.store().load(&room_code).await {
                Ok(Some(room)) => warp::reply::with_status(warp::reply::json(&room), StatusCode::OK),
                Ok(None) => error_reply(StatusCode::NOT_FOUND, "not found"),
                Err(e) => {
                    tracing::error!(room_code = %room_code, error = %e, "Room fetch failed");
                    error_reply(StatusCode::INTERNAL_SERVER_ERROR, "server error")
                }
            }
        })
}

#[derive(Debug, Deserialize)]
struct VerifyBody {
    token: Option<String>,
}

/// Check a token from the `Authorization: Bearer` header or a JSON body.
pub fn verify_token(
    verifier: Arc<dyn CredentialVerifier>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "auth" / "verify")
        .and(warp::post())
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::bytes())
        .and(warp::any().map(move || verifier.clone()))
        .then(
            |authorization: Option<String>, body: Bytes, verifier: Arc<dyn CredentialVerifier>| async move {
                let token = authorization
                    .as_deref()
                    .and_then(|value| value.strip_prefix("Bearer "))
                    .map(str::to_string)
                    .or_else(|| {
                        serde_json::from_slice::<VerifyBody>(&body)
                            .ok()
                            .and_then(|b| b.token)
                    })
                    .filter(|token| !token.is_empty());

                let Some(token) = token else {
                    return error_reply(StatusCode::BAD_REQUEST, "token missing");
                };

                match verifier.verify(&token).await {
                    Some(user) => warp::reply::with_status(
                        warp::reply::json(&json!({
                            "ok": true,
                            "user": { "id": user.user_id, "username": user.username }
                        })),
                        StatusCode::OK,
                    ),
                    None => error_reply(StatusCode::UNAUTHORIZED, "invalid token"),
                }
            },
        )
}

fn error_reply(status: StatusCode, message: &str) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(&json!({ "error": message })), status)
}

fn with_controller(
    controller: Arc<RoomSessionController>,
) -> impl Filter<Extract = (Arc<RoomSessionController>,), Error = Infallible> + Clone {
    warp::any().map(move || controller.clone())
}
