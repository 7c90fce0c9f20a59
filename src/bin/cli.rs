// Interview Room CLI
// Probes a running room server and drives room flows over its WebSocket

use clap::{Parser, Subcommand};
use colored::*;
use futures::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use std::io::{self, Write};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};

type WsError = tokio_tungstenite::tungstenite::Error;

#[derive(Parser)]
#[command(name = "room-cli")]
#[command(about = "Interview Room Server CLI", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:3000)
    #[arg(short, long, default_value = "127.0.0.1:3000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Check whether the server can reach its code agent
    AgentHealth,

    /// Fetch a room document
    Room {
        /// Room code
        code: String,
    },

    /// Verify an access token against the server
    Verify {
        #[arg(short, long)]
        token: String,
    },

    /// Create a room as admin
    CreateRoom {
        /// Admin access token
        #[arg(short, long)]
        token: String,

        /// Keep connection alive and print room events (Ctrl+C to exit)
        #[arg(short, long)]
        keep_alive: bool,
    },

    /// Join a room as a participant
    JoinRoom {
        #[arg(short, long)]
        token: String,

        #[arg(short, long)]
        room_code: String,

        #[arg(short, long)]
        password: String,

        /// Stay connected and print room events
        #[arg(short, long)]
        listen: bool,
    },

    /// Interactive mode - send custom messages
    Interactive,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => check_health(&cli.server).await,
        Commands::AgentHealth => check_agent_health(&cli.server).await,
        Commands::Room { code } => fetch_room(&cli.server, code).await,
        Commands::Verify { token } => verify_token(&cli.server, token).await,
        Commands::CreateRoom { token, keep_alive } => {
            create_room(&cli.server, token, *keep_alive).await;
        }
        Commands::JoinRoom {
            token,
            room_code,
            password,
            listen,
        } => {
            join_room(&cli.server, token, room_code, password, *listen).await;
        }
        Commands::Interactive => interactive_mode(&cli.server).await,
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/health", server);

    match reqwest::get(&url).await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn check_agent_health(server: &str) {
    println!("{}", "Checking code agent availability...".cyan());

    let url = format!("http://{}/api/health/agent", server);

    match reqwest::get(&url).await {
        Ok(resp) => {
            let available = resp.status().is_success();
            let message = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| body["message"].as_str().map(str::to_string))
                .unwrap_or_default();

            if available {
                println!("{} Code agent reachable {}", "✓".green(), message.dimmed());
            } else {
                println!("{} Code agent unavailable {}", "✗".red(), message.dimmed());
            }
        }
        Err(e) => println!("{} Cannot connect to server: {}", "✗".red(), e),
    }
}

async fn fetch_room(server: &str, code: &str) {
    let url = format!("http://{}/api/rooms/{}", server, urlencoding::encode(code));

    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
            Ok(room) => print_room(&room),
            Err(e) => println!("{} Malformed room document: {}", "✗".red(), e),
        },
        Ok(resp) => println!("{} Room {} not available: {}", "✗".red(), code.bold(), resp.status()),
        Err(e) => println!("{} Cannot connect to server: {}", "✗".red(), e),
    }
}

fn print_room(room: &Value) {
    let empty = Vec::new();
    let participants = room["participants"].as_array().unwrap_or(&empty);
    let questions = room["questions"].as_array().unwrap_or(&empty);
    let submissions = room["submissions"].as_array().unwrap_or(&empty);

    println!("\n{}", "═".repeat(50).green());
    println!("{} {}", "Room:".bold(), room["room_code"].as_str().unwrap_or("?").green().bold());
    println!("{}", "═".repeat(50).green());
    println!("  Admin: {}", room["admin_id"].as_str().unwrap_or("?"));

    println!("\n{} ({})", "Participants".bold(), participants.len());
    for p in participants {
        let marker = if p["online"].as_bool().unwrap_or(false) {
            "●".green()
        } else {
            "○".dimmed()
        };
        println!("  {} {}", marker, p["username"].as_str().unwrap_or("?"));
    }

    let current = room["current_question_id"].as_str();
    println!("\n{} ({})", "Questions".bold(), questions.len());
    for q in questions {
        let id = q["id"].as_str();
        let marker = if id == current { "▶".cyan() } else { " ".normal() };
        println!("  {} {}", marker, q["text"].as_str().unwrap_or(""));
    }

    println!("\n{} ({})", "Submissions".bold(), submissions.len());
    for s in submissions {
        println!(
            "  {} {} [{}] {}",
            s["id"].as_str().unwrap_or("?").dimmed(),
            s["username"].as_str().unwrap_or("?"),
            s["language"].as_str().unwrap_or("?"),
            s["status"].as_str().unwrap_or("?"),
        );
    }

    let generated = room["generated_codes"].as_array().map(Vec::len).unwrap_or(0);
    println!("\n  Generated reference sets: {}", generated);
}

async fn verify_token(server: &str, token: &str) {
    let url = format!("http://{}/api/auth/verify", server);
    let client = reqwest::Client::new();

    match client.post(&url).bearer_auth(token).send().await {
        Ok(resp) => {
            let status = resp.status();
            let body = resp.json::<Value>().await.unwrap_or(Value::Null);
            if status.is_success() {
                println!(
                    "{} Token valid for {} ({})",
                    "✓".green(),
                    body["user"]["username"].as_str().unwrap_or("?").bold(),
                    body["user"]["id"].as_str().unwrap_or("?")
                );
            } else {
                println!(
                    "{} Token rejected: {}",
                    "✗".red(),
                    body["error"].as_str().unwrap_or(status.as_str())
                );
            }
        }
        Err(e) => println!("{} Cannot connect to server: {}", "✗".red(), e),
    }
}

/// Read frames until one of `types` arrives, an `Error` event arrives or
/// the timeout expires.
async fn await_event<S>(read: &mut S, types: &[&str], secs: u64) -> Option<Value>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        match timeout(Duration::from_secs(secs), read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let Ok(event) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let kind = event["type"].as_str().unwrap_or_default();
                if types.contains(&kind) {
                    return Some(event);
                }
                if kind == "Error" {
                    println!("{} {}", "✗".red(), event["message"].as_str().unwrap_or("error"));
                    return None;
                }
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                println!("{} Connection closed by server", "✗".red());
                return None;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                println!("{} Error receiving message: {}", "✗".red(), e);
                return None;
            }
            Err(_) => {
                println!("{} Timeout waiting for {}", "✗".red(), types.join("/"));
                return None;
            }
        }
    }
}

async fn listen<S>(read: &mut S)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => println!("{} {}", "◀".green(), text.bright_white()),
            Ok(Message::Close(_)) => {
                println!("{} Server closed the connection", "✗".yellow());
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                println!("{} Connection error: {}", "✗".red(), e);
                break;
            }
        }
    }
}

async fn create_room(server: &str, token: &str, keep_alive: bool) {
    println!("{}", "Creating room...".cyan());

    let url = format!("ws://{}/ws", server);

    let (ws_stream, _) = match connect_async(&url).await {
        Ok(conn) => conn,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let msg = json!({ "type": "CreateRoom", "token": token });
    if write.send(Message::Text(msg.to_string())).await.is_err() {
        println!("{} Failed to send CreateRoom message", "✗".red());
        return;
    }

    let Some(created) = await_event(&mut read, &["RoomCreated"], 5).await else {
        return;
    };

    let room_code = created["room_code"].as_str().unwrap_or("unknown");
    println!("{} Room created successfully!", "✓".green());
    println!("\n{}", "═".repeat(50).green());
    println!("{} {}", "Room code:".bold(), room_code.green().bold());
    println!("{} {}", "Password: ".bold(), created["password"].as_str().unwrap_or("?").green());
    println!("{}", "═".repeat(50).green());

    if keep_alive {
        println!("\n{}", "Connection is being kept alive...".yellow());
        println!("Press {} to disconnect.", "Ctrl+C".bold());
        listen(&mut read).await;
    } else {
        println!("\n{}", "Note: the room stays open; admin events go to your next connection.".yellow());
        println!("Use {} to watch room events.", "--keep-alive".cyan());
    }
}

async fn join_room(server: &str, token: &str, room_code: &str, password: &str, keep_listening: bool) {
    println!("{}", "Joining room...".cyan());
    println!("  Room code: {}", room_code);

    let url = format!("ws://{}/ws", server);

    let (ws_stream, _) = match connect_async(&url).await {
        Ok(conn) => conn,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let msg = json!({
        "type": "JoinRoom",
        "token": token,
        "room_code": room_code,
        "password": password,
    });
    if write.send(Message::Text(msg.to_string())).await.is_err() {
        println!("{} Failed to send JoinRoom message", "✗".red());
        return;
    }

    let Some(accepted) = await_event(&mut read, &["JoinAccepted"], 5).await else {
        return;
    };

    println!("{} Joined room {}", "✓".green(), room_code.green().bold());
    if accepted["is_admin"].as_bool().unwrap_or(false) {
        println!("  Role: {}", "admin".bold());
    }
    if let Some(participants) = accepted["participants"].as_array() {
        let names: Vec<&str> = participants
            .iter()
            .filter_map(|p| p["username"].as_str())
            .collect();
        println!("  Participants: {}", names.join(", "));
    }
    if let Some(questions) = accepted["questions"].as_array() {
        println!("  Questions: {}", questions.len());
    }

    if keep_listening {
        println!("\n{}", "Listening for room events (Ctrl+C to exit)...".yellow());
        listen(&mut read).await;
    }
}

async fn interactive_mode(server: &str) {
    println!("\n{}", "Interactive Mode".bold().green());
    println!("{}", "═".repeat(60).green());
    println!("Type {} for help, {} to quit\n", "help".cyan(), "quit".cyan());

    let url = format!("ws://{}/ws", server);

    match connect_async(&url).await {
        Ok((ws_stream, _)) => {
            println!("{} Connected to server", "✓".green());

            let (mut write, mut read) = ws_stream.split();

            // Spawn task to receive messages
            let receive_task = tokio::spawn(async move {
                while let Some(Ok(msg)) = read.next().await {
                    if let Message::Text(text) = msg {
                        println!("\n{} {}", "◀".green(), text.bright_white());
                    }
                }
            });

            // Main input loop
            loop {
                print!("{} ", "►".cyan());
                io::stdout().flush().ok();

                let mut input = String::new();
                if io::stdin().read_line(&mut input).is_err() {
                    break;
                }

                let input = input.trim();

                if input.is_empty() {
                    continue;
                }

                if input == "quit" || input == "exit" {
                    println!("Goodbye!");
                    break;
                }

                if input == "help" {
                    print_interactive_help();
                    continue;
                }

                // Try to parse as JSON and send
                if let Ok(parsed) = serde_json::from_str::<Value>(input) {
                    if write.send(Message::Text(parsed.to_string())).await.is_ok() {
                        println!("{} Message sent", "✓".green());
                    } else {
                        println!("{} Failed to send message", "✗".red());
                        break;
                    }
                } else {
                    println!("{} Invalid JSON. Type 'help' for examples.", "✗".yellow());
                }
            }

            receive_task.abort();
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

fn print_interactive_help() {
    println!("\n{}", "Interactive Mode Commands".bold());
    println!("{}", "─".repeat(60));
    println!("Send JSON messages directly to the server.\n");

    println!("{}", "Example Messages:".bold());
    println!("\n{}:", "Create Room".cyan());
    println!(r#"  {{"type":"CreateRoom","token":"<jwt>"}}"#);

    println!("\n{}:", "Join Room".cyan());
    println!(r#"  {{"type":"JoinRoom","token":"<jwt>","room_code":"ABC234","password":"s3cretPw"}}"#);

    println!("\n{}:", "Post Question".cyan());
    println!(r#"  {{"type":"SubmitQuestion","token":"<jwt>","room_code":"ABC234","question_text":"Reverse a list"}}"#);

    println!("\n{}:", "Submit Code".cyan());
    println!(r#"  {{"type":"SubmitCode","token":"<jwt>","room_code":"ABC234","language":"python","code":"print(1)"}}"#);

    println!("\n{}:", "Request Analysis".cyan());
    println!(r#"  {{"type":"RequestAnalysis","token":"<jwt>","room_code":"ABC234","submission_id":"<id>"}}"#);

    println!("\n{}:", "Chat".cyan());
    println!(r#"  {{"type":"SendMessage","message":{{"text":"hello"}}}}"#);

    println!("\n{}: quit, exit", "Commands".bold());
    println!();
}
