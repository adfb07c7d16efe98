// Live classroom operator CLI
// Queries reporting endpoints and joins rooms over WebSocket for manual checks

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Parser)]
#[command(name = "classroom-cli")]
#[command(about = "Live classroom CLI", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:8080)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Show the effective engine configuration
    Config,

    /// Show the attendance summary for a class
    Attendance {
        /// Class ID
        class_id: String,
    },

    /// List the most recently ended classes
    Recent {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Join a room and chat from the terminal
    Join {
        #[arg(short, long)]
        room_id: String,

        #[arg(short, long)]
        user_id: String,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(long, value_enum, default_value_t = Role::Attendee)]
        role: Role,
    },

    /// Send raw JSON messages
    Interactive,
}

#[derive(Clone, Copy, ValueEnum)]
enum Role {
    Host,
    CoHost,
    Attendee,
}

impl Role {
    fn wire_name(self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::CoHost => "co_host",
            Role::Attendee => "attendee",
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => check_health(&cli.server).await,
        Commands::Config => check_config(&cli.server).await,
        Commands::Attendance { class_id } => show_attendance(&cli.server, class_id).await,
        Commands::Recent { limit } => show_recent(&cli.server, *limit).await,
        Commands::Join {
            room_id,
            user_id,
            name,
            role,
        } => join_room(&cli.server, room_id, user_id, name.as_deref(), *role).await,
        Commands::Interactive => interactive_mode(&cli.server).await,
    }
}

async fn get_json(url: &str) -> Result<Value, String> {
    let resp = reqwest::get(url).await.map_err(|e| e.to_string())?;
    let status = resp.status();
    let body = resp.json::<Value>().await.map_err(|e| e.to_string())?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(format!(
            "{} {}",
            status,
            body["message"].as_str().unwrap_or("request failed")
        ))
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    match get_json(&format!("http://{}/classroom/health", server)).await {
        Ok(body) => {
            println!("{} Health check passed", "✓".green());
            println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
            println!("  Open rooms: {}", body["rooms"]["open_rooms"]);
            println!("  Connected: {}", body["rooms"]["connected_participants"]);
            println!("  Pending finalize: {}", body["pending_finalize"]);
        }
        Err(e) => {
            println!("{} Health check failed: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn check_config(server: &str) {
    match get_json(&format!("http://{}/classroom/config", server)).await {
        Ok(body) => {
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        }
        Err(e) => println!("{} Config fetch failed: {}", "✗".red(), e),
    }
}

async fn show_attendance(server: &str, class_id: &str) {
    let url = format!("http://{}/classroom/attendance/{}", server, class_id);
    match get_json(&url).await {
        Ok(summary) => print_summary(&summary),
        Err(e) => println!("{} {}", "✗".red(), e),
    }
}

async fn show_recent(server: &str, limit: usize) {
    let url = format!("http://{}/classroom/stats/recent?limit={}", server, limit);
    match get_json(&url).await {
        Ok(Value::Array(summaries)) if summaries.is_empty() => {
            println!("{}", "No finalized classes yet".yellow());
        }
        Ok(Value::Array(summaries)) => {
            for summary in &summaries {
                println!(
                    "{}  ended {}  present {}  left early {}  absent {}  avg {:.1}%",
                    summary["class_id"].as_str().unwrap_or("?").bold(),
                    summary["class_ended_at"].as_str().unwrap_or("?"),
                    summary["present_count"],
                    summary["left_early_count"],
                    summary["absent_count"],
                    summary["average_attendance_percentage"].as_f64().unwrap_or(0.0),
                );
            }
        }
        Ok(other) => println!("{} Unexpected response: {}", "✗".red(), other),
        Err(e) => println!("{} {}", "✗".red(), e),
    }
}

fn print_summary(summary: &Value) {
    let finalized = summary["finalized"].as_bool().unwrap_or(false);
    println!(
        "\n{} {} {}",
        "Class".bold(),
        summary["class_id"].as_str().unwrap_or("?").bold(),
        if finalized { "(final)".green() } else { "(in progress)".yellow() }
    );
    println!("{}", "─".repeat(60));
    println!(
        "Students: {}  Present: {}  Left early: {}  Absent: {}  Average: {:.1}%",
        summary["total_students"],
        summary["present_count"],
        summary["left_early_count"],
        summary["absent_count"],
        summary["average_attendance_percentage"].as_f64().unwrap_or(0.0),
    );

    if let Some(participants) = summary["participants"].as_array() {
        for p in participants {
            let classification = p["classification"].as_str().unwrap_or("?");
            let label = match classification {
                "PRESENT" => classification.green(),
                "LEFT_EARLY" => classification.yellow(),
                _ => classification.red(),
            };
            println!(
                "  {:<20} {:>8.0}s {:>6.1}%  {}{}",
                p["user_id"].as_str().unwrap_or("?"),
                p["total_present_seconds"].as_f64().unwrap_or(0.0),
                p["attendance_percentage"].as_f64().unwrap_or(0.0),
                label,
                if p["guest"].as_bool().unwrap_or(false) { " (guest)" } else { "" }
            );
        }
    }
}

async fn join_room(server: &str, room_id: &str, user_id: &str, name: Option<&str>, role: Role) {
    let url = format!("ws://{}/classroom", server);
    let (ws_stream, _) = match connect_async(&url).await {
        Ok(conn) => conn,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let join = json!({
        "type": "Join",
        "room_id": room_id,
        "user_id": user_id,
        "name": name,
        "role": role.wire_name(),
    });
    if write.send(Message::Text(join.to_string())).await.is_err() {
        println!("{} Failed to send join", "✗".red());
        return;
    }

    println!("Type to chat. Commands: {}, {}, {}, {}", "/hand".cyan(), "/lower".cyan(), "/end".cyan(), "/leave".cyan());

    let receive_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = read.next().await {
            if let Message::Text(text) = msg {
                print_event(&text);
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let message = match line {
            "/leave" | "/quit" => {
                let _ = write.send(Message::Text(json!({"type": "Leave"}).to_string())).await;
                break;
            }
            "/hand" => json!({"type": "Control", "event": "hand_raise"}),
            "/lower" => json!({"type": "Control", "event": "hand_lower"}),
            "/end" => json!({"type": "EndClass"}),
            text => json!({"type": "Chat", "text": text}),
        };

        if write.send(Message::Text(message.to_string())).await.is_err() {
            println!("{} Connection lost", "✗".red());
            break;
        }
    }

    let _ = write.close().await;
    receive_task.abort();
}

fn print_event(text: &str) {
    let Ok(event) = serde_json::from_str::<Value>(text) else {
        println!("{} {}", "◀".green(), text);
        return;
    };

    match event["type"].as_str().unwrap_or("") {
        "Joined" => {
            println!(
                "{} Joined as {} ({} participants)",
                "✓".green(),
                event["connection_id"].as_str().unwrap_or("?"),
                event["participants"].as_array().map_or(0, |p| p.len())
            );
            if let Some(chat) = event["recent_chat"].as_array() {
                for message in chat {
                    print_chat(message);
                }
            }
        }
        "ChatReceived" => print_chat(&event["message"]),
        "ParticipantJoined" => println!(
            "{} {} joined",
            "+".green(),
            event["participant"]["user_id"].as_str().unwrap_or("?")
        ),
        "ParticipantLeft" => println!(
            "{} {} left",
            "-".yellow(),
            event["user_id"].as_str().unwrap_or("?")
        ),
        "RoomClosed" => println!(
            "{} Room closed ({})",
            "■".red(),
            event["reason"].as_str().unwrap_or("?")
        ),
        "Error" => println!(
            "{} {}: {}",
            "✗".red(),
            event["code"].as_str().unwrap_or("error"),
            event["message"].as_str().unwrap_or("")
        ),
        _ => println!("{} {}", "◀".green(), text.bright_white()),
    }
}

fn print_chat(message: &Value) {
    let who = message["display_name"]
        .as_str()
        .or_else(|| message["user_id"].as_str())
        .unwrap_or("?");
    println!("{} {}", format!("[{}]", who).cyan(), message["text"].as_str().unwrap_or(""));
}

async fn interactive_mode(server: &str) {
    println!("\n{}", "Interactive Mode".bold().green());
    println!("{}", "═".repeat(60).green());
    println!("Type {} for help, {} to quit\n", "help".cyan(), "quit".cyan());

    let url = format!("ws://{}/classroom", server);
    let (ws_stream, _) = match connect_async(&url).await {
        Ok(conn) => conn,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };
    println!("{} Connected to server", "✓".green());

    let (mut write, mut read) = ws_stream.split();
    let receive_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = read.next().await {
            if let Message::Text(text) = msg {
                println!("\n{} {}", "◀".green(), text.bright_white());
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let input = line.trim();
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

        match serde_json::from_str::<Value>(input) {
            Ok(parsed) => {
                if write.send(Message::Text(parsed.to_string())).await.is_err() {
                    println!("{} Failed to send message", "✗".red());
                    break;
                }
            }
            Err(_) => println!("{} Invalid JSON. Type 'help' for examples.", "✗".yellow()),
        }
    }

    receive_task.abort();
}

fn print_interactive_help() {
    println!("\n{}", "Example Messages".bold());
    println!("{}", "─".repeat(60));

    println!("\n{}:", "Join".cyan());
    println!(r#"  {{"type":"Join","room_id":"room-1","user_id":"u1","name":"Ada","role":"attendee"}}"#);

    println!("\n{}:", "Chat".cyan());
    println!(r#"  {{"type":"Chat","text":"hello"}}"#);

    println!("\n{}:", "Signal".cyan());
    println!(r#"  {{"type":"Signal","to":"conn-...","payload":{{"sdp":"..."}}}}"#);

    println!("\n{}:", "Control".cyan());
    println!(r#"  {{"type":"Control","event":"hand_raise"}}"#);

    println!("\n{}:", "Leave".cyan());
    println!(r#"  {{"type":"Leave"}}"#);

    println!("\n{}: quit, exit", "Commands".bold());
    println!();
}
