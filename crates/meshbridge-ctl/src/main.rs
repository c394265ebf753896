//! meshbridge-ctl: command-line interface for the meshbridge daemon.

mod cmd;

use anyhow::{Context, Result};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5002;

fn print_usage() {
    println!("Usage: meshbridge-ctl [--host <ip>] [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status            Show daemon status");
    println!("  peers             List peer links");
    println!("  peers <topic>     List remote subscribers of a topic");
    println!("  topics            List joined topics");
    println!("  create <name>     Join a topic");
    println!("  topic <name>      Show a topic and its remote subscribers");
    println!("  chat <name>       Bridge stdin/stdout to a topic");
    println!("  shutdown          Stop the daemon");
    println!();
    println!("Options:");
    println!("  --host <ip>       Daemon API address (default: {})", DEFAULT_HOST);
    println!("  --port <port>     Daemon API port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut host = DEFAULT_HOST.to_string();
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                port = args
                    .get(i)
                    .context("--port requires a value")?
                    .parse()
                    .context("--port must be a number")?;
            }
            "--host" => {
                i += 1;
                host = args.get(i).context("--host requires a value")?.clone();
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    let base = cmd::http::base_url(&host, port);

    match remaining.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(&base).await,
        ["peers"] => cmd::status::cmd_peers(&base).await,
        ["peers", name] => cmd::topics::cmd_topic_peers(&base, name).await,
        ["topics"] => cmd::topics::cmd_topics(&base).await,
        ["create", name] => cmd::topics::cmd_create(&base, name).await,
        ["topic", name] => cmd::topics::cmd_topic_info(&base, name).await,
        ["chat", name] => cmd::chat::cmd_chat(&cmd::http::ws_url(&host, port, name)).await,
        ["shutdown"] => cmd::status::cmd_shutdown(&base).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
