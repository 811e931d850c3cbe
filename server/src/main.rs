use clap::Parser;
use log::{error, info};
use server::config::SessionConfig;
use server::network::Server;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "WS_PORT", default_value = "8081")]
    port: u16,

    /// Players needed before the wait period starts
    #[arg(long, default_value = "2")]
    min_players: usize,

    /// Players that start the countdown immediately
    #[arg(long, default_value = "4")]
    max_players: usize,

    /// Seconds to wait for more players
    #[arg(long, default_value = "20")]
    wait_secs: u64,

    /// Countdown length in seconds
    #[arg(long, default_value = "10")]
    countdown_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = SessionConfig {
        min_players: args.min_players,
        max_players: args.max_players,
        wait_duration: Duration::from_secs(args.wait_secs),
        countdown: Duration::from_secs(args.countdown_secs),
        ..SessionConfig::default()
    }
    .normalized();
    info!(
        "Sessions start with {}-{} players ({}s wait, {}s countdown)",
        config.min_players, config.max_players, args.wait_secs, args.countdown_secs
    );

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::new(&address, config).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e as Box<dyn std::error::Error>);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
