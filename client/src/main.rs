use clap::Parser;
use client::network::{generate_client_id, Client, ClientConfig};
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket URL of the relay server
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8081/ws")]
    server: String,

    /// Nickname shown in the lobby
    #[arg(short = 'n', long, default_value = "Player")]
    nickname: String,

    /// Persistent client id; reuse it to reclaim your slot after a reconnect
    #[arg(short = 'c', long)]
    client_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = ClientConfig::new(args.server, args.nickname);
    config.client_id = args.client_id.unwrap_or_else(generate_client_id);

    info!("Starting client...");
    info!("Connecting to: {}", config.server_url);
    info!("Client id: {}", config.client_id);

    let mut client = Client::new(config);

    tokio::select! {
        result = client.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
