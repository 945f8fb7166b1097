use anyhow::Result;
use clap::Parser;
use colored::*;

mod commands;
mod display;
mod session;

use session::Session;

#[derive(Parser)]
#[command(name = "chat-client")]
#[command(about = "Terminal client for the Flexare chat relay")]
struct Cli {
    /// Relay host name or IP address
    #[arg(long, env = "CHAT_HOST", default_value = "localhost")]
    host: String,

    /// Relay TCP port
    #[arg(long, env = "CHAT_PORT", default_value_t = 3333)]
    port: u16,

    /// Display name to join with; prompted for when omitted
    #[arg(long, short)]
    username: Option<String>,

    /// Shared passphrase used to obfuscate chat text between clients
    #[arg(long, env = "CHAT_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    }

    let addr = format!("{}:{}", cli.host, cli.port);
    println!("{} Connecting to {}...", "→".blue(), addr);

    let payload = events::payload::from_passphrase(cli.passphrase.as_deref());
    let session = Session::new(cli.username, payload);

    session::run(&addr, session).await
}
