//! fxchat-server: messaging and file exchange server
//!
//! This server handles:
//! - Handle registration and session management
//! - Unicast and broadcast messaging
//! - File upload, download and listing
//! - Admin-initiated shutdown with a countdown

use anyhow::Result;
use log::{error, info};

use fxchat::{Config, Server};

const DEFAULT_CONFIG_PATH: &str = "fxchat-server.toml";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path =
        std::env::var("FXCHAT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)?;

    println!("╔════════════════════════════════════════╗");
    println!("║          fxchat-server                 ║");
    println!("╠════════════════════════════════════════╣");
    println!("║ Address: {:<30}║", config.bind_addr());
    println!("║ Storage: {:<30}║", config.storage_dir.display());
    println!("║ Admin: {:<32}║", config.admin_handle);
    println!("╚════════════════════════════════════════╝");

    let server = Server::bind(config).await?;
    let handle = server.shutdown_handle();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received");
                handle.trigger("signal");
            }
            Err(e) => error!("Cannot listen for interrupt: {e}"),
        }
    });

    server.run().await?;
    Ok(())
}
