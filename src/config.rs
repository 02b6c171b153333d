use clap::Parser;
use reqwest::Url;
use std::net::SocketAddr;

#[derive(Parser, Clone, Debug)]
pub struct Config {
    #[arg(long, env = "SERVER_ADDRESS", default_value = "0.0.0.0:8080")]
    pub server_address: SocketAddr,

    // The chain inventory endpoint to poll
    #[arg(long, env = "API_URL")]
    pub api_url: Url,

    #[arg(long, env = "TELEGRAM_BOT_TOKEN")]
    pub telegram_bot_token: String,

    // The chat that receives new-chain announcements
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: String,

    // Poll cadence in milliseconds
    #[arg(long, env = "POLLING_INTERVAL", default_value_t = 10_000)]
    pub polling_interval_ms: u64,

    #[arg(long, env = "DATABASE_PATH", default_value = "./data/chains.db")]
    pub database_path: String,

    // Suppresses all outbound Telegram traffic, including error reports.
    // Internal logging is unaffected.
    #[arg(long, env = "SILENT_MODE", default_value_t = false)]
    pub silent_mode: bool,

    // Seed the database with a single silent scan and exit
    #[arg(long, env = "INIT_ONLY", default_value_t = false)]
    pub init_only: bool,
}
