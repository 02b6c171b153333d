use crate::scanner::Scanner;
use crate::types::Chain;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_SECS: u64 = 30;
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
/// Pause between per-chain messages so the Bot API does not rate-limit us.
const PER_MESSAGE_DELAY: Duration = Duration::from_secs(1);

/// Outbound announcement channel. Best-effort: the scan cycle logs failures
/// and moves on.
#[async_trait]
pub trait ChainNotifier: Send + Sync {
    async fn notify_new_chains(&self, chains: &[Chain]) -> Result<()>;
    async fn notify_error(&self, error: &str) -> Result<()>;
}

/// Telegram Bot API client: new-chain announcements to a configured chat plus
/// a `getUpdates` long-poll loop answering /ping and /start.
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    chat_id: String,
}

#[derive(Debug, Deserialize)]
struct BotApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BotUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    chat: ChatRef,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatRef {
    id: i64,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: String) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("{}/bot{}", TELEGRAM_API_BASE, bot_token),
            chat_id,
        }
    }

    async fn send_message(&self, chat_id: Value, text: &str) -> Result<()> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .timeout(SEND_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Telegram sendMessage failed ({}): {}", status, body));
        }

        Ok(())
    }

    async fn send_to_configured_chat(&self, text: &str) -> Result<()> {
        self.send_message(json!(self.chat_id), text).await
    }

    /// Startup probe message. Callers treat a failure as a warning only.
    pub async fn send_test_message(&self) -> Result<()> {
        self.send_to_configured_chat(
            "✅ NewChain Detector Bot is now active and monitoring for new chains!",
        )
        .await
    }

    async fn notify_new_chain(&self, chain: &Chain) -> Result<()> {
        self.send_to_configured_chat(&format_chain_message(chain))
            .await
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<BotUpdate>> {
        let body = json!({
            "timeout": LONG_POLL_SECS,
            "offset": offset,
            "allowed_updates": ["message"],
        });

        let response: BotApiResponse<Vec<BotUpdate>> = self
            .client
            .post(format!("{}/getUpdates", self.base_url))
            .timeout(Duration::from_secs(LONG_POLL_SECS + 5))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if !response.ok {
            return Err(anyhow!(
                "Telegram getUpdates rejected: {}",
                response.description.unwrap_or_default()
            ));
        }

        Ok(response.result.unwrap_or_default())
    }

    /// Long-poll loop answering bot commands. Runs for the life of the
    /// process; every failure is logged and retried, never propagated.
    pub async fn poll_commands(&self, scanner: Arc<Scanner>) {
        let mut offset: i64 = 0;

        loop {
            let updates = match self.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "Failed to poll Telegram updates");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);

                let Some(message) = update.message else { continue };
                let Some(text) = message.text.as_deref() else { continue };

                let result = if text.starts_with("/ping") {
                    self.handle_ping(message.chat.id, &scanner).await
                } else if text.starts_with("/start") {
                    self.handle_start(message.chat.id, &scanner).await
                } else {
                    Ok(())
                };

                if let Err(e) = result {
                    error!(command = text, error = %e, "Failed to handle bot command");
                }
            }
        }
    }

    async fn handle_ping(&self, chat_id: i64, scanner: &Scanner) -> Result<()> {
        let stats = scanner.stats().await?;

        let last_scan = match stats.last_scan_time {
            Some(time) => format_time_ago(time),
            None => "Never".to_string(),
        };

        let message = format!(
            "<b>🤖 Bot Status</b>\n\n\
             <b>Status:</b> ✅ Online\n\
             <b>Uptime:</b> {}\n\n\
             <b>📊 Monitoring Info</b>\n\
             <b>Scan interval:</b> {}s\n\
             <b>Last scan:</b> {}\n\
             <b>Next scan in:</b> {}s\n\n\
             <b>💾 Database</b>\n\
             <b>Total chains:</b> {}\n\n\
             <b>⏰ Server time:</b> {}",
            format_uptime(stats.uptime_secs),
            stats.polling_interval_secs,
            last_scan,
            stats.next_scan_in_secs,
            stats.total_chains,
            Utc::now().to_rfc3339(),
        );

        self.send_message(json!(chat_id), &message).await
    }

    async fn handle_start(&self, chat_id: i64, scanner: &Scanner) -> Result<()> {
        let interval_secs = scanner.polling_interval().as_secs();

        let message = format!(
            "<b>👋 Welcome to NewChain Detector!</b>\n\n\
             This bot monitors blockchain chains and notifies you when new chains are detected.\n\n\
             <b>Available commands:</b>\n\
             /ping - Check bot status and statistics\n\
             /start - Show this help message\n\n\
             The bot scans for new chains every {} seconds and will automatically notify you when changes are detected.",
            interval_secs,
        );

        self.send_message(json!(chat_id), &message).await
    }
}

#[async_trait]
impl ChainNotifier for TelegramNotifier {
    /// One message per chain, preceded by a summary when there are several.
    /// A failed send for one chain never blocks the rest.
    async fn notify_new_chains(&self, chains: &[Chain]) -> Result<()> {
        if chains.is_empty() {
            return Ok(());
        }

        if chains.len() > 1 {
            let summary = format!(
                "<b>🚀 {} New Chains Detected!</b>\n\nSending details...",
                chains.len()
            );
            if let Err(e) = self.send_to_configured_chat(&summary).await {
                warn!(error = %e, "Failed to send summary message");
            }
        }

        for (i, chain) in chains.iter().enumerate() {
            if let Err(e) = self.notify_new_chain(chain).await {
                warn!(
                    chain_id = chain.chain,
                    name = %chain.name,
                    error = %e,
                    "Failed to send new chain notification"
                );
            }

            if i + 1 < chains.len() {
                tokio::time::sleep(PER_MESSAGE_DELAY).await;
            }
        }

        Ok(())
    }

    async fn notify_error(&self, error: &str) -> Result<()> {
        let message = format!(
            "<b>⚠️ Error Occurred</b>\n\n<code>{}</code>\n\nThe bot will continue monitoring...",
            error
        );

        self.send_to_configured_chat(&message).await
    }
}

fn format_chain_message(chain: &Chain) -> String {
    let network_type = if chain.mainnet {
        "🟢 Mainnet"
    } else {
        "🟡 Testnet"
    };
    let inbound_status = if chain.inbound { "✅ Yes" } else { "❌ No" };
    let explorer = chain.explorer.as_deref().unwrap_or("N/A");
    let rpc = chain.primary_rpc().unwrap_or("N/A");

    format!(
        "<b>🔗 {}</b>\n\
         {}\n\n\
         <b>Chain ID:</b> <code>{}</code>\n\
         <b>Symbol:</b> {}\n\
         <b>Price:</b> ${}\n\n\
         <b>Inbound:</b> {}\n\
         <b>Max Outbound:</b> {}\n\
         <b>Min Outbound:</b> {}\n\n\
         <b>Gas:</b> {}\n\
         <b>Gwei:</b> {}\n\n\
         <b>Explorer:</b> {}\n\
         <b>RPC:</b> {}",
        chain.name,
        network_type,
        chain.chain,
        chain.symbol,
        chain.price,
        inbound_status,
        chain.max_outbound,
        chain.min_outbound,
        chain.gas,
        chain.gwei,
        explorer,
        rpc,
    )
}

fn format_uptime(secs: u64) -> String {
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn format_time_ago(time: DateTime<Utc>) -> String {
    let seconds = (Utc::now() - time).num_seconds().max(0);

    if seconds < 60 {
        format!("{}s ago", seconds)
    } else if seconds < 3600 {
        format!("{}m ago", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}h ago", seconds / 3600)
    } else {
        format!("{}d ago", seconds / 86_400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::sample_chain;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_chain_message_lists_key_fields() {
        let chain = sample_chain(42161, "arbitrum");
        let message = format_chain_message(&chain);

        assert!(message.contains("<b>🔗 arbitrum</b>"));
        assert!(message.contains("🟢 Mainnet"));
        assert!(message.contains("<code>42161</code>"));
        assert!(message.contains("<b>Symbol:</b> ARB"));
        assert!(message.contains("https://scan.arbitrum.example"));
        assert!(message.contains("https://rpc.arbitrum.example"));
    }

    #[test]
    fn test_chain_message_testnet_and_missing_fields() {
        let mut chain = sample_chain(5, "goerli");
        chain.mainnet = false;
        chain.inbound = false;
        chain.explorer = None;
        chain.rpcs = vec![];

        let message = format_chain_message(&chain);
        assert!(message.contains("🟡 Testnet"));
        assert!(message.contains("<b>Inbound:</b> ❌ No"));
        assert!(message.contains("<b>Explorer:</b> N/A"));
        assert!(message.contains("<b>RPC:</b> N/A"));
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(0), "0h 0m 0s");
        assert_eq!(format_uptime(59), "0h 0m 59s");
        assert_eq!(format_uptime(3723), "1h 2m 3s");
        assert_eq!(format_uptime(90_061), "25h 1m 1s");
    }

    #[test]
    fn test_format_time_ago_buckets() {
        let now = Utc::now();

        assert_eq!(format_time_ago(now - ChronoDuration::seconds(30)), "30s ago");
        assert_eq!(format_time_ago(now - ChronoDuration::seconds(120)), "2m ago");
        assert_eq!(format_time_ago(now - ChronoDuration::hours(5)), "5h ago");
        assert_eq!(format_time_ago(now - ChronoDuration::days(3)), "3d ago");
    }

    #[test]
    fn test_bot_update_parses_partial_payloads() {
        // Updates without message or text must still advance the offset.
        let json = r#"{
            "ok": true,
            "result": [
                {"update_id": 10, "message": {"chat": {"id": 7}, "text": "/ping"}},
                {"update_id": 11, "message": {"chat": {"id": 7}}},
                {"update_id": 12}
            ]
        }"#;

        let response: BotApiResponse<Vec<BotUpdate>> = serde_json::from_str(json).unwrap();
        let updates = response.result.unwrap();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].message.as_ref().unwrap().text.as_deref(), Some("/ping"));
        assert!(updates[1].message.as_ref().unwrap().text.is_none());
        assert!(updates[2].message.is_none());
    }
}
