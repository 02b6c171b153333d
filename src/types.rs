use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A blockchain network entry as reported by the chain inventory API.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chain {
    pub bal: String,
    /// Globally unique chain id, immutable once created. The dedup key.
    pub chain: u64,
    pub decimals: u32,
    #[serde(default)]
    pub explorer: Option<String>,
    pub gas: String,
    pub gwei: String,
    pub inbound: bool,
    pub mainnet: bool,
    pub max_inbound: f64,
    pub max_inbound_native: String,
    pub max_outbound: f64,
    pub max_outbound_native: String,
    pub min_outbound: f64,
    pub min_outbound_native: String,
    pub name: String,
    pub price: f64,
    /// RPC endpoint URLs, first entry is treated as primary.
    pub rpcs: Vec<String>,
    pub short: u32,
    pub symbol: String,
}

impl Chain {
    /// The primary RPC endpoint, if the API reported any.
    pub fn primary_rpc(&self) -> Option<&str> {
        self.rpcs.first().map(String::as_str)
    }
}

/// Top-level shape of the inventory API response.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainsApiResponse {
    pub chains: Vec<Chain>,
}

/// A persisted chain row together with its storage metadata.
///
/// `created_at` is set once at first insertion and never changes;
/// `updated_at` is bumped on every write.
#[derive(Debug, Clone, Serialize)]
pub struct ChainRecord {
    #[serde(flatten)]
    pub chain: Chain,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A chain seen for the first time, paired with the instant it was observed.
/// Ephemeral: consumed by the notifier, never persisted as its own entity.
#[derive(Debug, Clone)]
pub struct NewChainDetection {
    pub chain: Chain,
    pub detected_at: DateTime<Utc>,
}

/// Point-in-time scanner state, answered for /ping and /internal/status.
#[derive(Debug, Clone, Serialize)]
pub struct ScanStats {
    pub uptime_secs: u64,
    pub last_scan_time: Option<DateTime<Utc>>,
    pub next_scan_in_secs: u64,
    pub polling_interval_secs: u64,
    pub total_chains: u64,
}

#[cfg(test)]
pub(crate) fn sample_chain(chain_id: u64, name: &str) -> Chain {
    Chain {
        bal: "0".to_string(),
        chain: chain_id,
        decimals: 18,
        explorer: Some(format!("https://scan.{}.example", name)),
        gas: "21000".to_string(),
        gwei: "12.5".to_string(),
        inbound: true,
        mainnet: true,
        max_inbound: 50_000.0,
        max_inbound_native: "25".to_string(),
        max_outbound: 50_000.0,
        max_outbound_native: "25".to_string(),
        min_outbound: 10.0,
        min_outbound_native: "0.005".to_string(),
        name: name.to_string(),
        price: 2000.0,
        rpcs: vec![format!("https://rpc.{}.example", name)],
        short: 1,
        symbol: name.chars().take(3).collect::<String>().to_uppercase(),
    }
}
