use crate::types::{Chain, ChainRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("chain {0} already exists")]
    DuplicateKey(u64),

    #[error("chain {0} not found")]
    NotFound(u64),

    #[error("storage unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),

    #[error("failed to prepare database path: {0}")]
    Path(#[from] std::io::Error),

    #[error("failed to encode chain record: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StoreError {
    /// Fatal errors abort the current scan cycle; non-fatal ones
    /// (key misuse on a single chain) are isolated per chain.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StoreError::DuplicateKey(_) | StoreError::NotFound(_))
    }
}

/// Durable keyed table of chain records.
///
/// `chain` (the chain id) identifies at most one record at any time. Writes are
/// committed before the call returns; records are never deleted by normal
/// operation.
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// True iff a record with this chain id is currently stored.
    async fn exists(&self, chain_id: u64) -> Result<bool, StoreError>;

    /// Snapshot of the complete key set at call time.
    async fn all_ids(&self) -> Result<HashSet<u64>, StoreError>;

    /// Creates a new record with `created_at = updated_at = now`.
    /// Fails with [`StoreError::DuplicateKey`] if the chain id already exists.
    async fn insert(&self, chain: &Chain) -> Result<(), StoreError>;

    /// Overwrites all mutable fields and bumps `updated_at`, leaving
    /// `created_at` untouched. Fails with [`StoreError::NotFound`] if the
    /// chain id is absent.
    async fn update(&self, chain: &Chain) -> Result<(), StoreError>;

    async fn get(&self, chain_id: u64) -> Result<Option<ChainRecord>, StoreError>;

    /// All records, newest first (`created_at` descending).
    async fn list(&self) -> Result<Vec<ChainRecord>, StoreError>;

    /// Total number of stored chains, for status reporting.
    async fn count(&self) -> Result<u64, StoreError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chains (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chain INTEGER UNIQUE NOT NULL,
    name TEXT NOT NULL,
    symbol TEXT NOT NULL,
    decimals INTEGER NOT NULL,
    mainnet INTEGER NOT NULL,
    price REAL NOT NULL,
    bal TEXT NOT NULL,
    gas TEXT NOT NULL,
    gwei TEXT NOT NULL,
    inbound INTEGER NOT NULL,
    max_inbound REAL NOT NULL,
    max_inbound_native TEXT NOT NULL,
    max_outbound REAL NOT NULL,
    max_outbound_native TEXT NOT NULL,
    min_outbound REAL NOT NULL,
    min_outbound_native TEXT NOT NULL,
    explorer TEXT,
    rpcs TEXT NOT NULL,
    short INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chain ON chains(chain);
";

const INSERT_CHAIN: &str = "
INSERT INTO chains (
    chain, name, symbol, decimals, mainnet, price, bal, gas, gwei,
    inbound, max_inbound, max_inbound_native, max_outbound, max_outbound_native,
    min_outbound, min_outbound_native, explorer, rpcs, short, created_at, updated_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
";

const UPDATE_CHAIN: &str = "
UPDATE chains SET
    name = ?, symbol = ?, decimals = ?, mainnet = ?, price = ?, bal = ?,
    gas = ?, gwei = ?, inbound = ?, max_inbound = ?, max_inbound_native = ?,
    max_outbound = ?, max_outbound_native = ?, min_outbound = ?,
    min_outbound_native = ?, explorer = ?, rpcs = ?, short = ?, updated_at = ?
WHERE chain = ?
";

/// SQLite-backed [`ChainStore`]. One pool per process; sqlite commits each
/// write before the call returns.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and ensures the schema.
    pub async fn connect(path: &str) -> Result<Self, StoreError> {
        if let Some(dir) = Path::new(path).parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path);
        let pool = SqlitePool::connect(&url).await?;
        let store = Self { pool };
        store.ensure_schema().await?;

        info!("Chain database ready at {}", path);
        Ok(store)
    }

    /// In-memory database. A single connection, so every caller sees the
    /// same data; intended for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Waits for in-flight writes to finish and releases the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_record(row: &SqliteRow) -> Result<ChainRecord, StoreError> {
        let rpcs_json: String = row.try_get("rpcs")?;
        let rpcs: Vec<String> = serde_json::from_str(&rpcs_json)?;

        let chain = Chain {
            bal: row.try_get("bal")?,
            chain: row.try_get::<i64, _>("chain")? as u64,
            decimals: row.try_get::<i64, _>("decimals")? as u32,
            explorer: row.try_get("explorer")?,
            gas: row.try_get("gas")?,
            gwei: row.try_get("gwei")?,
            inbound: row.try_get("inbound")?,
            mainnet: row.try_get("mainnet")?,
            max_inbound: row.try_get("max_inbound")?,
            max_inbound_native: row.try_get("max_inbound_native")?,
            max_outbound: row.try_get("max_outbound")?,
            max_outbound_native: row.try_get("max_outbound_native")?,
            min_outbound: row.try_get("min_outbound")?,
            min_outbound_native: row.try_get("min_outbound_native")?,
            name: row.try_get("name")?,
            price: row.try_get("price")?,
            rpcs,
            short: row.try_get::<i64, _>("short")? as u32,
            symbol: row.try_get("symbol")?,
        };

        Ok(ChainRecord {
            chain,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }
}

#[async_trait]
impl ChainStore for SqliteStore {
    async fn exists(&self, chain_id: u64) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM chains WHERE chain = ? LIMIT 1")
            .bind(chain_id as i64)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    async fn all_ids(&self) -> Result<HashSet<u64>, StoreError> {
        let rows = sqlx::query("SELECT chain FROM chains")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| Ok(row.try_get::<i64, _>("chain")? as u64))
            .collect()
    }

    async fn insert(&self, chain: &Chain) -> Result<(), StoreError> {
        let now = Utc::now();
        let rpcs = serde_json::to_string(&chain.rpcs)?;

        let result = sqlx::query(INSERT_CHAIN)
            .bind(chain.chain as i64)
            .bind(&chain.name)
            .bind(&chain.symbol)
            .bind(chain.decimals as i64)
            .bind(chain.mainnet)
            .bind(chain.price)
            .bind(&chain.bal)
            .bind(&chain.gas)
            .bind(&chain.gwei)
            .bind(chain.inbound)
            .bind(chain.max_inbound)
            .bind(&chain.max_inbound_native)
            .bind(chain.max_outbound)
            .bind(&chain.max_outbound_native)
            .bind(chain.min_outbound)
            .bind(&chain.min_outbound_native)
            .bind(&chain.explorer)
            .bind(&rpcs)
            .bind(chain.short as i64)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateKey(chain.chain))
            }
            Err(e) => Err(StoreError::Unavailable(e)),
        }
    }

    async fn update(&self, chain: &Chain) -> Result<(), StoreError> {
        let now = Utc::now();
        let rpcs = serde_json::to_string(&chain.rpcs)?;

        let result = sqlx::query(UPDATE_CHAIN)
            .bind(&chain.name)
            .bind(&chain.symbol)
            .bind(chain.decimals as i64)
            .bind(chain.mainnet)
            .bind(chain.price)
            .bind(&chain.bal)
            .bind(&chain.gas)
            .bind(&chain.gwei)
            .bind(chain.inbound)
            .bind(chain.max_inbound)
            .bind(&chain.max_inbound_native)
            .bind(chain.max_outbound)
            .bind(&chain.max_outbound_native)
            .bind(chain.min_outbound)
            .bind(&chain.min_outbound_native)
            .bind(&chain.explorer)
            .bind(&rpcs)
            .bind(chain.short as i64)
            .bind(now)
            .bind(chain.chain as i64)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(chain.chain));
        }

        Ok(())
    }

    async fn get(&self, chain_id: u64) -> Result<Option<ChainRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM chains WHERE chain = ?")
            .bind(chain_id as i64)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn list(&self) -> Result<Vec<ChainRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM chains ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chains")
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }
}
