use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::any::AnyPoolOptions;
use trading_core::{
    ClosedPosition, Persistence, Position, Signal, StrategyConfig, TradeRecord, TradingError,
    TradingResult,
};

/// SQLite-backed store for signals, trades, positions and per-account
/// strategy settings.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: sqlx::AnyPool,
}

impl SqlitePersistence {
    pub async fn connect(database_url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .with_context(|| format!("failed to open database {}", database_url))?;
        let store = Self::from_pool(pool);
        store.init_tables().await?;
        Ok(store)
    }

    pub fn from_pool(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::AnyPool {
        &self.pool
    }

    pub async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                instrument TEXT NOT NULL,
                action TEXT NOT NULL,
                strategy TEXT NOT NULL,
                strength REAL NOT NULL,
                confidence REAL NOT NULL,
                entry_price REAL,
                stop_loss REAL,
                take_profit REAL,
                position_size REAL,
                ai_enhanced INTEGER NOT NULL DEFAULT 0,
                reason TEXT,
                indicators TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                instrument TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity REAL NOT NULL,
                price REAL NOT NULL,
                realized_pnl REAL,
                strategy TEXT NOT NULL,
                order_id TEXT,
                executed_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                instrument TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_price REAL NOT NULL,
                current_price REAL NOT NULL,
                quantity REAL NOT NULL,
                pnl REAL NOT NULL,
                pnl_percent REAL NOT NULL,
                stop_loss REAL,
                take_profit REAL,
                leverage REAL NOT NULL,
                strategy TEXT NOT NULL,
                status TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                exit_price REAL,
                realized_pnl REAL,
                close_reason TEXT,
                closed_at TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS strategy_configs (
                account_id TEXT NOT NULL,
                name TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                weight REAL NOT NULL DEFAULT 1.0,
                follow_own_signals INTEGER NOT NULL DEFAULT 1,
                follow_ai_signals INTEGER NOT NULL DEFAULT 1,
                autonomous INTEGER NOT NULL DEFAULT 0,
                parameters TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (account_id, name)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agent_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_signals_instrument ON signals(instrument)")
            .execute(&self.pool)
            .await
            .ok();
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status)")
            .execute(&self.pool)
            .await
            .ok();

        Ok(())
    }

    pub async fn save_strategy_config(&self, account_id: &str, config: &StrategyConfig) -> Result<()> {
        let parameters = serde_json::to_string(&config.parameters)?;
        sqlx::query(
            "INSERT INTO strategy_configs
             (account_id, name, enabled, weight, follow_own_signals, follow_ai_signals,
              autonomous, parameters, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(account_id, name) DO UPDATE SET
                enabled = excluded.enabled,
                weight = excluded.weight,
                follow_own_signals = excluded.follow_own_signals,
                follow_ai_signals = excluded.follow_ai_signals,
                autonomous = excluded.autonomous,
                parameters = excluded.parameters,
                updated_at = excluded.updated_at",
        )
        .bind(account_id)
        .bind(&config.name)
        .bind(config.enabled as i64)
        .bind(config.weight)
        .bind(config.follow_own_signals as i64)
        .bind(config.follow_ai_signals as i64)
        .bind(config.autonomous as i64)
        .bind(parameters)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_state (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_state(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM agent_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    async fn upsert_position(&self, position: &Position, status: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO positions
             (id, instrument, side, entry_price, current_price, quantity, pnl, pnl_percent,
              stop_loss, take_profit, leverage, strategy, status, opened_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                current_price = excluded.current_price,
                quantity = excluded.quantity,
                pnl = excluded.pnl,
                pnl_percent = excluded.pnl_percent,
                stop_loss = excluded.stop_loss,
                take_profit = excluded.take_profit,
                status = excluded.status",
        )
        .bind(&position.id)
        .bind(&position.instrument)
        .bind(position.side.as_str())
        .bind(position.entry_price)
        .bind(position.current_price)
        .bind(position.quantity)
        .bind(position.pnl)
        .bind(position.pnl_percent)
        .bind(position.stop_loss)
        .bind(position.take_profit)
        .bind(position.leverage)
        .bind(&position.strategy)
        .bind(status)
        .bind(position.opened_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> TradingError {
    TradingError::Persistence(e.to_string())
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn save_signal(&self, signal: &Signal) -> TradingResult<()> {
        let indicators = serde_json::to_string(&signal.indicators)
            .map_err(|e| TradingError::Persistence(e.to_string()))?;
        sqlx::query(
            "INSERT INTO signals
             (id, instrument, action, strategy, strength, confidence, entry_price, stop_loss,
              take_profit, position_size, ai_enhanced, reason, indicators, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&signal.id)
        .bind(&signal.instrument)
        .bind(signal.action.as_str())
        .bind(&signal.strategy)
        .bind(signal.strength)
        .bind(signal.confidence)
        .bind(signal.entry_price)
        .bind(signal.stop_loss)
        .bind(signal.take_profit)
        .bind(signal.position_size)
        .bind(signal.ai_enhanced as i64)
        .bind(&signal.reason)
        .bind(indicators)
        .bind(signal.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn save_trade(&self, trade: &TradeRecord) -> TradingResult<()> {
        sqlx::query(
            "INSERT INTO trades
             (id, instrument, side, quantity, price, realized_pnl, strategy, order_id, executed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&trade.id)
        .bind(&trade.instrument)
        .bind(trade.side.as_str())
        .bind(trade.quantity)
        .bind(trade.price)
        .bind(trade.realized_pnl)
        .bind(&trade.strategy)
        .bind(trade.order_id.as_deref())
        .bind(trade.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_position(&self, position: &Position) -> TradingResult<()> {
        self.upsert_position(position, "open").await.map_err(db_err)
    }

    async fn close_position(&self, closed: &ClosedPosition) -> TradingResult<()> {
        self.upsert_position(&closed.position, "closed")
            .await
            .map_err(db_err)?;
        sqlx::query(
            "UPDATE positions SET exit_price = ?, realized_pnl = ?, close_reason = ?, closed_at = ?
             WHERE id = ?",
        )
        .bind(closed.exit_price)
        .bind(closed.realized_pnl)
        .bind(&closed.reason)
        .bind(closed.closed_at.to_rfc3339())
        .bind(&closed.position.id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_strategy_config(&self, account_id: &str) -> TradingResult<Vec<StrategyConfig>> {
        let rows: Vec<(String, i64, f64, i64, i64, i64, Option<String>)> = sqlx::query_as(
            "SELECT name, enabled, weight, follow_own_signals, follow_ai_signals, autonomous, parameters
             FROM strategy_configs WHERE account_id = ? ORDER BY name",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|(name, enabled, weight, own, ai, autonomous, parameters)| {
                let parameters = match parameters.as_deref() {
                    Some(raw) if !raw.is_empty() => serde_json::from_str(raw).map_err(|e| {
                        TradingError::Persistence(format!("bad parameters for {}: {}", name, e))
                    })?,
                    _ => serde_json::Value::Null,
                };
                Ok(StrategyConfig {
                    name,
                    enabled: enabled != 0,
                    weight,
                    follow_own_signals: own != 0,
                    follow_ai_signals: ai != 0,
                    autonomous: autonomous != 0,
                    parameters,
                })
            })
            .collect()
    }
}
