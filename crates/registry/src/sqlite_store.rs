use async_trait::async_trait;
use fusion_htlc_types::{FailureKind, Secret, SwapKey, SwapState, SwapStatus, H256, U256};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::error::RegistryError;
use crate::store::{is_expired_at, SpentFills, StateTransition, SwapRegistry};

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE REGISTRY
// ═══════════════════════════════════════════════════════════════════════════

pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    /// Open (or create) the database at `db_path`
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, RegistryError> {
        let url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| RegistryError::ConnectionError(e.to_string()))?;

        let registry = Self { pool };
        registry.run_migrations().await?;

        Ok(registry)
    }

    /// Private in-memory database. One connection, since every SQLite
    /// in-memory connection has its own database.
    pub async fn in_memory() -> Result<Self, RegistryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| RegistryError::ConnectionError(e.to_string()))?;

        let registry = Self { pool };
        registry.run_migrations().await?;

        Ok(registry)
    }

    async fn run_migrations(&self) -> Result<(), RegistryError> {
        for migration in [
            include_str!("../migrations/001_create_swaps.sql"),
            include_str!("../migrations/002_create_swap_transitions.sql"),
            include_str!("../migrations/003_create_indexes.sql"),
            include_str!("../migrations/004_create_spent_fills.sql"),
        ] {
            sqlx::query(migration)
                .execute(&self.pool)
                .await
                .map_err(|e| RegistryError::DatabaseError(e.to_string()))?;
        }
        Ok(())
    }

    fn row_to_state(row: &SqliteRow) -> Result<SwapState, RegistryError> {
        let key = SwapKey::new(
            parse_h256(row.get("order_hash"))?,
            row.get::<i64, _>("fill_index") as u32,
        );
        let secret_bytes = parse_bytes32(row.get("secret"))?;

        Ok(SwapState {
            key,
            src_chain_id: row.get::<i64, _>("src_chain_id") as u64,
            dst_chain_id: row.get::<i64, _>("dst_chain_id") as u64,
            secret: Secret::from_bytes(secret_bytes),
            hashlock_leaf: parse_h256(row.get("hashlock_leaf"))?,
            proof: from_json_opt(row.get("proof"))?,
            fill_amount: U256::from_dec_str(row.get("fill_amount"))
                .map_err(|e| RegistryError::SerializationError(e.to_string()))?,
            src_immutables: from_json(row.get("src_immutables"))?,
            dst_immutables: from_json(row.get("dst_immutables"))?,
            forward_to: from_json_opt(row.get("forward_to"))?,
            src_escrow: from_json_opt(row.get("src_escrow"))?,
            dst_escrow: from_json_opt(row.get("dst_escrow"))?,
            src_submitted_at: row.get::<Option<i64>, _>("src_submitted_at").map(|v| v as u64),
            dst_submitted_at: row.get::<Option<i64>, _>("dst_submitted_at").map(|v| v as u64),
            status: parse_status(row.get("status"))?,
            failure: from_json_opt(row.get("failure"))?,
            secret_revealed: row.get::<i64, _>("secret_revealed") != 0,
            version: row.get::<i64, _>("version") as u64,
            created_at: row.get::<i64, _>("created_at") as u64,
            updated_at: row.get::<i64, _>("updated_at") as u64,
            completed_at: row.get::<Option<i64>, _>("completed_at").map(|v| v as u64),
        })
    }

    async fn fetch_rows(&self, sql: &str, order_hash: Option<String>) -> Result<Vec<SwapState>, RegistryError> {
        let mut query = sqlx::query(sql);
        if let Some(hash) = order_hash {
            query = query.bind(hash);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RegistryError::DatabaseError(e.to_string()))?;

        rows.iter().map(Self::row_to_state).collect()
    }

    /// Write every mutable column; `expected_version` turns the write into a CAS
    async fn store_next(
        &self,
        state: &SwapState,
        expected_version: Option<u64>,
    ) -> Result<SwapState, RegistryError> {
        let current = self
            .get(&state.key)
            .await?
            .ok_or(RegistryError::NotFound(state.key))?;

        let guard_version = expected_version.unwrap_or(current.version);
        let mut next = state.clone();
        next.version = guard_version + 1;

        let result = sqlx::query(
            r#"
            UPDATE swaps
            SET status = ?, failure = ?, proof = ?, src_escrow = ?, dst_escrow = ?,
                src_submitted_at = ?, dst_submitted_at = ?,
                secret_revealed = ?, version = ?, updated_at = ?, completed_at = ?
            WHERE order_hash = ? AND fill_index = ? AND version = ?
            "#,
        )
        .bind(status_to_string(&next.status))
        .bind(to_json_opt(&next.failure)?)
        .bind(to_json_opt(&next.proof)?)
        .bind(to_json_opt(&next.src_escrow)?)
        .bind(to_json_opt(&next.dst_escrow)?)
        .bind(next.src_submitted_at.map(|v| v as i64))
        .bind(next.dst_submitted_at.map(|v| v as i64))
        .bind(next.secret_revealed as i64)
        .bind(next.version as i64)
        .bind(next.updated_at as i64)
        .bind(next.completed_at.map(|v| v as i64))
        .bind(format_h256(&next.key.order_hash))
        .bind(next.key.fill_index as i64)
        .bind(guard_version as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| RegistryError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            let actual = self
                .get(&state.key)
                .await?
                .map(|s| s.version)
                .ok_or(RegistryError::NotFound(state.key))?;
            return Err(RegistryError::VersionConflict {
                key: state.key,
                expected: guard_version,
                actual,
            });
        }

        Ok(next)
    }

    async fn delete(&self, key: &SwapKey) -> Result<(), RegistryError> {
        for sql in [
            "DELETE FROM swaps WHERE order_hash = ? AND fill_index = ?",
            "DELETE FROM swap_transitions WHERE order_hash = ? AND fill_index = ?",
        ] {
            sqlx::query(sql)
                .bind(format_h256(&key.order_hash))
                .bind(key.fill_index as i64)
                .execute(&self.pool)
                .await
                .map_err(|e| RegistryError::DatabaseError(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl SwapRegistry for SqliteRegistry {
    async fn insert(&self, state: &SwapState) -> Result<(), RegistryError> {
        let duplicate = |e: sqlx::Error| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                RegistryError::DuplicateId(state.key)
            }
            e => RegistryError::DatabaseError(e.to_string()),
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RegistryError::DatabaseError(e.to_string()))?;

        sqlx::query("INSERT INTO spent_fills (order_hash, fill_index, fill_amount) VALUES (?, ?, ?)")
            .bind(format_h256(&state.key.order_hash))
            .bind(state.key.fill_index as i64)
            .bind(state.fill_amount.to_string())
            .execute(&mut *tx)
            .await
            .map_err(duplicate)?;

        sqlx::query(
            r#"
            INSERT INTO swaps (
                order_hash, fill_index, src_chain_id, dst_chain_id, status, failure, secret,
                hashlock_leaf, proof, fill_amount, src_immutables, dst_immutables, forward_to,
                src_escrow, dst_escrow, src_submitted_at, dst_submitted_at, secret_revealed,
                version, created_at, updated_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(format_h256(&state.key.order_hash))
        .bind(state.key.fill_index as i64)
        .bind(state.src_chain_id as i64)
        .bind(state.dst_chain_id as i64)
        .bind(status_to_string(&state.status))
        .bind(to_json_opt(&state.failure)?)
        .bind(hex::encode(state.secret.as_bytes()))
        .bind(format_h256(&state.hashlock_leaf))
        .bind(to_json_opt(&state.proof)?)
        .bind(state.fill_amount.to_string())
        .bind(to_json(&state.src_immutables)?)
        .bind(to_json(&state.dst_immutables)?)
        .bind(to_json_opt(&state.forward_to)?)
        .bind(to_json_opt(&state.src_escrow)?)
        .bind(to_json_opt(&state.dst_escrow)?)
        .bind(state.src_submitted_at.map(|v| v as i64))
        .bind(state.dst_submitted_at.map(|v| v as i64))
        .bind(state.secret_revealed as i64)
        .bind(state.version as i64)
        .bind(state.created_at as i64)
        .bind(state.updated_at as i64)
        .bind(state.completed_at.map(|v| v as i64))
        .execute(&mut *tx)
        .await
        .map_err(duplicate)?;

        tx.commit()
            .await
            .map_err(|e| RegistryError::DatabaseError(e.to_string()))
    }

    async fn get(&self, key: &SwapKey) -> Result<Option<SwapState>, RegistryError> {
        let row = sqlx::query("SELECT * FROM swaps WHERE order_hash = ? AND fill_index = ?")
            .bind(format_h256(&key.order_hash))
            .bind(key.fill_index as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RegistryError::DatabaseError(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(Self::row_to_state(&row)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, state: &SwapState) -> Result<SwapState, RegistryError> {
        self.store_next(state, None).await
    }

    async fn compare_and_swap(
        &self,
        state: &SwapState,
        expected_version: u64,
    ) -> Result<SwapState, RegistryError> {
        self.store_next(state, Some(expected_version)).await
    }

    async fn list_by_order(&self, order_hash: H256) -> Result<Vec<SwapState>, RegistryError> {
        self.fetch_rows(
            "SELECT * FROM swaps WHERE order_hash = ? ORDER BY fill_index ASC",
            Some(format_h256(&order_hash)),
        )
        .await
    }

    async fn spent_fills(&self, order_hash: H256) -> Result<SpentFills, RegistryError> {
        let rows = sqlx::query("SELECT fill_index, fill_amount FROM spent_fills WHERE order_hash = ?")
            .bind(format_h256(&order_hash))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RegistryError::DatabaseError(e.to_string()))?;

        let entries = rows
            .iter()
            .map(|row| {
                let amount = U256::from_dec_str(row.get("fill_amount"))
                    .map_err(|e| RegistryError::SerializationError(e.to_string()))?;
                Ok((row.get::<i64, _>("fill_index") as u32, amount))
            })
            .collect::<Result<Vec<_>, RegistryError>>()?;
        Ok(SpentFills::from_entries(entries))
    }

    async fn list_active(&self) -> Result<Vec<SwapState>, RegistryError> {
        self.fetch_rows(
            r#"
            SELECT * FROM swaps
            WHERE status NOT IN ('completed', 'cancelled')
            AND status NOT LIKE 'failed:%'
            ORDER BY created_at ASC, order_hash ASC, fill_index ASC
            "#,
            None,
        )
        .await
    }

    async fn record_transition(
        &self,
        key: &SwapKey,
        transition: StateTransition,
    ) -> Result<(), RegistryError> {
        if self.get(key).await?.is_none() {
            return Err(RegistryError::NotFound(*key));
        }

        sqlx::query(
            r#"
            INSERT INTO swap_transitions (
                order_hash, fill_index, from_status, to_status, timestamp, details, tx_hash
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(format_h256(&key.order_hash))
        .bind(key.fill_index as i64)
        .bind(status_to_string(&transition.from_status))
        .bind(status_to_string(&transition.to_status))
        .bind(transition.timestamp as i64)
        .bind(&transition.details)
        .bind(transition.tx_hash.as_ref().map(format_h256))
        .execute(&self.pool)
        .await
        .map_err(|e| RegistryError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn get_history(&self, key: &SwapKey) -> Result<Vec<StateTransition>, RegistryError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM swap_transitions
            WHERE order_hash = ? AND fill_index = ?
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(format_h256(&key.order_hash))
        .bind(key.fill_index as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RegistryError::DatabaseError(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let tx_hash = row
                    .get::<Option<String>, _>("tx_hash")
                    .map(|s| parse_h256(&s))
                    .transpose()?;

                Ok(StateTransition {
                    from_status: parse_status(row.get("from_status"))?,
                    to_status: parse_status(row.get("to_status"))?,
                    timestamp: row.get::<i64, _>("timestamp") as u64,
                    details: row.get("details"),
                    tx_hash,
                })
            })
            .collect()
    }

    async fn acknowledge(&self, key: &SwapKey) -> Result<(), RegistryError> {
        let state = self.get(key).await?.ok_or(RegistryError::NotFound(*key))?;
        if !state.status.is_terminal() {
            return Err(RegistryError::NotTerminal(*key));
        }
        self.delete(key).await
    }

    async fn purge_expired(&self, now: u64, retention_secs: u64) -> Result<usize, RegistryError> {
        let terminal = self
            .fetch_rows(
                r#"
                SELECT * FROM swaps
                WHERE status IN ('completed', 'cancelled') OR status LIKE 'failed:%'
                "#,
                None,
            )
            .await?;

        let mut purged = 0;
        for state in terminal.iter().filter(|s| is_expired_at(s, now, retention_secs)) {
            self.delete(&state.key).await?;
            purged += 1;
        }
        Ok(purged)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════

fn status_to_string(status: &SwapStatus) -> String {
    match status {
        SwapStatus::Failed(kind) => format!("failed:{}", kind.as_str()),
        other => other.as_str().to_string(),
    }
}

fn parse_status(s: &str) -> Result<SwapStatus, RegistryError> {
    if let Some(kind) = s.strip_prefix("failed:") {
        return FailureKind::parse(kind)
            .map(SwapStatus::Failed)
            .ok_or_else(|| RegistryError::SerializationError(format!("unknown failure kind: {}", kind)));
    }

    match s {
        "created" => Ok(SwapStatus::Created),
        "funding_destination" => Ok(SwapStatus::FundingDestination),
        "awaiting_source_authorization" => Ok(SwapStatus::AwaitingSourceAuthorization),
        "funding_source" => Ok(SwapStatus::FundingSource),
        "funds_verified" => Ok(SwapStatus::FundsVerified),
        "revealing_on_source" => Ok(SwapStatus::RevealingOnSource),
        "revealing_on_destination" => Ok(SwapStatus::RevealingOnDestination),
        "completed" => Ok(SwapStatus::Completed),
        "cancelled" => Ok(SwapStatus::Cancelled),
        _ => Err(RegistryError::SerializationError(format!(
            "unknown status: {}",
            s
        ))),
    }
}

fn format_h256(hash: &H256) -> String {
    format!("{:#x}", hash)
}

fn parse_bytes32(s: &str) -> Result<[u8; 32], RegistryError> {
    let bytes = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| RegistryError::SerializationError(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| RegistryError::SerializationError(format!("expected 32 bytes: {}", s)))
}

fn parse_h256(s: &str) -> Result<H256, RegistryError> {
    parse_bytes32(s).map(H256::from)
}

fn to_json<T: Serialize>(value: &T) -> Result<String, RegistryError> {
    serde_json::to_string(value).map_err(|e| RegistryError::SerializationError(e.to_string()))
}

fn to_json_opt<T: Serialize>(value: &Option<T>) -> Result<Option<String>, RegistryError> {
    value.as_ref().map(to_json).transpose()
}

fn from_json<T: DeserializeOwned>(s: &str) -> Result<T, RegistryError> {
    serde_json::from_str(s).map_err(|e| RegistryError::SerializationError(e.to_string()))
}

fn from_json_opt<T: DeserializeOwned>(s: Option<String>) -> Result<Option<T>, RegistryError> {
    s.as_deref().map(from_json).transpose()
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
