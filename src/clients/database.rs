use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    fallback::FallbackStore,
    models::{
        audit::CreateAuditEntry,
        event::Priority,
        fallback::{FallbackRecord, FallbackStats},
    },
    pipeline::AuditSink,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS fallback_records (
    id UUID PRIMARY KEY,
    payload JSONB NOT NULL,
    topic TEXT NOT NULL,
    priority TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    processed BOOLEAN NOT NULL DEFAULT FALSE,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    processed_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_fallback_unprocessed
    ON fallback_records (created_at) WHERE processed = FALSE;

CREATE TABLE IF NOT EXISTS audit_logs (
    id BIGSERIAL PRIMARY KEY,
    event_id UUID NOT NULL,
    target_id TEXT NOT NULL,
    notification_type TEXT NOT NULL,
    priority TEXT NOT NULL,
    outcome TEXT NOT NULL,
    error_message TEXT,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
";

pub struct DatabaseClient {
    client: Client,
}

impl DatabaseClient {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection terminated");
            }
        });

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    pub async fn ensure_schema(&self) -> Result<(), Error> {
        self.client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| anyhow!("Failed to ensure database schema: {}", e))?;

        Ok(())
    }
}

pub struct PostgresFallbackStore {
    database: Arc<DatabaseClient>,
    max_retries: i32,
}

impl PostgresFallbackStore {
    pub fn new(database: Arc<DatabaseClient>, max_retries: i32) -> Self {
        Self {
            database,
            max_retries,
        }
    }

    fn row_to_record(row: &Row) -> FallbackRecord {
        let priority: String = row.get("priority");

        FallbackRecord {
            id: row.get("id"),
            payload: row.get("payload"),
            topic: row.get("topic"),
            priority: Priority::from_string(&priority),
            created_at: row.get("created_at"),
            processed: row.get("processed"),
            retry_count: row.get("retry_count"),
            last_error: row.get("last_error"),
            processed_at: row.get("processed_at"),
        }
    }
}

#[async_trait]
impl FallbackStore for PostgresFallbackStore {
    async fn create(&self, record: &FallbackRecord) -> Result<(), Error> {
        let priority = record.priority.as_str();

        // Replays of the same event while the broker is down collapse onto
        // the existing record.
        self.database
            .client
            .execute(
                "INSERT INTO fallback_records
                    (id, payload, topic, priority, created_at, processed, retry_count, last_error)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (id) DO NOTHING",
                &[
                    &record.id,
                    &record.payload,
                    &record.topic,
                    &priority,
                    &record.created_at,
                    &record.processed,
                    &record.retry_count,
                    &record.last_error,
                ],
            )
            .await
            .map_err(|e| anyhow!("Failed to create fallback record: {}", e))?;

        debug!(record_id = %record.id, topic = %record.topic, "Fallback record stored");
        Ok(())
    }

    async fn fetch_unprocessed(&self, limit: i64) -> Result<Vec<FallbackRecord>, Error> {
        let rows = self
            .database
            .client
            .query(
                "SELECT id, payload, topic, priority, created_at, processed,
                        retry_count, last_error, processed_at
                 FROM fallback_records
                 WHERE processed = FALSE AND retry_count < $1
                 ORDER BY created_at ASC
                 LIMIT $2",
                &[&self.max_retries, &limit],
            )
            .await
            .map_err(|e| anyhow!("Failed to fetch fallback records: {}", e))?;

        Ok(rows.iter().map(Self::row_to_record).collect())
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), Error> {
        self.database
            .client
            .execute(
                "UPDATE fallback_records
                 SET processed = TRUE, processed_at = $2
                 WHERE id = $1",
                &[&id, &Utc::now()],
            )
            .await
            .map_err(|e| anyhow!("Failed to mark fallback record processed: {}", e))?;

        Ok(())
    }

    async fn record_failure(&self, id: Uuid, last_error: &str) -> Result<(), Error> {
        self.database
            .client
            .execute(
                "UPDATE fallback_records
                 SET retry_count = retry_count + 1, last_error = $2
                 WHERE id = $1",
                &[&id, &last_error],
            )
            .await
            .map_err(|e| anyhow!("Failed to record fallback redelivery failure: {}", e))?;

        Ok(())
    }

    async fn stats(&self) -> Result<FallbackStats, Error> {
        let row = self
            .database
            .client
            .query_one(
                "SELECT
                    COUNT(*) FILTER (WHERE NOT processed AND retry_count < $1) AS pending,
                    COUNT(*) FILTER (WHERE NOT processed AND retry_count >= $1) AS failed,
                    COUNT(*) FILTER (WHERE processed) AS processed
                 FROM fallback_records",
                &[&self.max_retries],
            )
            .await
            .map_err(|e| anyhow!("Failed to read fallback stats: {}", e))?;

        Ok(FallbackStats {
            pending: row.get("pending"),
            failed: row.get("failed"),
            processed: row.get("processed"),
        })
    }
}

pub struct PostgresAuditSink {
    database: Arc<DatabaseClient>,
}

impl PostgresAuditSink {
    pub fn new(database: Arc<DatabaseClient>) -> Self {
        Self { database }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    async fn record(&self, entry: CreateAuditEntry) -> Result<(), Error> {
        let outcome = entry.outcome.to_string();

        self.database
            .client
            .execute(
                "INSERT INTO audit_logs
                    (event_id, target_id, notification_type, priority, outcome, error_message, metadata)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &entry.event_id,
                    &entry.target_id,
                    &entry.notification_type,
                    &entry.priority,
                    &outcome,
                    &entry.error_message,
                    &entry.metadata,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    event_id = %entry.event_id,
                    "Failed to write audit log to database"
                );
                anyhow!("Database write failed: {}", e)
            })?;

        debug!(
            event_id = %entry.event_id,
            outcome = %outcome,
            "Audit log written to database"
        );

        Ok(())
    }
}
