//! PostgreSQL persistence sink.
//!
//! Queryable fields live in their own columns; the full execution, step
//! and definition records are kept as JSONB next to them so that reads
//! round-trip every field.

use crate::model::{EscalationRecord, MessageRecord, MessageStatus};
use crate::traits::PersistenceSink;
use crate::{StoreError, StoreResult};
use agent_bus_types::{Message, MessageType, ValueMap};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use workflow_types::{ExecutionId, StepExecution, WorkflowDefinition, WorkflowExecution, WorkflowId};

/// PostgreSQL-backed persistence sink.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and initialize the schema.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(format!("failed to connect postgres: {e}")))?;

        tracing::info!(max_connections, "Connected to PostgreSQL");

        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    /// Create the sink from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StoreResult<Self> {
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn initialize_schema(&self) -> StoreResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS agent_messages (
                seq BIGSERIAL,
                message_id TEXT PRIMARY KEY,
                correlation_id TEXT,
                conversation_id TEXT,
                message_type TEXT NOT NULL,
                topic TEXT NOT NULL,
                from_agent_id TEXT NOT NULL,
                to_agent_id TEXT,
                payload JSONB NOT NULL,
                metadata JSONB NOT NULL,
                status TEXT NOT NULL,
                trace_id TEXT,
                span_id TEXT NOT NULL,
                parent_span_id TEXT,
                sent_at TIMESTAMPTZ NOT NULL,
                delivered_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_agent_messages_conversation ON agent_messages(conversation_id)",
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                workflow_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                is_active BOOLEAN NOT NULL,
                definition JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS workflow_executions (
                execution_id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                user_id TEXT,
                status TEXT NOT NULL,
                execution JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ,
                duration_ms BIGINT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS workflow_step_executions (
                seq BIGSERIAL,
                execution_id TEXT NOT NULL,
                step_id TEXT NOT NULL,
                step_name TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                status TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                record JSONB NOT NULL,
                started_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (execution_id, step_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS agent_escalations (
                seq BIGSERIAL,
                escalation_id TEXT PRIMARY KEY,
                execution_id TEXT,
                from_agent_id TEXT NOT NULL,
                escalation_type TEXT NOT NULL,
                reason TEXT NOT NULL,
                severity TEXT NOT NULL,
                status TEXT NOT NULL,
                record JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_agent_escalations_execution ON agent_escalations(execution_id)",
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Query(format!("schema init failed: {e}")))?;
        }

        tracing::info!("Database schema initialized");
        Ok(())
    }
}

#[async_trait]
impl PersistenceSink for PostgresStore {
    async fn log_message(&self, message: &Message, status: MessageStatus) -> StoreResult<()> {
        let record = MessageRecord::from_message(message, status);

        sqlx::query(
            r#"
            INSERT INTO agent_messages
                (message_id, correlation_id, conversation_id, message_type, topic,
                 from_agent_id, to_agent_id, payload, metadata, status, trace_id,
                 span_id, parent_span_id, sent_at, delivered_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (message_id) DO UPDATE SET
                status = CASE WHEN agent_messages.status = 'delivered'
                              THEN agent_messages.status ELSE EXCLUDED.status END,
                delivered_at = COALESCE(EXCLUDED.delivered_at, agent_messages.delivered_at)
            "#,
        )
        .bind(&record.message_id)
        .bind(&record.correlation_id)
        .bind(&record.conversation_id)
        .bind(record.message_type.as_str())
        .bind(&record.topic)
        .bind(&record.from_agent_id)
        .bind(&record.to_agent_id)
        .bind(to_json(&record.payload)?)
        .bind(to_json(&record.metadata)?)
        .bind(record.status.as_str())
        .bind(&record.trace_id)
        .bind(&record.span_id)
        .bind(&record.parent_span_id)
        .bind(record.sent_at)
        .bind(record.delivered_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn get_conversation_history(
        &self,
        conversation_id: &str,
    ) -> StoreResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM agent_messages WHERE conversation_id = $1 ORDER BY created_at, seq",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(row_to_message_record).collect()
    }

    async fn save_workflow(&self, definition: &WorkflowDefinition) -> StoreResult<()> {
        definition
            .validate()
            .map_err(|e| StoreError::InvalidDefinition(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO workflows (workflow_id, name, is_active, definition, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (workflow_id) DO UPDATE SET
                name = EXCLUDED.name,
                is_active = EXCLUDED.is_active,
                definition = EXCLUDED.definition,
                updated_at = NOW()
            "#,
        )
        .bind(definition.workflow_id.as_str())
        .bind(&definition.name)
        .bind(definition.is_active)
        .bind(to_json(definition)?)
        .bind(definition.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn load_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> StoreResult<Option<WorkflowDefinition>> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE workflow_id = $1")
            .bind(workflow_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(|r| json_column(&r, "definition")).transpose()
    }

    async fn list_workflows(&self) -> StoreResult<Vec<WorkflowDefinition>> {
        let rows = sqlx::query("SELECT definition FROM workflows ORDER BY workflow_id")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.iter().map(|r| json_column(r, "definition")).collect()
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (execution_id, workflow_id, user_id, status, execution, created_at, completed_at, duration_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(execution.execution_id.as_str())
        .bind(execution.workflow_id.as_str())
        .bind(&execution.user_id)
        .bind(execution.status.as_str())
        .bind(to_json(execution)?)
        .bind(execution.created_at)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
               SET status = $2, execution = $3, completed_at = $4, duration_ms = $5
             WHERE execution_id = $1
            "#,
        )
        .bind(execution.execution_id.as_str())
        .bind(execution.status.as_str())
        .bind(to_json(execution)?)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "execution {}",
                execution.execution_id
            )));
        }
        Ok(())
    }

    async fn get_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> StoreResult<Option<WorkflowExecution>> {
        let row = sqlx::query("SELECT execution FROM workflow_executions WHERE execution_id = $1")
            .bind(execution_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(|r| json_column(&r, "execution")).transpose()
    }

    async fn create_step_execution(&self, step: &StepExecution) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_step_executions
                (execution_id, step_id, step_name, agent_id, status, attempt, record, started_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (execution_id, step_id) DO UPDATE SET
                status = EXCLUDED.status,
                attempt = EXCLUDED.attempt,
                record = EXCLUDED.record,
                started_at = EXCLUDED.started_at
            "#,
        )
        .bind(step.execution_id.as_str())
        .bind(step.step_id.as_str())
        .bind(&step.step_name)
        .bind(&step.agent_id)
        .bind(step.status.as_str())
        .bind(attempt_column(step.attempt))
        .bind(to_json(step)?)
        .bind(step.started_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn update_step_execution(&self, step: &StepExecution) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_step_executions
               SET status = $3, attempt = $4, record = $5
             WHERE execution_id = $1 AND step_id = $2
            "#,
        )
        .bind(step.execution_id.as_str())
        .bind(step.step_id.as_str())
        .bind(step.status.as_str())
        .bind(attempt_column(step.attempt))
        .bind(to_json(step)?)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "step {} of execution {}",
                step.step_id, step.execution_id
            )));
        }
        Ok(())
    }

    async fn get_step_executions(
        &self,
        execution_id: &ExecutionId,
    ) -> StoreResult<Vec<StepExecution>> {
        let rows = sqlx::query(
            "SELECT record FROM workflow_step_executions WHERE execution_id = $1 ORDER BY seq",
        )
        .bind(execution_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(|r| json_column(r, "record")).collect()
    }

    async fn record_escalation(&self, escalation: &EscalationRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_escalations
                (escalation_id, execution_id, from_agent_id, escalation_type, reason,
                 severity, status, record, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&escalation.escalation_id)
        .bind(escalation.execution_id.as_ref().map(|id| id.as_str()))
        .bind(&escalation.from_agent_id)
        .bind(escalation.escalation_type.as_str())
        .bind(&escalation.reason)
        .bind(escalation.severity.as_str())
        .bind(escalation.status.as_str())
        .bind(to_json(escalation)?)
        .bind(escalation.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn get_escalations(
        &self,
        execution_id: &ExecutionId,
    ) -> StoreResult<Vec<EscalationRecord>> {
        let rows = sqlx::query(
            "SELECT record FROM agent_escalations WHERE execution_id = $1 ORDER BY seq",
        )
        .bind(execution_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(|r| json_column(r, "record")).collect()
    }
}

// ── Row helpers ──────────────────────────────────────────────────────

fn to_json<T: Serialize>(value: &T) -> StoreResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn json_column<T: DeserializeOwned>(row: &PgRow, column: &str) -> StoreResult<T> {
    let raw: serde_json::Value = row.try_get(column).map_err(map_sqlx_error)?;
    serde_json::from_value(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn attempt_column(attempt: u32) -> i32 {
    i32::try_from(attempt).unwrap_or(i32::MAX)
}

fn row_to_message_record(row: &PgRow) -> StoreResult<MessageRecord> {
    let payload: Message = json_column(row, "payload")?;
    let metadata: ValueMap = json_column(row, "metadata")?;
    let status = match row.try_get::<String, _>("status").map_err(map_sqlx_error)?.as_str() {
        "delivered" => MessageStatus::Delivered,
        _ => MessageStatus::Sent,
    };
    let message_type: MessageType = payload.message_type();

    Ok(MessageRecord {
        message_id: row.try_get("message_id").map_err(map_sqlx_error)?,
        correlation_id: row.try_get("correlation_id").map_err(map_sqlx_error)?,
        conversation_id: row.try_get("conversation_id").map_err(map_sqlx_error)?,
        message_type,
        topic: row.try_get("topic").map_err(map_sqlx_error)?,
        from_agent_id: row.try_get("from_agent_id").map_err(map_sqlx_error)?,
        to_agent_id: row.try_get("to_agent_id").map_err(map_sqlx_error)?,
        payload,
        metadata,
        status,
        trace_id: row.try_get("trace_id").map_err(map_sqlx_error)?,
        span_id: row.try_get("span_id").map_err(map_sqlx_error)?,
        parent_span_id: row.try_get("parent_span_id").map_err(map_sqlx_error)?,
        sent_at: row.try_get::<DateTime<Utc>, _>("sent_at").map_err(map_sqlx_error)?,
        delivered_at: row.try_get("delivered_at").map_err(map_sqlx_error)?,
        created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
    })
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Conflict(db_err.message().to_string());
        }
    }
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Unavailable(err.to_string())
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => StoreError::Connection(err.to_string()),
        other => StoreError::Query(other.to_string()),
    }
}
