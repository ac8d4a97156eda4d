//! History store — a narrow `sqlx` (sqlite) sink that persists one row per
//! Reference/run/job. Schema is intentionally thin: ids, names,
//! timestamps, conclusion. Grounded on the pack's sqlite repository
//! pattern (`boternity-infra`'s workflow store): `CREATE TABLE IF NOT
//! EXISTS`, manual row mapping, `ON CONFLICT DO UPDATE`.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::pipeline::Sink;
use crate::span::{Span, SpanKind};

pub struct HistorySink {
    pool: SqlitePool,
}

impl HistorySink {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePool::connect(database_url).await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS spans (
                span_id TEXT NOT NULL,
                trace_id TEXT NOT NULL,
                parent_span_id TEXT,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                conclusion TEXT,
                PRIMARY KEY (span_id, trace_id)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Sink for HistorySink {
    fn name(&self) -> &str {
        "history"
    }

    async fn export(&self, spans: &[Span]) -> Result<(), anyhow::Error> {
        for span in spans {
            let kind = match span.kind {
                SpanKind::Workflow => "workflow",
                SpanKind::Job => "job",
                SpanKind::Step => "step",
                SpanKind::Marker => "marker",
            };
            let conclusion = span.attributes.get("github.conclusion").map(|value| value.to_string());

            sqlx::query(
                r#"
                INSERT INTO spans (span_id, trace_id, parent_span_id, kind, name, started_at, completed_at, conclusion)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(span_id, trace_id) DO UPDATE SET
                    completed_at = excluded.completed_at,
                    conclusion = excluded.conclusion
                "#,
            )
            .bind(format!("{:016x}", span.span_id))
            .bind(format!("{:032x}", span.trace_id))
            .bind(span.parent_span_id.map(|id| format!("{id:016x}")))
            .bind(kind)
            .bind(&span.name)
            .bind(span.start_at.to_string())
            .bind(span.end_at.to_string())
            .bind(conclusion)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn finish(&self) -> Result<(), anyhow::Error> {
        self.pool.close().await;
        Ok(())
    }
}
