//! Database module - SQLite round journal
//!
//! Append-only record of committed rounds. The engine never reads it back to
//! rebuild state; it exists for after-action review.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::models::RoundRecord;

/// Create database connection pool
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;

    tracing::info!("Database schema applied successfully");
    Ok(())
}

/// Database schema SQL
const SCHEMA_SQL: &str = r#"
-- One row per check cycle
CREATE TABLE IF NOT EXISTS check_rounds (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    round_index      INTEGER NOT NULL,
    timestamp        TEXT    NOT NULL,
    duration_ms      INTEGER NOT NULL,
    round_score      INTEGER NOT NULL,
    max_score        INTEGER NOT NULL,
    cumulative_score INTEGER NOT NULL,
    fault            TEXT
);

-- One row per service per cycle
CREATE TABLE IF NOT EXISTS service_checks (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    round_id      INTEGER NOT NULL REFERENCES check_rounds(id),
    service_id    TEXT    NOT NULL,
    status        TEXT    NOT NULL,
    up            INTEGER NOT NULL,
    points_earned INTEGER NOT NULL,
    latency_ms    INTEGER NOT NULL,
    message       TEXT
);

CREATE INDEX IF NOT EXISTS idx_sc_round   ON service_checks(round_id);
CREATE INDEX IF NOT EXISTS idx_sc_service ON service_checks(service_id);
"#;

#[derive(Clone)]
pub struct Journal {
    pool: SqlitePool,
}

impl Journal {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist one committed round and its per-service rows atomically
    pub async fn append(&self, record: &RoundRecord) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let round_id = sqlx::query(
            r#"
            INSERT INTO check_rounds
                (round_index, timestamp, duration_ms, round_score, max_score, cumulative_score, fault)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.round_index as i64)
        .bind(record.started_at)
        .bind(record.duration_ms as i64)
        .bind(record.round_score_delta as i64)
        .bind(record.max_score_per_round as i64)
        .bind(record.team_cumulative_score as i64)
        .bind(&record.fault)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (service_id, outcome) in &record.outcomes {
            let points = record.awarded.get(service_id).copied().unwrap_or(0);
            sqlx::query(
                r#"
                INSERT INTO service_checks
                    (round_id, service_id, status, up, points_earned, latency_ms, message)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(round_id)
            .bind(service_id)
            .bind(outcome.status.as_str())
            .bind(outcome.is_pass())
            .bind(points as i64)
            .bind(outcome.latency_ms as i64)
            .bind(&outcome.message)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    /// Rounds already in the journal, including earlier runs
    pub async fn round_count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM check_rounds")
            .fetch_one(&self.pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use crate::models::ProbeOutcome;
    use crate::error::ProbeError;

    async fn journal(dir: &tempfile::TempDir) -> Journal {
        let url = format!("sqlite://{}", dir.path().join("scores.db").display());
        let pool = create_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        Journal::new(pool)
    }

    fn record(index: u64) -> RoundRecord {
        let mut outcomes = BTreeMap::new();
        outcomes.insert("http".to_string(), ProbeOutcome::pass("HTTP 200", Duration::from_millis(12)));
        outcomes.insert(
            "ftp".to_string(),
            ProbeOutcome::from_error(&ProbeError::ConnectionRefused, Duration::from_millis(1)),
        );
        let mut awarded = BTreeMap::new();
        awarded.insert("http".to_string(), 100);

        RoundRecord {
            round_index: index,
            started_at: chrono::Utc::now(),
            duration_ms: 40,
            outcomes,
            awarded,
            unclamped_total: 100,
            round_score_delta: 100,
            max_score_per_round: 150,
            team_cumulative_score: 100 * (index + 1),
            fault: None,
        }
    }

    #[tokio::test]
    async fn test_append_writes_round_and_service_rows() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(&dir).await;

        journal.append(&record(0)).await.unwrap();
        journal.append(&record(1)).await.unwrap();
        assert_eq!(journal.round_count().await.unwrap(), 2);

        let rows: Vec<(String, String, bool, i64)> = sqlx::query_as(
            "SELECT service_id, status, up, points_earned FROM service_checks WHERE round_id = 1 ORDER BY service_id",
        )
        .fetch_all(&journal.pool)
        .await
        .unwrap();

        assert_eq!(
            rows,
            vec![
                ("ftp".to_string(), "ERROR".to_string(), false, 0),
                ("http".to_string(), "PASS".to_string(), true, 100),
            ]
        );
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let journal = journal(&dir).await;
        run_migrations(&journal.pool).await.unwrap();
        assert_eq!(journal.round_count().await.unwrap(), 0);
    }
}
