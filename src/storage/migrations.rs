//! Schema migrations for the Postgres engine.
//!
//! Each statement in [`super::schema::all_schema_statements`] is a numbered
//! step. Steps already listed in `_migrations` are skipped; the rest run in
//! order, one transaction per step.

use std::collections::HashSet;

use sqlx::PgPool;
use thiserror::Error;

use super::schema;

const LOG_TABLE: &str = "_migrations";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A step's SQL was rejected.
    #[error("Migration step {step} failed: {reason}")]
    StepFailed { step: String, reason: String },
}

impl From<MigrationError> for super::StoreError {
    fn from(e: MigrationError) -> Self {
        match e {
            MigrationError::Database(e) => e.into(),
            e @ MigrationError::StepFailed { .. } => Self::Query(e.to_string()),
        }
    }
}

fn step_name(index: usize) -> String {
    format!("assets_v1_part_{}", index)
}

/// Applies pending schema steps against a pool.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs every pending step and returns how many were applied.
    pub async fn run_migrations(&self) -> Result<usize, MigrationError> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {LOG_TABLE} (
                name TEXT PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"
        ))
        .execute(&self.pool)
        .await?;

        let done: HashSet<String> =
            sqlx::query_scalar(&format!("SELECT name FROM {LOG_TABLE}"))
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .collect();

        let mut applied = 0;
        for (index, sql) in schema::all_schema_statements().iter().enumerate() {
            let step = step_name(index);
            if done.contains(&step) {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            sqlx::query(sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| MigrationError::StepFailed {
                    step: step.clone(),
                    reason: e.to_string(),
                })?;
            sqlx::query(&format!(
                "INSERT INTO {LOG_TABLE} (name) VALUES ($1) ON CONFLICT DO NOTHING"
            ))
            .bind(&step)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            tracing::debug!(step = %step, "Applied migration step");
            applied += 1;
        }

        if applied > 0 {
            tracing::info!(applied = applied, "Applied asset store migrations");
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreError;

    #[test]
    fn test_step_names_are_stable() {
        assert_eq!(step_name(0), "assets_v1_part_0");
        assert_eq!(step_name(3), "assets_v1_part_3");
    }

    #[test]
    fn test_step_failure_maps_to_query_error() {
        let err: StoreError = MigrationError::StepFailed {
            step: step_name(2),
            reason: "syntax error".to_string(),
        }
        .into();
        assert!(matches!(err, StoreError::Query(msg) if msg.contains("assets_v1_part_2")));
    }
}
