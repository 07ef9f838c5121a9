// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Target PostgreSQL Adapter
//!
//! sqlx implementation of the target-database port.
//!
//! Every operation opens its own `PgConnection` and closes it when done; the
//! lock holder gets a dedicated connection that lives for the whole hold. No
//! pool is shared, because the lock holder drives its session from a
//! current-thread runtime on its own OS thread and a pool's sockets are tied
//! to the runtime that opened them. Each round trip is wrapped in a timeout.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::database::{
    BlockedQuery, DatabaseError, DatabaseProvider, LockAcquisition, LockSession, LockTarget, TargetDatabase,
};
use crate::domain::parameters::DatabaseUrl;
use crate::domain::sanitize::sanitize_message;

/// Quote a validated (optionally schema-qualified) identifier.
pub fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, DatabaseError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(DatabaseError::Query(sanitize_message(&e.to_string()))),
        Err(_) => Err(DatabaseError::Timeout(timeout.as_millis() as u64)),
    }
}

async fn open_connection(url: &DatabaseUrl, timeout: Duration) -> Result<PgConnection, DatabaseError> {
    let options = PgConnectOptions::from_str(url.expose())
        .map_err(|e| DatabaseError::Connection(sanitize_message(&e.to_string())))?;
    match tokio::time::timeout(timeout, PgConnection::connect_with(&options)).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(DatabaseError::Connection(sanitize_message(&e.to_string()))),
        Err(_) => Err(DatabaseError::Timeout(timeout.as_millis() as u64)),
    }
}

async fn close_quietly(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        tracing::debug!(error = %sanitize_message(&e.to_string()), "Error closing target connection");
    }
}

pub struct PgDatabaseProvider {
    timeout: Duration,
    schema_version_table: String,
}

impl PgDatabaseProvider {
    pub fn new(timeout: Duration, schema_version_table: impl Into<String>) -> Self {
        Self {
            timeout,
            schema_version_table: schema_version_table.into(),
        }
    }
}

impl DatabaseProvider for PgDatabaseProvider {
    fn connect(&self, url: &DatabaseUrl) -> Arc<dyn TargetDatabase> {
        Arc::new(PgTargetDatabase {
            url: url.clone(),
            timeout: self.timeout,
            version_table: self.schema_version_table.clone(),
        })
    }
}

pub struct PgTargetDatabase {
    url: DatabaseUrl,
    timeout: Duration,
    version_table: String,
}

impl PgTargetDatabase {
    async fn table_exists(&self, conn: &mut PgConnection) -> Result<bool, DatabaseError> {
        bounded(
            self.timeout,
            sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
                .bind(&self.version_table)
                .fetch_one(&mut *conn),
        )
        .await
    }

    fn constraint_name(&self) -> String {
        let base = self.version_table.rsplit('.').next().unwrap_or(&self.version_table);
        quote_identifier(&format!("{}_pkc", base))
    }
}

#[async_trait]
impl TargetDatabase for PgTargetDatabase {
    async fn open_lock_session(&self) -> Result<Box<dyn LockSession>, DatabaseError> {
        let conn = open_connection(&self.url, self.timeout).await?;
        Ok(Box::new(PgLockSession {
            conn,
            timeout: self.timeout,
        }))
    }

    async fn blocked_queries(&self, blocking_pid: i32) -> Result<Vec<BlockedQuery>, DatabaseError> {
        let mut conn = open_connection(&self.url, self.timeout).await?;
        let rows = bounded(
            self.timeout,
            sqlx::query_as::<_, (i32, Option<String>, Option<String>, Option<String>)>(
                r#"
                SELECT pid, usename::text, query, state
                FROM pg_catalog.pg_stat_activity
                WHERE $1 = ANY(pg_catalog.pg_blocking_pids(pid))
                ORDER BY pid
                "#,
            )
            .bind(blocking_pid)
            .fetch_all(&mut conn),
        )
        .await;
        close_quietly(conn).await;

        Ok(rows?
            .into_iter()
            .map(|(pid, usename, query, state)| BlockedQuery {
                pid,
                usename,
                query,
                state,
            })
            .collect())
    }

    async fn terminate_backend(&self, pid: i32) -> Result<bool, DatabaseError> {
        let mut conn = open_connection(&self.url, self.timeout).await?;
        let terminated = bounded(
            self.timeout,
            sqlx::query_scalar::<_, bool>("SELECT pg_terminate_backend($1)")
                .bind(pid)
                .fetch_one(&mut conn),
        )
        .await;
        close_quietly(conn).await;
        terminated
    }

    async fn try_advisory_lock(&self, lock_id: i64) -> Result<bool, DatabaseError> {
        let mut conn = open_connection(&self.url, self.timeout).await?;
        let result = async {
            let acquired = bounded(
                self.timeout,
                sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
                    .bind(lock_id)
                    .fetch_one(&mut conn),
            )
            .await?;
            if acquired {
                bounded(
                    self.timeout,
                    sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
                        .bind(lock_id)
                        .fetch_one(&mut conn),
                )
                .await?;
            }
            Ok(acquired)
        }
        .await;
        close_quietly(conn).await;
        result
    }

    async fn read_schema_version(&self) -> Result<Option<String>, DatabaseError> {
        let mut conn = open_connection(&self.url, self.timeout).await?;
        let result = async {
            if !self.table_exists(&mut conn).await? {
                return Ok(None);
            }
            let sql = format!(
                "SELECT version_num FROM {} LIMIT 1",
                quote_identifier(&self.version_table)
            );
            bounded(
                self.timeout,
                sqlx::query_scalar::<_, String>(&sql).fetch_optional(&mut conn),
            )
            .await
        }
        .await;
        close_quietly(conn).await;
        result
    }

    async fn write_schema_version(&self, version: Option<&str>) -> Result<(), DatabaseError> {
        let mut conn = open_connection(&self.url, self.timeout).await?;
        let table = quote_identifier(&self.version_table);
        let result = async {
            match version {
                Some(version) => {
                    let create = format!(
                        "CREATE TABLE IF NOT EXISTS {} (version_num VARCHAR(32) NOT NULL, CONSTRAINT {} PRIMARY KEY (version_num))",
                        table,
                        self.constraint_name()
                    );
                    bounded(self.timeout, sqlx::query(&create).execute(&mut conn)).await?;

                    let delete = format!("DELETE FROM {}", table);
                    let insert = format!("INSERT INTO {} (version_num) VALUES ($1)", table);
                    let mut tx = bounded(self.timeout, conn.begin()).await?;
                    bounded(self.timeout, sqlx::query(&delete).execute(&mut *tx)).await?;
                    bounded(
                        self.timeout,
                        sqlx::query(&insert).bind(version).execute(&mut *tx),
                    )
                    .await?;
                    bounded(self.timeout, tx.commit()).await
                }
                None => {
                    if self.table_exists(&mut conn).await? {
                        let delete = format!("DELETE FROM {}", table);
                        bounded(self.timeout, sqlx::query(&delete).execute(&mut conn)).await?;
                    }
                    Ok(())
                }
            }
        }
        .await;
        close_quietly(conn).await;
        result
    }
}

/// A dedicated connection holding one explicit transaction.
pub struct PgLockSession {
    conn: PgConnection,
    timeout: Duration,
}

#[async_trait]
impl LockSession for PgLockSession {
    async fn backend_pid(&mut self) -> Result<i32, DatabaseError> {
        bounded(
            self.timeout,
            sqlx::query_scalar::<_, i32>("SELECT pg_backend_pid()").fetch_one(&mut self.conn),
        )
        .await
    }

    async fn begin(&mut self) -> Result<(), DatabaseError> {
        bounded(self.timeout, sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql("BEGIN"))).await?;
        Ok(())
    }

    async fn acquire(&mut self, target: &LockTarget) -> Result<LockAcquisition, DatabaseError> {
        match target {
            LockTarget::Table { table } => {
                let sql = format!("LOCK TABLE {} IN ACCESS EXCLUSIVE MODE", quote_identifier(table));
                bounded(self.timeout, sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(&sql))).await?;
                Ok(LockAcquisition { rows_locked: None })
            }
            LockTarget::Rows { table, count } => {
                let sql = format!("SELECT 1 FROM {} LIMIT $1 FOR UPDATE", quote_identifier(table));
                let rows = bounded(
                    self.timeout,
                    sqlx::query(&sql).bind(i64::from(*count)).fetch_all(&mut self.conn),
                )
                .await?;
                Ok(LockAcquisition {
                    rows_locked: Some(rows.len() as u64),
                })
            }
            LockTarget::Advisory { lock_id } => {
                bounded(
                    self.timeout,
                    sqlx::query("SELECT pg_advisory_lock($1)")
                        .bind(*lock_id)
                        .execute(&mut self.conn),
                )
                .await?;
                Ok(LockAcquisition { rows_locked: None })
            }
        }
    }

    async fn release(&mut self, target: &LockTarget, commit: bool) -> Result<(), DatabaseError> {
        if let LockTarget::Advisory { lock_id } = target {
            bounded(
                self.timeout,
                sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
                    .bind(*lock_id)
                    .fetch_one(&mut self.conn),
            )
            .await?;
        }
        let end = if commit { "COMMIT" } else { "ROLLBACK" };
        bounded(self.timeout, sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(end))).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DatabaseError> {
        let timeout = self.timeout;
        bounded(timeout, self.conn.close()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("items"), "\"items\"");
        assert_eq!(quote_identifier("public.items"), "\"public\".\"items\"");
    }

    #[test]
    fn test_constraint_name_uses_table_part() {
        let db = PgTargetDatabase {
            url: DatabaseUrl::new("postgres://localhost/target").unwrap(),
            timeout: Duration::from_secs(1),
            version_table: "public.alembic_version".to_string(),
        };
        assert_eq!(db.constraint_name(), "\"alembic_version_pkc\"");
    }
}
