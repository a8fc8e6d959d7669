//! Connection pool over the embedded analytical database endpoints dispatch
//! SQL against.
//!
//! `sqlx`'s `SqlitePool`/`PgPool` already give acquire/execute/drain
//! semantics for both backends this gateway supports, the same crate used
//! elsewhere in this codebase for `TokenStore` persistence, so this module
//! is a thin named-parameter-binding layer over it rather than a new
//! database engine.
//!
//! Named-parameter substitution (`$name` → a backend placeholder, values
//! bound positionally) is the only supported binding; nothing here ever
//! builds SQL by formatting caller-supplied values into the query text, so
//! a parameter value can never change the shape of the executed statement.

use crate::error::{GatewayError, Result};
use crate::model::NamedParam;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::sqlite::{SqliteArguments, SqlitePoolOptions};
use sqlx::{Arguments, Column, PgPool, Row, SqlitePool, TypeInfo, ValueRef};
use std::time::Duration;

static PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").unwrap());

enum Pool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

/// A pooled connection handle over the embedded database.
///
/// Modeled as a cheap pool reference rather than a checked-out connection
/// object: `sqlx` pools already serialize acquisition internally, so
/// acquire/return collapse into "use the pool", and draining maps directly
/// to `Pool::close()`.
pub struct SqlEngine {
    pool: Pool,
    read_only: bool,
}

impl SqlEngine {
    /// Opens a fresh pool for one `ReloadGeneration`. `min_pool_size` is
    /// enforced to be at least 2 by `Config::validate`, so a single slow
    /// query can never starve every other connection in the pool.
    pub async fn connect(driver: &str, dsn: &str, min_pool_size: u32, read_only: bool) -> Result<Self> {
        let pool = match driver {
            crate::constants::STORAGE_DRIVER_SQLITE => {
                let pool = SqlitePoolOptions::new()
                    .min_connections(min_pool_size)
                    .connect(dsn)
                    .await
                    .map_err(|e| GatewayError::config(format!("opening sqlite sql engine pool: {e}")))?;
                Pool::Sqlite(pool)
            }
            crate::constants::STORAGE_DRIVER_POSTGRES => {
                let pool = PgPoolOptions::new()
                    .min_connections(min_pool_size)
                    .connect(dsn)
                    .await
                    .map_err(|e| GatewayError::config(format!("opening postgres sql engine pool: {e}")))?;
                Pool::Postgres(pool)
            }
            other => {
                return Err(GatewayError::config(format!(
                    "unsupported sql engine driver '{other}'; supported: sqlite, postgres"
                )));
            }
        };
        Ok(Self { pool, read_only })
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Runs one statement with named parameters, bounded by `timeout`.
    /// Returns every row as a JSON object keyed by column name; the caller
    /// decides whether a single-row single-column result collapses to a
    /// scalar.
    pub async fn execute(&self, sql: &str, params: &[NamedParam], timeout: Duration) -> Result<Vec<Value>> {
        let fut = match &self.pool {
            Pool::Sqlite(pool) => execute_sqlite(pool, sql, params),
            Pool::Postgres(pool) => execute_postgres(pool, sql, params),
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| GatewayError::Timeout(format!("sql execution exceeded {:?}", timeout)))?
    }

    /// Refuses new acquisitions, waits for outstanding connections to be
    /// returned, then closes the pool.
    pub async fn drain(&self) {
        match &self.pool {
            Pool::Sqlite(pool) => pool.close().await,
            Pool::Postgres(pool) => pool.close().await,
        }
    }
}

/// Rewrite `$name` tokens into positional placeholders, returning the
/// rewritten SQL and the ordered parameter values to bind. Every `$name`
/// referenced in `sql` must exist in `params`, or binding fails closed
/// rather than silently sending a null.
fn positional_values(sql: &str, params: &[NamedParam], make_placeholder: impl Fn(usize) -> String) -> Result<(String, Vec<Value>)> {
    let mut values = Vec::new();
    let mut err = None;
    let rewritten = PARAM_RE.replace_all(sql, |caps: &regex::Captures| {
        let name = &caps[1];
        match params.iter().find(|p| p.name == name) {
            Some(p) => {
                values.push(p.value.clone());
                make_placeholder(values.len())
            }
            None => {
                err.get_or_insert_with(|| {
                    GatewayError::execution(format!("sql references undeclared parameter '${name}'"))
                });
                String::new()
            }
        }
    });
    if let Some(e) = err {
        return Err(e);
    }
    Ok((rewritten.into_owned(), values))
}

async fn execute_sqlite(pool: &SqlitePool, sql: &str, params: &[NamedParam]) -> Result<Vec<Value>> {
    let (rewritten, values) = positional_values(sql, params, |_| "?".to_string())?;
    let mut args = SqliteArguments::default();
    for value in &values {
        bind_sqlite(&mut args, value)?;
    }
    let rows = sqlx::query_with(&rewritten, args)
        .fetch_all(pool)
        .await
        .map_err(|e| GatewayError::execution(format!("sql execution failed: {e}")))?;
    rows.iter().map(sqlite_row_to_json).collect()
}

async fn execute_postgres(pool: &PgPool, sql: &str, params: &[NamedParam]) -> Result<Vec<Value>> {
    let (rewritten, values) = positional_values(sql, params, |i| format!("${i}"))?;
    let mut args = PgArguments::default();
    for value in &values {
        bind_postgres(&mut args, value)?;
    }
    let rows = sqlx::query_with(&rewritten, args)
        .fetch_all(pool)
        .await
        .map_err(|e| GatewayError::execution(format!("sql execution failed: {e}")))?;
    rows.iter().map(postgres_row_to_json).collect()
}

fn bind_sqlite(args: &mut SqliteArguments<'_>, value: &Value) -> Result<()> {
    let result = match value {
        Value::Null => args.add(None::<String>),
        Value::Bool(b) => args.add(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                args.add(i)
            } else {
                args.add(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => args.add(s.clone()),
        other => args.add(other.to_string()),
    };
    result.map_err(|e| GatewayError::execution(format!("failed to bind sql parameter: {e}")))
}

fn bind_postgres(args: &mut PgArguments, value: &Value) -> Result<()> {
    let result = match value {
        Value::Null => args.add(None::<String>),
        Value::Bool(b) => args.add(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                args.add(i)
            } else {
                args.add(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => args.add(s.clone()),
        other => args.add(other.to_string()),
    };
    result.map_err(|e| GatewayError::execution(format!("failed to bind sql parameter: {e}")))
}

fn sqlite_row_to_json(row: &sqlx::sqlite::SqliteRow) -> Result<Value> {
    let mut object = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row
            .try_get_raw(idx)
            .map_err(|e| GatewayError::execution(format!("reading column '{}': {e}", column.name())))?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match column.type_info().name() {
                "INTEGER" | "BIGINT" | "BOOLEAN" => {
                    if let Ok(v) = row.try_get::<i64, _>(idx) {
                        Value::from(v)
                    } else if let Ok(v) = row.try_get::<bool, _>(idx) {
                        Value::from(v)
                    } else {
                        Value::Null
                    }
                }
                "REAL" | "FLOAT" | "DOUBLE" => row.try_get::<f64, _>(idx).map(Value::from).unwrap_or(Value::Null),
                "BLOB" => row
                    .try_get::<Vec<u8>, _>(idx)
                    .map(|b| Value::String(String::from_utf8_lossy(&b).into_owned()))
                    .unwrap_or(Value::Null),
                _ => row.try_get::<String, _>(idx).map(Value::String).unwrap_or(Value::Null),
            }
        };
        object.insert(column.name().to_string(), value);
    }
    Ok(Value::Object(object))
}

fn postgres_row_to_json(row: &sqlx::postgres::PgRow) -> Result<Value> {
    let mut object = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let raw = row
            .try_get_raw(idx)
            .map_err(|e| GatewayError::execution(format!("reading column '{}': {e}", column.name())))?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match column.type_info().name() {
                "INT2" | "INT4" | "INT8" => row.try_get::<i64, _>(idx).map(Value::from).unwrap_or(Value::Null),
                "FLOAT4" | "FLOAT8" | "NUMERIC" => row.try_get::<f64, _>(idx).map(Value::from).unwrap_or(Value::Null),
                "BOOL" => row.try_get::<bool, _>(idx).map(Value::from).unwrap_or(Value::Null),
                "JSON" | "JSONB" => row.try_get::<Value, _>(idx).unwrap_or(Value::Null),
                _ => row.try_get::<String, _>(idx).map(Value::String).unwrap_or(Value::Null),
            }
        };
        object.insert(column.name().to_string(), value);
    }
    Ok(Value::Object(object))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_named_params_in_declaration_order() {
        let params = vec![
            NamedParam {
                name: "price".to_string(),
                value: Value::from(100),
            },
            NamedParam {
                name: "discount_percent".to_string(),
                value: Value::from(10),
            },
        ];
        let (sql, values) = positional_values(
            "SELECT $price * (1 - $discount_percent / 100.0) AS result",
            &params,
            |_| "?".to_string(),
        )
        .unwrap();
        assert_eq!(sql, "SELECT ? * (1 - ? / 100.0) AS result");
        assert_eq!(values, vec![Value::from(100), Value::from(10)]);
    }

    #[test]
    fn undeclared_parameter_fails_closed() {
        let err = positional_values("SELECT $missing", &[], |_| "?".to_string());
        assert!(err.is_err());
    }
}
