/// Stored-procedure gateway
///
/// Every business operation in StockWatch is a named procedure. The gateway
/// runs `CALL name(?, ?, ...)` with parameters bound in the order they were
/// added, inside a transaction that commits on success and rolls back on any
/// failure. There is no retry: callers decide whether to surface an error or
/// fall back to another procedure.
///
/// Handlers depend on the [`ProcedureGateway`] trait rather than on MySQL so
/// tests can substitute an in-memory implementation.
///
/// # Example
///
/// ```no_run
/// use stockwatch_shared::db::gateway::{MySqlGateway, ProcParams, ProcedureGateway};
/// use sqlx::MySqlPool;
///
/// # async fn example(pool: MySqlPool) -> Result<(), Box<dyn std::error::Error>> {
/// let gateway = MySqlGateway::new(pool);
/// let rows = gateway
///     .call(
///         "delete_user_product",
///         ProcParams::new().with("p_user_id", 42i64).with("p_product_id", 7i64),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```

use super::row::{ProcRow, Scalar};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sqlx::{
    mysql::{MySqlArguments, MySqlRow},
    query::Query,
    Column, MySql, MySqlPool, Row, TypeInfo,
};
use tracing::{debug, warn};

/// Error type for procedure calls
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The driver or server reported a failure
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// The procedure name contains characters that cannot be spliced into SQL
    #[error("Invalid procedure name: {0}")]
    InvalidProcedure(String),

    /// Anything raised by a non-MySQL gateway
    #[error("Gateway error: {0}")]
    Other(String),
}

/// Ordered keyword parameters for a procedure call
///
/// Names document intent and let fakes inspect calls; values are bound
/// positionally in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcParams(Vec<(&'static str, Scalar)>);

impl ProcParams {
    /// Creates an empty parameter list
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a parameter
    pub fn with(mut self, name: &'static str, value: impl Into<Scalar>) -> Self {
        self.0.push((name, value.into()));
        self
    }

    /// Looks up a parameter by name
    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.0.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Iterates parameters in binding order
    pub fn iter(&self) -> impl Iterator<Item = &(&'static str, Scalar)> {
        self.0.iter()
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no parameters
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Executes named stored procedures
#[async_trait]
pub trait ProcedureGateway: Send + Sync {
    /// Calls `name` with `params` and returns every result row
    async fn call(&self, name: &str, params: ProcParams) -> Result<Vec<ProcRow>, DbError>;

    /// Checks connectivity
    async fn ping(&self) -> Result<(), DbError>;
}

/// MySQL-backed gateway
#[derive(Clone)]
pub struct MySqlGateway {
    pool: MySqlPool,
}

impl MySqlGateway {
    /// Wraps a connection pool
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Underlying pool
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Runs an arbitrary query and decodes its rows
    ///
    /// Business routes never use this; it exists for diagnostics and
    /// maintenance queries.
    pub async fn fetch_all(&self, sql: &str, params: &[Scalar]) -> Result<Vec<ProcRow>, DbError> {
        let query = params.iter().fold(sqlx::query(sql), bind_scalar);
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    /// Runs an arbitrary statement and returns the affected row count
    pub async fn execute(&self, sql: &str, params: &[Scalar]) -> Result<u64, DbError> {
        let query = params.iter().fold(sqlx::query(sql), bind_scalar);
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ProcedureGateway for MySqlGateway {
    async fn call(&self, name: &str, params: ProcParams) -> Result<Vec<ProcRow>, DbError> {
        let sql = call_statement(name, params.len())?;
        debug!(procedure = name, params = params.len(), "Calling procedure");

        let mut tx = self.pool.begin().await?;

        let query = params
            .iter()
            .map(|(_, value)| value)
            .fold(sqlx::query(&sql), bind_scalar);

        let result = query.fetch_all(&mut *tx).await;

        match result {
            Ok(rows) => {
                tx.commit().await?;
                rows.iter().map(decode_row).collect()
            }
            Err(err) => {
                warn!(procedure = name, error = %err, "Procedure failed, rolling back");
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(procedure = name, error = %rollback_err, "Rollback failed");
                }
                Err(err.into())
            }
        }
    }

    async fn ping(&self) -> Result<(), DbError> {
        super::pool::health_check(&self.pool).await?;
        Ok(())
    }
}

/// Builds `CALL name(?, ?, ...)` for `arity` parameters
///
/// Only ASCII letters, digits and underscores are accepted in `name`.
pub fn call_statement(name: &str, arity: usize) -> Result<String, DbError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid {
        return Err(DbError::InvalidProcedure(name.to_string()));
    }

    let placeholders = vec!["?"; arity].join(", ");
    Ok(format!("CALL {}({})", name, placeholders))
}

fn bind_scalar<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &Scalar,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Scalar::Null => query.bind(None::<String>),
        Scalar::Bool(b) => query.bind(*b),
        Scalar::Int(i) => query.bind(*i),
        Scalar::Float(f) => query.bind(*f),
        Scalar::Text(s) => query.bind(s.clone()),
        Scalar::DateTime(dt) => query.bind(*dt),
    }
}

fn decode_row(row: &MySqlRow) -> Result<ProcRow, DbError> {
    let values = row
        .columns()
        .iter()
        .map(|column| decode_column(row, column.ordinal(), column.type_info().name()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ProcRow::new(values))
}

fn decode_column(row: &MySqlRow, index: usize, type_name: &str) -> Result<Scalar, sqlx::Error> {
    let scalar = match type_name {
        "NULL" => Scalar::Null,
        "BOOLEAN" => row.try_get::<Option<bool>, _>(index)?.into(),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<Option<i64>, _>(index)?.into()
        }
        name if name.ends_with("UNSIGNED") => match row.try_get::<Option<u64>, _>(index)? {
            Some(v) => i64::try_from(v).map_or(Scalar::Float(v as f64), Scalar::Int),
            None => Scalar::Null,
        },
        "DECIMAL" => row
            .try_get::<Option<Decimal>, _>(index)?
            .and_then(|d| d.to_f64())
            .into(),
        "FLOAT" => row
            .try_get::<Option<f32>, _>(index)?
            .map(f64::from)
            .into(),
        "DOUBLE" => row.try_get::<Option<f64>, _>(index)?.into(),
        "DATETIME" | "TIMESTAMP" => row.try_get::<Option<NaiveDateTime>, _>(index)?.into(),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)?
            .map(|d| d.format("%Y-%m-%d").to_string())
            .into(),
        _ => match row.try_get::<Option<String>, _>(index) {
            Ok(text) => text.into(),
            Err(_) => row
                .try_get_unchecked::<Option<Vec<u8>>, _>(index)?
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .into(),
        },
    };

    Ok(scalar)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_statement_placeholders() {
        assert_eq!(call_statement("get_all_donations", 0).unwrap(), "CALL get_all_donations()");
        assert_eq!(
            call_statement("delete_user_product", 2).unwrap(),
            "CALL delete_user_product(?, ?)"
        );
    }

    #[test]
    fn test_call_statement_rejects_injection() {
        assert!(call_statement("x(); DROP TABLE users; --", 0).is_err());
        assert!(call_statement("", 0).is_err());
    }

    #[test]
    fn test_params_keep_order() {
        let params = ProcParams::new()
            .with("p_user_id", 1i64)
            .with("p_email", "a@b.co")
            .with("p_flag", None::<bool>);

        let names: Vec<_> = params.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["p_user_id", "p_email", "p_flag"]);
        assert_eq!(params.get("p_flag"), Some(&Scalar::Null));
        assert_eq!(params.len(), 3);
    }
}
