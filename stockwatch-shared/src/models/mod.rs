/// Per-resource procedure wrappers and row decoders
///
/// Each module names the procedures it calls, binds their parameters and
/// decodes the positional rows they return into named structures, so route
/// handlers never deal with column offsets.
///
/// # Models
///
/// - `user`: accounts, login lookups, password-reset tokens
/// - `product`: tracked products and the dashboard overview
/// - `settings`: per-user notification and display preferences
/// - `subscription`: plans, limits and subscription bookkeeping
/// - `donation`: donation records
///
/// # Example
///
/// ```no_run
/// use stockwatch_shared::db::gateway::MySqlGateway;
/// use stockwatch_shared::db::pool::{create_pool, DatabaseConfig};
/// use stockwatch_shared::models::product::{self, ProductListing};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gateway = MySqlGateway::new(create_pool(DatabaseConfig::default()).await?);
/// if let ProductListing::Products(products) = product::list_for_user(&gateway, 42).await? {
///     println!("{} products", products.len());
/// }
/// # Ok(())
/// # }
/// ```

pub mod donation;
pub mod product;
pub mod settings;
pub mod subscription;
pub mod user;

use crate::db::{
    gateway::DbError,
    row::{DecodeError, ProcRow},
};

/// Failure while calling or decoding a procedure
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The call itself failed (and was rolled back)
    #[error(transparent)]
    Db(#[from] DbError),

    /// A row required for the response could not be decoded
    #[error("Unexpected procedure result: {0}")]
    Decode(#[from] DecodeError),
}

/// Result alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// First row wider than `min_columns` that decodes
///
/// Rows that fail to decode are logged and skipped, like product rows.
pub(crate) fn first_decodable<T>(
    rows: &[ProcRow],
    min_columns: usize,
    what: &str,
    decode: impl Fn(&ProcRow) -> Result<T, DecodeError>,
) -> Option<T> {
    rows.iter()
        .enumerate()
        .filter(|(_, row)| row.len() > min_columns)
        .find_map(|(index, row)| match decode(row) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(row = index, what, error = %e, "Skipping undecodable row");
                None
            }
        })
}
