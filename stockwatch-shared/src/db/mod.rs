/// Database layer for StockWatch
///
/// All business state lives behind named stored procedures. This module
/// provides the pieces needed to reach them.
///
/// # Modules
///
/// - `pool`: MySQL connection pool management with health checks
/// - `gateway`: Executes `CALL name(...)` inside a transaction
/// - `row`: Positional result rows and the coercions decoders rely on
///
/// # Example
///
/// ```no_run
/// use stockwatch_shared::db::gateway::{MySqlGateway, ProcParams, ProcedureGateway};
/// use stockwatch_shared::db::pool::{create_pool, DatabaseConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DatabaseConfig {
///         url: std::env::var("DATABASE_URL")?,
///         ..Default::default()
///     };
///
///     let gateway = MySqlGateway::new(create_pool(config).await?);
///     let rows = gateway
///         .call("get_user_by_id", ProcParams::new().with("p_user_id", 42i64))
///         .await?;
///     println!("{} rows", rows.len());
///     Ok(())
/// }
/// ```

pub mod gateway;
pub mod pool;
pub mod row;
