/// Tracked products
///
/// Product listings come from `get_user_products_with_data`, falling back to
/// the older `get_user_products` when the newer procedure is unavailable.
/// Neither result is self-describing, so every row is first classified into
/// a [`ProductLayout`] by its length and leading value and then decoded
/// positionally:
///
/// | Layout | Selected when | id | status | created_at |
/// |---|---|---|---|---|
/// | `Enhanced` | first value is `"success"` and at least 16 columns | 2 | 11 | 15 |
/// | `Alternate` | otherwise, at least 14 columns | 0 | 8 | 12 |
/// | `Legacy` | otherwise, at least 11 columns | 0 | 7 | 11 |
///
/// Shorter rows (including the `("success", "Products retrieved
/// successfully")` marker) carry no product. A row that cannot be decoded is
/// logged and skipped; the rest of the listing is still returned.
///
/// # Example
///
/// ```
/// use stockwatch_shared::db::row::{ProcRow, Scalar};
/// use stockwatch_shared::models::product::{decode_products, ProductLayout};
///
/// let mut values = vec![Scalar::from("success"), Scalar::from("ok"), Scalar::Int(7)];
/// values.extend(std::iter::repeat(Scalar::Null).take(13));
/// let row = ProcRow::new(values);
///
/// assert_eq!(ProductLayout::classify(&row), Some(ProductLayout::Enhanced));
/// assert_eq!(decode_products(&[row])[0].id, 7);
/// ```

use serde::{Serialize, Serializer};
use url::Url;

use super::ModelResult;
use crate::db::{
    gateway::{ProcParams, ProcedureGateway},
    row::{leading_error, DecodeError, ProcOutcome, ProcRow},
};

/// Accepted Discord webhook prefixes
pub const DISCORD_WEBHOOK_PREFIXES: [&str; 2] = [
    "https://discord.com/api/webhooks/",
    "https://discordapp.com/api/webhooks/",
];

/// Number of products shown in the dashboard's recent activity
pub const RECENT_ACTIVITY_LIMIT: usize = 5;

/// Fixed "money saved" figure shown on the dashboard
pub const MONEY_SAVED_PLACEHOLDER: f64 = 25.50;

/// Positional schema of a product row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductLayout {
    /// `get_user_products_with_data`: status prefix, webhook and SMS columns
    Enhanced,

    /// Wide rows without the status prefix
    Alternate,

    /// `get_user_products`
    Legacy,
}

impl ProductLayout {
    /// Picks the layout for `row`, `None` when it carries no product
    pub fn classify(row: &ProcRow) -> Option<Self> {
        match row.len() {
            n if n >= 16 && row.is_success() => Some(Self::Enhanced),
            n if n >= 14 => Some(Self::Alternate),
            n if n >= 11 => Some(Self::Legacy),
            _ => None,
        }
    }
}

/// Tracking status as reported by the price checker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductStatus {
    Checking,
    InStock,
    OutOfStock,
    Error,
    /// Any value the checker writes that is not one of the above
    Other(String),
}

impl ProductStatus {
    /// Wire representation
    pub fn as_str(&self) -> &str {
        match self {
            ProductStatus::Checking => "checking",
            ProductStatus::InStock => "in-stock",
            ProductStatus::OutOfStock => "out-of-stock",
            ProductStatus::Error => "error",
            ProductStatus::Other(value) => value,
        }
    }
}

impl From<&str> for ProductStatus {
    fn from(value: &str) -> Self {
        match value {
            "checking" => ProductStatus::Checking,
            "in-stock" => ProductStatus::InStock,
            "out-of-stock" => ProductStatus::OutOfStock,
            "error" => ProductStatus::Error,
            other => ProductStatus::Other(other.to_string()),
        }
    }
}

impl Serialize for ProductStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A product as returned to the dashboard
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedProduct {
    pub id: i64,
    pub url: Option<String>,
    pub title: Option<String>,
    pub store: Option<String>,
    pub current_price: Option<f64>,
    pub min_price_alert: Option<f64>,
    pub max_price_alert: Option<f64>,
    pub discord_webhook_url: String,
    pub alerts_sent: i64,
    pub status: Option<ProductStatus>,
    pub last_checked_at: Option<String>,
    pub last_price_change: Option<String>,

    /// Only the enhanced layout carries this column
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sms_notifications_enabled: Option<bool>,

    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub price_history_count: i64,
}

impl TrackedProduct {
    /// Decodes `row` according to `layout`
    pub fn decode(row: &ProcRow, layout: ProductLayout) -> Result<Self, DecodeError> {
        match layout {
            ProductLayout::Enhanced => Ok(Self {
                id: required_int(row, 2)?,
                url: row.text(3)?,
                title: row.text(4)?,
                store: row.text(5)?,
                current_price: row.price(6)?,
                min_price_alert: row.price(7)?,
                max_price_alert: row.price(8)?,
                discord_webhook_url: row.text_or(9, "")?,
                alerts_sent: row.int_or(10, 0)?,
                status: status_at(row, 11)?,
                last_checked_at: row.timestamp(12)?,
                last_price_change: row.timestamp(13)?,
                sms_notifications_enabled: Some(row.flag(14, false)?),
                created_at: row.timestamp(15)?,
                updated_at: optional(row, 16, ProcRow::timestamp)?.flatten(),
                price_history_count: optional(row, 17, |r, i| r.int_or(i, 0))?.unwrap_or(0),
            }),
            ProductLayout::Alternate => Ok(Self {
                id: required_int(row, 0)?,
                url: row.text(1)?,
                title: row.text(2)?,
                store: row.text(3)?,
                current_price: row.price(4)?,
                min_price_alert: row.price(5)?,
                max_price_alert: row.price(6)?,
                discord_webhook_url: row.text_or(7, "")?,
                status: status_at(row, 8)?,
                last_checked_at: row.timestamp(9)?,
                last_price_change: row.timestamp(10)?,
                alerts_sent: row.int_or(11, 0)?,
                sms_notifications_enabled: None,
                created_at: row.timestamp(12)?,
                updated_at: row.timestamp(13)?,
                price_history_count: optional(row, 14, |r, i| r.int_or(i, 0))?.unwrap_or(0),
            }),
            ProductLayout::Legacy => Ok(Self {
                id: required_int(row, 0)?,
                url: row.text(1)?,
                title: row.text(2)?,
                store: row.text(3)?,
                current_price: row.price(4)?,
                min_price_alert: row.price(5)?,
                max_price_alert: row.price(6)?,
                discord_webhook_url: String::new(),
                status: status_at(row, 7)?,
                last_checked_at: row.timestamp(8)?,
                last_price_change: row.timestamp(9)?,
                alerts_sent: row.int_or(10, 0)?,
                sms_notifications_enabled: None,
                created_at: optional(row, 11, ProcRow::timestamp)?.flatten(),
                updated_at: optional(row, 12, ProcRow::timestamp)?.flatten(),
                price_history_count: optional(row, 13, |r, i| r.int_or(i, 0))?.unwrap_or(0),
            }),
        }
    }

    /// Whether the checker last saw the product in stock
    pub fn is_in_stock(&self) -> bool {
        self.status == Some(ProductStatus::InStock)
    }
}

/// Decodes every product row, skipping rows that fail
pub fn decode_products(rows: &[ProcRow]) -> Vec<TrackedProduct> {
    rows.iter()
        .enumerate()
        .filter_map(|(index, row)| {
            let layout = ProductLayout::classify(row)?;
            match TrackedProduct::decode(row, layout) {
                Ok(product) => Some(product),
                Err(e) => {
                    tracing::warn!(row = index, ?layout, error = %e, "Skipping undecodable product row");
                    None
                }
            }
        })
        .collect()
}

/// Result of a product listing
#[derive(Debug, Clone, PartialEq)]
pub enum ProductListing {
    /// Decoded products (possibly empty)
    Products(Vec<TrackedProduct>),

    /// The procedure led with an `("error", message)` row
    Rejected(String),
}

/// Lists a user's products
///
/// When both procedures fail the listing is empty; the failures are logged.
pub async fn list_for_user(
    gateway: &dyn ProcedureGateway,
    user_id: i64,
) -> ModelResult<ProductListing> {
    let rows = match fetch_product_rows(gateway, user_id).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(user_id, error = %e, "Both product procedures failed");
            Vec::new()
        }
    };

    if let Some(message) = leading_error(&rows) {
        return Ok(ProductListing::Rejected(message));
    }

    Ok(ProductListing::Products(decode_products(&rows)))
}

/// Fetches raw product rows, falling back to the legacy procedure
pub async fn fetch_product_rows(
    gateway: &dyn ProcedureGateway,
    user_id: i64,
) -> ModelResult<Vec<ProcRow>> {
    let params = ProcParams::new().with("p_user_id", user_id);

    match gateway
        .call("get_user_products_with_data", params.clone())
        .await
    {
        Ok(rows) => Ok(rows),
        Err(e) => {
            tracing::warn!(user_id, error = %e, "get_user_products_with_data failed, using get_user_products");
            Ok(gateway.call("get_user_products", params).await?)
        }
    }
}

/// Input for adding a product
#[derive(Debug, Clone)]
pub struct NewProduct<'a> {
    pub url: &'a str,
    pub title: &'a str,
    pub discord_webhook_url: Option<&'a str>,
    pub sms_notifications_enabled: bool,
}

/// Result of an add-product call
#[derive(Debug, Clone, PartialEq)]
pub struct AddedProduct {
    pub outcome: ProcOutcome,
    pub product_id: Option<i64>,
}

/// Adds a product, falling back to `add_user_product` when the webhook-aware
/// procedure fails
pub async fn add(
    gateway: &dyn ProcedureGateway,
    user_id: i64,
    product: NewProduct<'_>,
) -> ModelResult<Option<AddedProduct>> {
    let enhanced = gateway
        .call(
            "add_user_product_with_webhook",
            ProcParams::new()
                .with("p_user_id", user_id)
                .with("p_product_url", product.url)
                .with("p_product_title", product.title)
                .with("p_discord_webhook_url", product.discord_webhook_url)
                .with("p_sms_notifications_enabled", product.sms_notifications_enabled),
        )
        .await;

    let rows = match enhanced {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(user_id, error = %e, "add_user_product_with_webhook failed, using add_user_product");
            gateway
                .call(
                    "add_user_product",
                    ProcParams::new()
                        .with("p_user_id", user_id)
                        .with("p_product_url", product.url)
                        .with("p_product_title", product.title),
                )
                .await?
        }
    };

    let Some(outcome) = ProcOutcome::from_rows(&rows) else {
        return Ok(None);
    };

    let product_id = rows
        .first()
        .filter(|row| row.len() > 2)
        .and_then(|row| row.int(2).ok().flatten());

    Ok(Some(AddedProduct {
        outcome,
        product_id,
    }))
}

/// Alert and notification changes for a product
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductUpdate<'a> {
    pub min_price_alert: Option<f64>,
    pub max_price_alert: Option<f64>,
    pub discord_webhook_url: Option<&'a str>,
    pub sms_notifications_enabled: Option<bool>,
}

/// Updates a product, falling back to `update_user_product`
pub async fn update(
    gateway: &dyn ProcedureGateway,
    user_id: i64,
    product_id: i64,
    changes: ProductUpdate<'_>,
) -> ModelResult<Option<ProcOutcome>> {
    let enhanced = gateway
        .call(
            "update_user_product_with_webhook",
            ProcParams::new()
                .with("p_user_id", user_id)
                .with("p_product_id", product_id)
                .with("p_min_price_alert", changes.min_price_alert)
                .with("p_max_price_alert", changes.max_price_alert)
                .with("p_discord_webhook_url", changes.discord_webhook_url)
                .with(
                    "p_sms_notifications_enabled",
                    changes.sms_notifications_enabled,
                ),
        )
        .await;

    let rows = match enhanced {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(user_id, product_id, error = %e, "update_user_product_with_webhook failed, using update_user_product");
            gateway
                .call(
                    "update_user_product",
                    ProcParams::new()
                        .with("p_user_id", user_id)
                        .with("p_product_id", product_id)
                        .with("p_min_price_alert", changes.min_price_alert)
                        .with("p_max_price_alert", changes.max_price_alert),
                )
                .await?
        }
    };

    Ok(ProcOutcome::from_rows(&rows))
}

/// Deletes a product
pub async fn delete(
    gateway: &dyn ProcedureGateway,
    user_id: i64,
    product_id: i64,
) -> ModelResult<Option<ProcOutcome>> {
    let rows = gateway
        .call(
            "delete_user_product",
            ProcParams::new()
                .with("p_user_id", user_id)
                .with("p_product_id", product_id),
        )
        .await?;

    Ok(ProcOutcome::from_rows(&rows))
}

/// Whether `url` parses with both a scheme and a host
pub fn is_valid_product_url(url: &str) -> bool {
    Url::parse(url)
        .map(|parsed| parsed.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}

/// Whether `url` points at a Discord webhook
pub fn is_discord_webhook_url(url: &str) -> bool {
    DISCORD_WEBHOOK_PREFIXES
        .iter()
        .any(|prefix| url.starts_with(prefix))
}

/// Store name and fallback title derived from the product URL's domain
pub fn store_info(url: &str) -> (&'static str, String) {
    let domain = Url::parse(&url.to_lowercase())
        .ok()
        .and_then(|parsed| {
            parsed.host_str().map(|host| match parsed.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            })
        })
        .unwrap_or_default()
        .replace("www.", "");

    if domain.contains("amazon.") {
        ("Amazon", "Amazon Product".to_string())
    } else if domain.contains("ebay.") {
        ("eBay", "eBay Item".to_string())
    } else if domain.contains("bestbuy.") {
        ("Best Buy", "Best Buy Product".to_string())
    } else if domain.contains("target.") {
        ("Target", "Target Product".to_string())
    } else if domain.contains("walmart.") {
        ("Walmart", "Walmart Product".to_string())
    } else {
        ("Other", format!("Product from {}", domain))
    }
}

/// One "recent activity" entry on the dashboard
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityItem {
    pub icon: &'static str,
    pub title: String,
    pub time: Option<String>,
}

/// Dashboard summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardOverview {
    pub user_name: String,
    pub total_products: usize,
    pub alerts_sent: i64,
    pub restocks_found: usize,
    pub money_saved: f64,
    pub recent_activity: Vec<ActivityItem>,
}

impl DashboardOverview {
    /// Overview for a user with no product rows at all
    pub fn empty() -> Self {
        Self {
            user_name: "User".to_string(),
            total_products: 0,
            alerts_sent: 0,
            restocks_found: 0,
            money_saved: 0.0,
            recent_activity: Vec::new(),
        }
    }

    /// Summarizes decoded products
    pub fn from_products(user_name: String, products: &[TrackedProduct]) -> Self {
        let recent_activity = products
            .iter()
            .take(RECENT_ACTIVITY_LIMIT)
            .map(|product| ActivityItem {
                icon: "fas fa-plus",
                title: format!("Added {}", product.title.as_deref().unwrap_or_default()),
                time: product.created_at.clone(),
            })
            .collect();

        Self {
            user_name,
            total_products: products.len(),
            alerts_sent: products.iter().map(|p| p.alerts_sent).sum(),
            restocks_found: products.iter().filter(|p| p.is_in_stock()).count(),
            money_saved: MONEY_SAVED_PLACEHOLDER,
            recent_activity,
        }
    }
}

fn required_int(row: &ProcRow, index: usize) -> Result<i64, DecodeError> {
    row.int(index)?.ok_or(DecodeError::Type {
        index,
        expected: "integer",
        found: "Null".to_string(),
    })
}

fn status_at(row: &ProcRow, index: usize) -> Result<Option<ProductStatus>, DecodeError> {
    Ok(row.text(index)?.as_deref().map(ProductStatus::from))
}

/// Reads an optional trailing column: `None` when the row is too short
fn optional<T>(
    row: &ProcRow,
    index: usize,
    read: impl Fn(&ProcRow, usize) -> Result<T, DecodeError>,
) -> Result<Option<T>, DecodeError> {
    if index >= row.len() {
        return Ok(None);
    }
    read(row, index).map(Some)
}
