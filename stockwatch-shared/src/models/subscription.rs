/// Plans, product limits and subscription bookkeeping
///
/// Limit arithmetic lives entirely in `check_product_limit`; this module
/// only passes its answer through. Payment-provider calls are made by the
/// route handlers; the procedures here persist what the provider reported.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::{first_decodable, ModelResult};
use crate::db::{
    gateway::{ProcParams, ProcedureGateway},
    row::{leading_error, DecodeError, ProcOutcome, ProcRow},
};

/// Products a user without a subscription may track
pub const FREE_PLAN_MAX_PRODUCTS: i64 = 2;

/// Add-on name recorded for the AI enhancement
pub const AI_ADDON_NAME: &str = "AI Enhancement";

/// Current subscription as shown on the premium page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionInfo {
    pub subscription_id: Option<i64>,
    pub plan_name: Option<String>,
    pub plan_type: Option<String>,
    pub price_per_month: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_per_product: Option<f64>,
    pub max_products: i64,
    pub subscription_status: Option<String>,
    pub current_period_start: Option<String>,
    pub current_period_end: Option<String>,
    pub cancel_at_period_end: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stripe_subscription_id: Option<String>,
    pub current_products_count: i64,
    pub has_ai_enhancement: bool,
}

impl SubscriptionInfo {
    /// What a user without a subscription row sees
    pub fn free() -> Self {
        Self {
            subscription_id: None,
            plan_name: Some("Free Plan".to_string()),
            plan_type: Some("free".to_string()),
            price_per_month: 0.0,
            price_per_product: None,
            max_products: FREE_PLAN_MAX_PRODUCTS,
            subscription_status: Some("active".to_string()),
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            current_products_count: 0,
            has_ai_enhancement: false,
        }
    }

    /// Decodes a `get_user_subscription_info` row (status and message first)
    pub fn from_row(row: &ProcRow) -> Result<Self, DecodeError> {
        Ok(Self {
            subscription_id: row.int(2)?,
            plan_name: row.text(3)?,
            plan_type: row.text(4)?,
            price_per_month: row.float_or(5, 0.0)?,
            price_per_product: row.float(6)?,
            max_products: row.int(7)?.unwrap_or(FREE_PLAN_MAX_PRODUCTS),
            subscription_status: row.text(8)?,
            current_period_start: row.timestamp(9)?,
            current_period_end: row.timestamp(10)?,
            cancel_at_period_end: row.flag(11, false)?,
            stripe_customer_id: row.text(12)?,
            stripe_subscription_id: row.text(13)?,
            current_products_count: row.int_or(14, 0)?,
            has_ai_enhancement: row.flag(15, false)?,
        })
    }
}

/// Result of a subscription lookup
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionLookup {
    Found(SubscriptionInfo),
    Rejected(String),
}

/// Loads the user's subscription, defaulting to the free plan
pub async fn info_for_user(
    gateway: &dyn ProcedureGateway,
    user_id: i64,
) -> ModelResult<SubscriptionLookup> {
    let rows = subscription_rows(gateway, user_id).await?;

    if let Some(message) = leading_error(&rows) {
        return Ok(SubscriptionLookup::Rejected(message));
    }

    let info = first_decodable(&rows, 15, "subscription", SubscriptionInfo::from_row)
        .unwrap_or_else(SubscriptionInfo::free);

    Ok(SubscriptionLookup::Found(info))
}

/// Provider subscription id stored for the user, if any
pub async fn stored_provider_subscription_id(
    gateway: &dyn ProcedureGateway,
    user_id: i64,
) -> ModelResult<Option<String>> {
    let rows = subscription_rows(gateway, user_id).await?;

    Ok(rows
        .iter()
        .find(|row| row.len() > 13)
        .and_then(|row| row.text(13).ok().flatten())
        .filter(|id| !id.is_empty()))
}

async fn subscription_rows(
    gateway: &dyn ProcedureGateway,
    user_id: i64,
) -> ModelResult<Vec<ProcRow>> {
    Ok(gateway
        .call(
            "get_user_subscription_info",
            ProcParams::new().with("p_user_id", user_id),
        )
        .await?)
}

/// Answer of `check_product_limit`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitCheck {
    #[serde(rename = "can_add_product")]
    pub can_add: bool,
    pub current_count: i64,
    pub max_allowed: i64,
    pub plan_type: String,
}

impl LimitCheck {
    /// Decodes `(status, message, can_add, current_count, max_allowed, plan_type)`
    ///
    /// Missing trailing columns take the free-plan values.
    pub fn from_row(row: &ProcRow) -> Result<Self, DecodeError> {
        let present = |index: usize| index < row.len();

        Ok(Self {
            can_add: present(2) && row.get(2)?.is_truthy(),
            current_count: if present(3) { row.int(3)?.unwrap_or(0) } else { 0 },
            max_allowed: if present(4) {
                row.int(4)?.unwrap_or(FREE_PLAN_MAX_PRODUCTS)
            } else {
                FREE_PLAN_MAX_PRODUCTS
            },
            plan_type: if present(5) {
                row.text(5)?.unwrap_or_else(|| "free".to_string())
            } else {
                "free".to_string()
            },
        })
    }
}

/// Outcome of a limit check
#[derive(Debug, Clone, PartialEq)]
pub enum LimitLookup {
    /// No rows
    Empty,

    /// Non-success status with its message
    Rejected(String),

    Checked(LimitCheck),
}

/// Asks the database whether the user may add another product
pub async fn check_product_limit(
    gateway: &dyn ProcedureGateway,
    user_id: i64,
) -> ModelResult<LimitLookup> {
    let rows = gateway
        .call("check_product_limit", ProcParams::new().with("p_user_id", user_id))
        .await?;

    let Some(row) = rows.first() else {
        return Ok(LimitLookup::Empty);
    };

    if !row.is_success() {
        return Ok(LimitLookup::Rejected(
            row.text(1).ok().flatten().unwrap_or_default(),
        ));
    }

    Ok(LimitLookup::Checked(LimitCheck::from_row(row)?))
}

/// A subscription tier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub id: Option<i64>,
    pub plan_name: Option<String>,
    pub plan_type: Option<String>,
    pub price_per_month: f64,
    pub price_per_product: Option<f64>,
    pub max_products: Option<i64>,
    pub stripe_price_id: Option<String>,
    pub is_active: bool,
}

/// An optional extra on top of a plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Addon {
    pub id: Option<i64>,
    pub addon_name: Option<String>,
    pub addon_description: Option<String>,
    pub price_per_month: f64,
    pub stripe_price_id: Option<String>,
    pub is_active: bool,
}

/// Everything `get_all_subscription_plans` offers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanCatalog {
    pub plans: Vec<Plan>,
    pub addons: Vec<Addon>,
}

impl PlanCatalog {
    /// Splits rows into plans and add-ons
    ///
    /// Plans (8+ columns) come first; the first 6+ column row that is not
    /// read as a plan starts the add-on section, after which every 6+
    /// column row is an add-on. Rows that fail to decode are logged and
    /// left out.
    pub fn from_rows(rows: &[ProcRow]) -> Self {
        let mut catalog = Self::default();
        let mut reading_addons = false;

        for (index, row) in rows.iter().enumerate() {
            if row.len() < 2 || (row.is_success() && row.len() == 2) {
                continue;
            }

            let decoded = if row.len() >= 8 && !reading_addons {
                Plan::from_row(row).map(|plan| catalog.plans.push(plan))
            } else if row.len() >= 6 {
                reading_addons = true;
                Addon::from_row(row).map(|addon| catalog.addons.push(addon))
            } else {
                Ok(())
            };

            if let Err(e) = decoded {
                tracing::warn!(row = index, error = %e, "Skipping undecodable plan row");
            }
        }

        catalog
    }
}

impl Plan {
    fn from_row(row: &ProcRow) -> Result<Self, DecodeError> {
        Ok(Self {
            id: row.int(0)?,
            plan_name: row.text(1)?,
            plan_type: row.text(2)?,
            price_per_month: row.price(3)?.unwrap_or(0.0),
            price_per_product: row.price(4)?,
            max_products: row.int(5)?,
            stripe_price_id: row.text(6)?,
            is_active: row.get(7)?.is_truthy(),
        })
    }
}

impl Addon {
    fn from_row(row: &ProcRow) -> Result<Self, DecodeError> {
        Ok(Self {
            id: row.int(0)?,
            addon_name: row.text(1)?,
            addon_description: row.text(2)?,
            price_per_month: row.price(3)?.unwrap_or(0.0),
            stripe_price_id: row.text(4)?,
            is_active: row.get(5)?.is_truthy(),
        })
    }
}

/// Result of loading the plan catalogue
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogLookup {
    Empty,
    Rejected(String),
    Found(PlanCatalog),
}

/// Loads all plans and add-ons
pub async fn plan_catalog(gateway: &dyn ProcedureGateway) -> ModelResult<CatalogLookup> {
    let rows = gateway
        .call("get_all_subscription_plans", ProcParams::new())
        .await?;

    if rows.is_empty() {
        return Ok(CatalogLookup::Empty);
    }

    if let Some(message) = leading_error(&rows) {
        return Ok(CatalogLookup::Rejected(message));
    }

    Ok(CatalogLookup::Found(PlanCatalog::from_rows(&rows)))
}

/// Subscription confirmed by the payment provider
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubscription<'a> {
    pub plan_type: Option<&'a str>,
    pub custom_product_limit: Option<i64>,
    pub provider_customer_id: Option<&'a str>,
    pub provider_subscription_id: &'a str,
    pub checkout_session_id: &'a str,
    pub period_start: Option<NaiveDateTime>,
    pub period_end: Option<NaiveDateTime>,
}

/// Result of `create_user_subscription`
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedSubscription {
    pub outcome: ProcOutcome,
    pub subscription_id: Option<i64>,
}

/// Persists a subscription; `None` when the procedure returned no rows
pub async fn create(
    gateway: &dyn ProcedureGateway,
    user_id: i64,
    subscription: NewSubscription<'_>,
) -> ModelResult<Option<CreatedSubscription>> {
    let rows = gateway
        .call(
            "create_user_subscription",
            ProcParams::new()
                .with("p_user_id", user_id)
                .with("p_plan_type", subscription.plan_type)
                .with("p_custom_product_limit", subscription.custom_product_limit)
                .with("p_stripe_customer_id", subscription.provider_customer_id)
                .with(
                    "p_stripe_subscription_id",
                    subscription.provider_subscription_id,
                )
                .with("p_stripe_session_id", subscription.checkout_session_id)
                .with("p_period_start", subscription.period_start)
                .with("p_period_end", subscription.period_end),
        )
        .await?;

    let Some(outcome) = ProcOutcome::from_rows(&rows) else {
        return Ok(None);
    };

    let subscription_id = rows
        .first()
        .filter(|row| row.len() > 2)
        .and_then(|row| row.int(2).ok().flatten());

    Ok(Some(CreatedSubscription {
        outcome,
        subscription_id,
    }))
}

/// Records an add-on against a stored subscription
pub async fn add_addon(
    gateway: &dyn ProcedureGateway,
    subscription_id: i64,
    addon_name: &str,
    provider_item_id: Option<&str>,
) -> ModelResult<Option<ProcOutcome>> {
    let rows = gateway
        .call(
            "add_subscription_addon",
            ProcParams::new()
                .with("p_subscription_id", subscription_id)
                .with("p_addon_name", addon_name)
                .with("p_stripe_subscription_item_id", provider_item_id),
        )
        .await?;

    Ok(ProcOutcome::from_rows(&rows))
}

/// Marks the user's subscription cancelled
pub async fn cancel(
    gateway: &dyn ProcedureGateway,
    user_id: i64,
    cancel_immediately: bool,
) -> ModelResult<Option<ProcOutcome>> {
    let rows = gateway
        .call(
            "cancel_user_subscription",
            ProcParams::new()
                .with("p_user_id", user_id)
                .with("p_cancel_immediately", cancel_immediately),
        )
        .await?;

    Ok(ProcOutcome::from_rows(&rows))
}

/// Discord server premium bookkeeping
pub mod server {
    use super::*;

    /// Server premium state carried by a provider subscription
    #[derive(Debug, Clone, PartialEq)]
    pub struct ServerPremium<'a> {
        pub server_id: Option<&'a str>,
        pub subscription_type: Option<&'a str>,
        pub provider_subscription_id: &'a str,
        pub status: Option<&'a str>,
        pub expires_at: Option<i64>,
    }

    /// Records a new server premium subscription
    pub async fn add(
        gateway: &dyn ProcedureGateway,
        premium: &ServerPremium<'_>,
    ) -> ModelResult<Option<ProcOutcome>> {
        let rows = gateway
            .call(
                "add_server_premium",
                ProcParams::new()
                    .with("p_server_id", premium.server_id)
                    .with("p_subscription_id", premium.provider_subscription_id)
                    .with("p_subscription_type", premium.subscription_type)
                    .with("p_status", premium.status)
                    .with("p_expires_at", premium.expires_at),
            )
            .await?;

        Ok(ProcOutcome::from_rows(&rows))
    }

    /// Updates status and expiry of a server premium subscription
    pub async fn update(
        gateway: &dyn ProcedureGateway,
        premium: &ServerPremium<'_>,
    ) -> ModelResult<Option<ProcOutcome>> {
        let rows = gateway
            .call(
                "update_server_premium",
                ProcParams::new()
                    .with("p_server_id", premium.server_id)
                    .with("p_subscription_id", premium.provider_subscription_id)
                    .with("p_status", premium.status)
                    .with("p_expires_at", premium.expires_at),
            )
            .await?;

        Ok(ProcOutcome::from_rows(&rows))
    }

    /// Removes a server premium subscription
    pub async fn delete(
        gateway: &dyn ProcedureGateway,
        provider_subscription_id: &str,
    ) -> ModelResult<Option<ProcOutcome>> {
        let rows = gateway
            .call(
                "delete_server_premium",
                ProcParams::new().with("p_subscription_id", provider_subscription_id),
            )
            .await?;

        Ok(ProcOutcome::from_rows(&rows))
    }

    /// Re-reads the dashboard's premium status for a guild
    pub async fn refresh_status(
        gateway: &dyn ProcedureGateway,
        server_id: Option<&str>,
    ) -> ModelResult<Vec<ProcRow>> {
        Ok(gateway
            .call(
                "check_premium_status_via_dashboard",
                ProcParams::new().with("p_disc_guild_id", server_id),
            )
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::row::Scalar;

    #[test]
    fn test_subscription_row() {
        let row = ProcRow::new(vec![
            Scalar::from("success"),
            Scalar::from("Subscription found"),
            Scalar::Int(3),
            Scalar::from("Unlimited"),
            Scalar::from("unlimited"),
            Scalar::from("145.00"),
            Scalar::Null,
            Scalar::Null,
            Scalar::from("active"),
            Scalar::Null,
            Scalar::Null,
            Scalar::Int(1),
            Scalar::from("cus_1"),
            Scalar::from("sub_1"),
            Scalar::Int(17),
            Scalar::Null,
        ]);

        let info = SubscriptionInfo::from_row(&row).unwrap();
        assert_eq!(info.subscription_id, Some(3));
        assert_eq!(info.price_per_month, 145.0);
        assert_eq!(info.price_per_product, None);
        assert_eq!(info.max_products, FREE_PLAN_MAX_PRODUCTS);
        assert!(info.cancel_at_period_end);
        assert_eq!(info.stripe_subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(info.current_products_count, 17);
        assert!(!info.has_ai_enhancement);
    }

    #[test]
    fn test_free_plan_serialization_omits_provider_fields() {
        let value = serde_json::to_value(SubscriptionInfo::free()).unwrap();
        assert_eq!(value["plan_type"], "free");
        assert_eq!(value["max_products"], 2);
        assert!(value.get("stripe_customer_id").is_none());
        assert!(value.get("price_per_product").is_none());
    }

    #[test]
    fn test_limit_check_defaults() {
        let row = ProcRow::new(vec![Scalar::from("success"), Scalar::from("ok")]);
        let check = LimitCheck::from_row(&row).unwrap();
        assert!(!check.can_add);
        assert_eq!(check.current_count, 0);
        assert_eq!(check.max_allowed, 2);
        assert_eq!(check.plan_type, "free");

        let value = serde_json::to_value(&check).unwrap();
        assert_eq!(value["can_add_product"], false);
    }

    #[test]
    fn test_plan_catalog_split() {
        let rows = vec![
            ProcRow::new(vec![Scalar::from("success"), Scalar::from("Plans retrieved")]),
            ProcRow::new(vec![
                Scalar::Int(1),
                Scalar::from("Free"),
                Scalar::from("free"),
                Scalar::Int(0),
                Scalar::Null,
                Scalar::Int(2),
                Scalar::Null,
                Scalar::Int(1),
            ]),
            ProcRow::new(vec![
                Scalar::Int(2),
                Scalar::from("Pay as you go"),
                Scalar::from("pay_as_you_go"),
                Scalar::Null,
                Scalar::from("5.00"),
                Scalar::Null,
                Scalar::from("price_x"),
                Scalar::Int(1),
            ]),
            ProcRow::new(vec![
                Scalar::Int(1),
                Scalar::from("AI Enhancement"),
                Scalar::from("Failsafe tracking"),
                Scalar::from("50.00"),
                Scalar::Null,
                Scalar::Int(1),
            ]),
            // Once add-ons start, wide rows are add-ons too
            ProcRow::new(vec![
                Scalar::Int(2),
                Scalar::from("Priority"),
                Scalar::Null,
                Scalar::Int(10),
                Scalar::Null,
                Scalar::Int(0),
                Scalar::Null,
                Scalar::Null,
            ]),
        ];

        let catalog = PlanCatalog::from_rows(&rows);
        assert_eq!(catalog.plans.len(), 2);
        assert_eq!(catalog.plans[0].price_per_month, 0.0);
        assert_eq!(catalog.plans[1].price_per_product, Some(5.0));
        assert_eq!(catalog.addons.len(), 2);
        assert_eq!(catalog.addons[0].price_per_month, 50.0);
        assert!(!catalog.addons[1].is_active);
    }

    #[test]
    fn test_plan_catalog_skips_undecodable_rows() {
        let rows = vec![
            ProcRow::new(vec![
                Scalar::from("not-an-id"),
                Scalar::from("Broken"),
                Scalar::from("broken"),
                Scalar::Int(0),
                Scalar::Null,
                Scalar::Int(2),
                Scalar::Null,
                Scalar::Int(1),
            ]),
            ProcRow::new(vec![
                Scalar::Int(3),
                Scalar::from("Unlimited"),
                Scalar::from("unlimited"),
                Scalar::from("145.00"),
                Scalar::Null,
                Scalar::Null,
                Scalar::from("price_u"),
                Scalar::Int(1),
            ]),
            ProcRow::new(vec![
                Scalar::Int(1),
                Scalar::from("AI Enhancement"),
                Scalar::Null,
                Scalar::from("fifty"),
                Scalar::Null,
                Scalar::Int(1),
            ]),
        ];

        let catalog = PlanCatalog::from_rows(&rows);
        assert_eq!(catalog.plans.len(), 1);
        assert_eq!(catalog.plans[0].plan_type.as_deref(), Some("unlimited"));
        assert!(catalog.addons.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_subscription_row_falls_back_to_free_plan() {
        use crate::db::gateway::DbError;
        use async_trait::async_trait;

        struct OneRow(Vec<ProcRow>);

        #[async_trait]
        impl ProcedureGateway for OneRow {
            async fn call(&self, _name: &str, _params: ProcParams) -> Result<Vec<ProcRow>, DbError> {
                Ok(self.0.clone())
            }

            async fn ping(&self) -> Result<(), DbError> {
                Ok(())
            }
        }

        let mut values = vec![Scalar::from("success"), Scalar::from("Subscription found")];
        values.push(Scalar::from("three"));
        values.extend(std::iter::repeat(Scalar::Null).take(13));
        let gateway = OneRow(vec![ProcRow::new(values)]);

        let lookup = info_for_user(&gateway, 42).await.unwrap();
        assert_eq!(lookup, SubscriptionLookup::Found(SubscriptionInfo::free()));
    }
}
