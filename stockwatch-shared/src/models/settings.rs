/// Per-user notification and display preferences
///
/// `get_user_settings` may lead with a status row; the settings themselves
/// are the first row with more than 10 columns:
///
/// ```text
/// 0 email_notifications     5 price_drop_alerts       10 default_currency
/// 1 discord_webhook_url     6 restock_alerts          11 share_data
/// 2 phone_number            7 price_increase_alerts   12 public_profile
/// 3 sms_notifications       8 dashboard_theme
/// 4 notification_frequency  9 items_per_page
/// ```
///
/// Missing or empty values fall back to the defaults in [`UserSettings::default`].

use serde::{Deserialize, Serialize};

use super::{first_decodable, ModelResult};
use crate::db::{
    gateway::{ProcParams, ProcedureGateway},
    row::{leading_error, DecodeError, ProcOutcome, ProcRow},
};

/// Decoded settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSettings {
    pub email_notifications: bool,
    pub discord_webhook_url: String,
    pub phone_number: String,
    pub sms_notifications: bool,
    pub notification_frequency: String,
    pub price_drop_alerts: bool,
    pub restock_alerts: bool,
    pub price_increase_alerts: bool,
    pub dashboard_theme: String,
    pub items_per_page: i64,
    pub default_currency: String,
    pub share_data: bool,
    pub public_profile: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            email_notifications: true,
            discord_webhook_url: String::new(),
            phone_number: String::new(),
            sms_notifications: false,
            notification_frequency: "instant".to_string(),
            price_drop_alerts: true,
            restock_alerts: true,
            price_increase_alerts: false,
            dashboard_theme: "light".to_string(),
            items_per_page: 10,
            default_currency: "USD".to_string(),
            share_data: false,
            public_profile: false,
        }
    }
}

impl UserSettings {
    /// Decodes a settings row
    pub fn from_row(row: &ProcRow) -> Result<Self, DecodeError> {
        let defaults = Self::default();

        // The privacy columns were added last; older rows stop at 11
        let trailing_flag = |index: usize, default: bool| {
            if index < row.len() {
                row.flag(index, default)
            } else {
                Ok(default)
            }
        };

        Ok(Self {
            email_notifications: row.flag(0, defaults.email_notifications)?,
            discord_webhook_url: row.text_or(1, "")?,
            phone_number: row.text_or(2, "")?,
            sms_notifications: row.flag(3, defaults.sms_notifications)?,
            notification_frequency: row.text_or(4, &defaults.notification_frequency)?,
            price_drop_alerts: row.flag(5, defaults.price_drop_alerts)?,
            restock_alerts: row.flag(6, defaults.restock_alerts)?,
            price_increase_alerts: row.flag(7, defaults.price_increase_alerts)?,
            dashboard_theme: row.text_or(8, &defaults.dashboard_theme)?,
            items_per_page: row.int_or(9, defaults.items_per_page)?,
            default_currency: row.text_or(10, &defaults.default_currency)?,
            share_data: trailing_flag(11, defaults.share_data)?,
            public_profile: trailing_flag(12, defaults.public_profile)?,
        })
    }
}

/// Result of a settings lookup
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsLookup {
    /// The procedure returned nothing at all
    Empty,

    /// The procedure led with an `("error", message)` row
    Rejected(String),

    /// Settings row, if the user has one
    Found(Option<UserSettings>),
}

/// Loads a user's settings
pub async fn get(gateway: &dyn ProcedureGateway, user_id: i64) -> ModelResult<SettingsLookup> {
    let rows = gateway
        .call("get_user_settings", ProcParams::new().with("p_user_id", user_id))
        .await?;

    if rows.is_empty() {
        return Ok(SettingsLookup::Empty);
    }

    if let Some(message) = leading_error(&rows) {
        return Ok(SettingsLookup::Rejected(message));
    }

    let settings = first_decodable(&rows, 10, "settings", UserSettings::from_row);

    Ok(SettingsLookup::Found(settings))
}

/// Partial settings update; absent fields are passed to the procedure as NULL
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SettingsUpdate {
    pub email_notifications: Option<bool>,
    pub discord_webhook_url: Option<String>,
    pub notification_frequency: Option<String>,
    pub price_drop_alerts: Option<bool>,
    pub restock_alerts: Option<bool>,
    pub price_increase_alerts: Option<bool>,
    pub dashboard_theme: Option<String>,
    pub items_per_page: Option<i64>,
    pub default_currency: Option<String>,
    pub share_data: Option<bool>,
    pub public_profile: Option<bool>,
    pub phone_number: Option<String>,
    pub sms_notifications: Option<bool>,
}

impl SettingsUpdate {
    /// Trimmed webhook URL, `None` when blank
    pub fn webhook(&self) -> Option<&str> {
        self.discord_webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// Stores a settings update
pub async fn update(
    gateway: &dyn ProcedureGateway,
    user_id: i64,
    changes: &SettingsUpdate,
) -> ModelResult<Option<ProcOutcome>> {
    let rows = gateway
        .call(
            "update_user_settings",
            ProcParams::new()
                .with("p_user_id", user_id)
                .with("p_email_notifications", changes.email_notifications)
                .with("p_discord_webhook_url", changes.webhook())
                .with(
                    "p_notification_frequency",
                    changes.notification_frequency.as_deref(),
                )
                .with("p_price_drop_alerts", changes.price_drop_alerts)
                .with("p_restock_alerts", changes.restock_alerts)
                .with("p_price_increase_alerts", changes.price_increase_alerts)
                .with("p_dashboard_theme", changes.dashboard_theme.as_deref())
                .with("p_items_per_page", changes.items_per_page)
                .with("p_default_currency", changes.default_currency.as_deref())
                .with("p_share_data", changes.share_data)
                .with("p_public_profile", changes.public_profile)
                .with("p_phone_number", changes.phone_number.as_deref())
                .with("p_sms_notifications", changes.sms_notifications),
        )
        .await?;

    Ok(ProcOutcome::from_rows(&rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::row::Scalar;

    #[test]
    fn test_defaults_for_null_and_empty_values() {
        let row = ProcRow::new(vec![Scalar::Null; 13]);
        assert_eq!(UserSettings::from_row(&row).unwrap(), UserSettings::default());
    }

    #[test]
    fn test_values_override_defaults() {
        let row = ProcRow::new(vec![
            Scalar::Int(0),
            Scalar::from("https://discord.com/api/webhooks/1/x"),
            Scalar::from("+15550100"),
            Scalar::Int(1),
            Scalar::from("daily"),
            Scalar::Bool(false),
            Scalar::Bool(true),
            Scalar::Bool(true),
            Scalar::from("dark"),
            Scalar::Int(25),
            Scalar::from("EUR"),
            Scalar::Int(1),
            Scalar::Int(0),
        ]);

        let settings = UserSettings::from_row(&row).unwrap();
        assert!(!settings.email_notifications);
        assert!(settings.sms_notifications);
        assert_eq!(settings.notification_frequency, "daily");
        assert!(!settings.price_drop_alerts);
        assert!(settings.price_increase_alerts);
        assert_eq!(settings.dashboard_theme, "dark");
        assert_eq!(settings.items_per_page, 25);
        assert_eq!(settings.default_currency, "EUR");
        assert!(settings.share_data);
        assert!(!settings.public_profile);
    }

    #[test]
    fn test_short_row_uses_privacy_defaults() {
        let row = ProcRow::new(vec![Scalar::Null; 11]);
        let settings = UserSettings::from_row(&row).unwrap();
        assert!(!settings.share_data);
        assert!(!settings.public_profile);
    }

    #[test]
    fn test_blank_webhook_becomes_none() {
        let update = SettingsUpdate {
            discord_webhook_url: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(update.webhook(), None);
    }

    #[test]
    fn test_undecodable_settings_row_is_skipped() {
        let mut broken = vec![Scalar::Null; 13];
        broken[9] = Scalar::from("lots");
        let mut good = vec![Scalar::Null; 13];
        good[8] = Scalar::from("dark");

        let rows = vec![ProcRow::new(broken.clone()), ProcRow::new(good)];
        let settings = first_decodable(&rows, 10, "settings", UserSettings::from_row).unwrap();
        assert_eq!(settings.dashboard_theme, "dark");

        assert!(first_decodable(&[ProcRow::new(broken)], 10, "settings", UserSettings::from_row).is_none());
    }
}
