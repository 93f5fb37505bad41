/// Dashboard overview
///
/// # Endpoint
///
/// ```text
/// GET /api/dashboard/overview
/// ```
///
/// # Response
///
/// ```json
/// {
///   "user_name": "Ada Lovelace",
///   "total_products": 3,
///   "alerts_sent": 7,
///   "restocks_found": 1,
///   "money_saved": 25.5,
///   "recent_activity": [
///     { "icon": "fas fa-plus", "title": "Added Switch OLED", "time": "2024-05-01T10:00:00" }
///   ]
/// }
/// ```

use crate::{
    app::AppState,
    error::ApiResult,
    routes::caller_id,
};
use axum::{extract::State, Json};
use stockwatch_shared::{
    auth::middleware::AuthContext,
    models::{
        product::{self, DashboardOverview},
        user,
    },
};

/// Summarizes the caller's tracked products
///
/// A user without any product rows gets the zeroed overview and no name
/// lookup is made.
pub async fn overview(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<DashboardOverview>> {
    let user_id = caller_id(&auth)?;

    build_overview(&state, user_id)
        .await
        .map(Json)
        .map_err(|e| e.or_public("Failed to load dashboard data"))
}

async fn build_overview(state: &AppState, user_id: i64) -> ApiResult<DashboardOverview> {
    let rows = product::fetch_product_rows(state.db(), user_id).await?;

    if rows.is_empty() {
        return Ok(DashboardOverview::empty());
    }

    let products = product::decode_products(&rows);

    let user_name = user::find_by_id(state.db(), user_id)
        .await?
        .map(|profile| profile.full_name)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "User".to_string());

    let overview = DashboardOverview::from_products(user_name, &products);
    tracing::debug!(
        user_id,
        products = overview.total_products,
        alerts = overview.alerts_sent,
        in_stock = overview.restocks_found,
        "Dashboard overview built"
    );

    Ok(overview)
}
