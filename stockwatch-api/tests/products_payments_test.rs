/// Integration tests for products, premium and donations
///
/// Product rows are decoded from every procedure layout; checkout and
/// webhook routes run against the fake payment provider.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::NaiveDate;
use common::{rejected, success, text_param, TestContext, TEST_WEBHOOK_SECRET};
use serde_json::{json, Value};
use std::collections::HashMap;
use stockwatch_shared::{
    db::row::{ProcRow, Scalar},
    payments::{provider::CheckoutSession, webhook::signature_header},
};

fn enhanced_row() -> ProcRow {
    let created = NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(12, 30, 0)
        .unwrap();

    ProcRow::new(vec![
        Scalar::from("success"),
        Scalar::from("Products retrieved"),
        Scalar::from(7i64),
        Scalar::from("https://www.amazon.com/dp/B0"),
        Scalar::from("Switch OLED"),
        Scalar::from("Amazon"),
        Scalar::from("349.99"),
        Scalar::from(300.0),
        Scalar::Null,
        Scalar::Null,
        Scalar::from(3i64),
        Scalar::from("in-stock"),
        Scalar::Null,
        Scalar::Null,
        Scalar::from(true),
        Scalar::from(created),
    ])
}

fn legacy_row() -> ProcRow {
    ProcRow::new(vec![
        Scalar::from(9i64),
        Scalar::from("https://www.ebay.com/itm/1"),
        Scalar::from("Camera"),
        Scalar::from("eBay"),
        Scalar::from(120.5),
        Scalar::Null,
        Scalar::Null,
        Scalar::from("out-of-stock"),
        Scalar::Null,
        Scalar::Null,
        Scalar::from(0i64),
    ])
}

fn limit_row(can_add: bool, current: i64, max: i64) -> Vec<ProcRow> {
    vec![ProcRow::new(vec![
        Scalar::from("success"),
        Scalar::from("Limit checked"),
        Scalar::from(can_add),
        Scalar::from(current),
        Scalar::from(max),
        Scalar::from("free"),
    ])]
}

fn signed_webhook(uri: &str, payload: &Value, secret: &str) -> Request<Body> {
    let body = payload.to_string();
    let signature = signature_header(body.as_bytes(), chrono::Utc::now().timestamp(), secret);

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("Stripe-Signature", signature)
        .body(Body::from(body))
        .unwrap()
}

fn donation_session(id: &str, payment_status: &str) -> Value {
    json!({
        "id": id,
        "mode": "payment",
        "payment_status": payment_status,
        "payment_intent": "pi_1",
        "metadata": {
            "donor_name": "Grace",
            "donor_email": "grace@example.com",
            "donation_amount": "25",
            "donation_type": "one_time"
        }
    })
}

#[tokio::test]
async fn test_product_list_decodes_enhanced_rows() {
    let ctx = TestContext::new();
    ctx.gateway
        .respond("get_user_products_with_data", vec![enhanced_row()]);
    let token = ctx.access_token(42);

    let (status, body) = ctx.authed("GET", "/api/products", &token, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 1);

    let product = &body["products"][0];
    assert_eq!(product["id"], 7);
    assert_eq!(product["title"], "Switch OLED");
    assert_eq!(product["current_price"], 349.99);
    assert_eq!(product["min_price_alert"], 300.0);
    assert_eq!(product["max_price_alert"], Value::Null);
    assert_eq!(product["discord_webhook_url"], "");
    assert_eq!(product["alerts_sent"], 3);
    assert_eq!(product["status"], "in-stock");
    assert_eq!(product["sms_notifications_enabled"], true);
    assert!(product["created_at"].as_str().unwrap().starts_with("2024-05-01T12:30:00"));
    assert_eq!(product["price_history_count"], 0);

    let params = ctx.gateway.params_of("get_user_products_with_data");
    assert_eq!(params[0].get("p_user_id"), Some(&Scalar::Int(42)));
}

#[tokio::test]
async fn test_product_list_falls_back_to_legacy_procedure() {
    let ctx = TestContext::new();
    ctx.gateway.fail("get_user_products_with_data");
    ctx.gateway.respond("get_user_products", vec![legacy_row()]);
    let token = ctx.access_token(42);

    let (status, body) = ctx.authed("GET", "/api/products", &token, None).await;

    assert_eq!(status, StatusCode::OK);
    let product = &body["products"][0];
    assert_eq!(product["id"], 9);
    assert_eq!(product["status"], "out-of-stock");
    assert_eq!(product["discord_webhook_url"], "");
    assert!(product.get("sms_notifications_enabled").is_none());
}

#[tokio::test]
async fn test_product_list_is_empty_when_both_procedures_fail() {
    let ctx = TestContext::new();
    ctx.gateway.fail("get_user_products_with_data");
    ctx.gateway.fail("get_user_products");
    let token = ctx.access_token(42);

    let (status, body) = ctx.authed("GET", "/api/products", &token, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["products"], json!([]));
    assert_eq!(body["total_count"], 0);
}

#[tokio::test]
async fn test_product_list_reports_procedure_rejection() {
    let ctx = TestContext::new();
    ctx.gateway
        .respond("get_user_products_with_data", rejected("User not found"));
    let token = ctx.access_token(42);

    let (status, body) = ctx.authed("GET", "/api/products", &token, None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "User not found");
}

#[tokio::test]
async fn test_add_product_rejects_invalid_url_before_any_call() {
    let ctx = TestContext::new();
    let token = ctx.access_token(42);

    let (status, body) = ctx
        .authed(
            "POST",
            "/api/products",
            &token,
            Some(json!({ "url": "not a url" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid URL format");
    assert!(ctx.gateway.called().is_empty());
}

#[tokio::test]
async fn test_add_product_at_limit() {
    let ctx = TestContext::new();
    ctx.gateway.respond("check_product_limit", limit_row(false, 2, 2));
    let token = ctx.access_token(42);

    let (status, body) = ctx
        .authed(
            "POST",
            "/api/products",
            &token,
            Some(json!({ "url": "https://www.target.com/p/1" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Product limit reached (2/2) for your free plan. Upgrade to add more products."
    );
    assert!(ctx.gateway.params_of("add_user_product_with_webhook").is_empty());
}

#[tokio::test]
async fn test_add_product_derives_title_from_store() {
    let ctx = TestContext::new();
    ctx.gateway.respond("check_product_limit", limit_row(true, 0, 2));
    ctx.gateway.respond(
        "add_user_product_with_webhook",
        vec![ProcRow::new(vec![
            Scalar::from("success"),
            Scalar::from("Product added successfully"),
            Scalar::from(11i64),
        ])],
    );
    let token = ctx.access_token(42);

    let (status, body) = ctx
        .authed(
            "POST",
            "/api/products",
            &token,
            Some(json!({
                "url": " https://www.walmart.com/ip/1 ",
                "discord_webhook_url": "https://discord.com/api/webhooks/1/abc"
            })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["product_id"], 11);
    assert_eq!(body["message"], "Product added successfully");

    let params = ctx.gateway.params_of("add_user_product_with_webhook");
    assert_eq!(
        text_param(&params[0], "p_product_url").as_deref(),
        Some("https://www.walmart.com/ip/1")
    );
    assert_eq!(
        text_param(&params[0], "p_product_title").as_deref(),
        Some("Walmart Product")
    );
    assert_eq!(
        params[0].get("p_sms_notifications_enabled"),
        Some(&Scalar::Bool(false))
    );
}

#[tokio::test]
async fn test_concurrent_adds_can_both_pass_the_limit_check() {
    let ctx = TestContext::new();
    ctx.gateway.respond("check_product_limit", limit_row(true, 1, 2));
    ctx.gateway
        .respond("add_user_product_with_webhook", success("Product added successfully"));
    let token = ctx.access_token(42);

    let first = ctx.authed(
        "POST",
        "/api/products",
        &token,
        Some(json!({ "url": "https://www.amazon.com/dp/A" })),
    );
    let second = ctx.authed(
        "POST",
        "/api/products",
        &token,
        Some(json!({ "url": "https://www.amazon.com/dp/B" })),
    );

    let ((first_status, _), (second_status, _)) = futures::join!(first, second);

    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(second_status, StatusCode::CREATED);
    assert_eq!(ctx.gateway.params_of("check_product_limit").len(), 2);
    assert_eq!(ctx.gateway.params_of("add_user_product_with_webhook").len(), 2);
}

#[tokio::test]
async fn test_update_product_accepts_string_thresholds() {
    let ctx = TestContext::new();
    ctx.gateway
        .respond("update_user_product_with_webhook", success("Product updated"));
    let token = ctx.access_token(42);

    let (status, body) = ctx
        .authed(
            "PUT",
            "/api/products/7",
            &token,
            Some(json!({ "min_price_alert": "19.5", "max_price_alert": 40 })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Product updated");

    let params = ctx.gateway.params_of("update_user_product_with_webhook");
    assert_eq!(params[0].get("p_product_id"), Some(&Scalar::Int(7)));
    assert_eq!(params[0].get("p_min_price_alert"), Some(&Scalar::Float(19.5)));
}

#[tokio::test]
async fn test_delete_product_without_answer() {
    let ctx = TestContext::new();
    let token = ctx.access_token(42);

    let (status, body) = ctx
        .authed("DELETE", "/api/products/7", &token, None)
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to delete product");
}

#[tokio::test]
async fn test_dashboard_for_user_without_products() {
    let ctx = TestContext::new();
    let token = ctx.access_token(42);

    let (status, body) = ctx
        .authed("GET", "/api/dashboard/overview", &token, None)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_name"], "User");
    assert_eq!(body["total_products"], 0);
}

#[tokio::test]
async fn test_premium_webhook_requires_valid_signature() {
    let ctx = TestContext::new();
    let event = json!({
        "id": "evt_1",
        "type": "customer.subscription.created",
        "data": { "object": { "id": "sub_1", "status": "active" } }
    });

    let forged = signed_webhook("/api/premium/webhook", &event, "whsec_wrong");
    let (status, body) = ctx.send(forged).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid signature");

    let unsigned = Request::builder()
        .method("POST")
        .uri("/api/premium/webhook")
        .body(Body::from(event.to_string()))
        .unwrap();
    let (status, _) = ctx.send(unsigned).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let genuine = signed_webhook("/api/premium/webhook", &event, TEST_WEBHOOK_SECRET);
    let (status, body) = ctx.send(genuine).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
}

#[tokio::test]
async fn test_premium_update_is_not_implemented() {
    let ctx = TestContext::new();
    let token = ctx.access_token(42);

    let (status, body) = ctx
        .authed("PUT", "/api/premium/update", &token, Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No data provided");

    let (status, body) = ctx
        .authed(
            "PUT",
            "/api/premium/update",
            &token,
            Some(json!({ "plan_type": "unlimited" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(
        body["message"],
        "Subscription update functionality not yet implemented"
    );
}

#[tokio::test]
async fn test_checkout_requires_product_count_for_pay_as_you_go() {
    let ctx = TestContext::new();
    let token = ctx.access_token(42);

    let (status, body) = ctx
        .authed(
            "POST",
            "/api/premium/create-checkout-session",
            &token,
            Some(json!({ "plan_type": "pay_as_you_go" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Product count is required for pay-as-you-go plan");
    assert!(ctx.payments.checkouts().is_empty());
}

#[tokio::test]
async fn test_server_premium_checkout() {
    let ctx = TestContext::new();

    let (status, body) = ctx
        .post_json("/api/stripe/request", json!({ "amount": "5000", "serverID": "123" }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], "cs_test_1");

    let checkout = ctx.payments.checkouts().pop().unwrap();
    assert_eq!(checkout.success_url, "https://stockwatch.test/premium-new");
    assert_eq!(
        checkout.subscription_metadata.get("server_id").map(String::as_str),
        Some("123")
    );

    let (status, body) = ctx
        .post_json("/api/stripe/request", json!({ "amount": "700", "serverID": "123" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid subscription amount of 700");
}

#[tokio::test]
async fn test_server_premium_deleted_event() {
    let ctx = TestContext::new();
    ctx.gateway
        .respond("delete_server_premium", success("Server premium removed"));

    let event = json!({
        "type": "customer.subscription.deleted",
        "data": { "object": { "id": "sub_9", "metadata": { "server_id": "123" } } }
    });
    let (status, _) = ctx
        .send(signed_webhook("/api/stripe/webhook", &event, TEST_WEBHOOK_SECRET))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ctx.gateway.called(), vec!["delete_server_premium".to_string()]);
}

#[tokio::test]
async fn test_donation_checkout_carries_amount() {
    let ctx = TestContext::new();

    let (status, body) = ctx
        .post_json(
            "/api/donation/create-session",
            json!({ "amount": 25, "name": "Grace", "email": "grace@example.com" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], "cs_test_1");
    assert_eq!(body["url"], "https://checkout.test/cs_test_1");

    let checkout = ctx.payments.checkouts().pop().unwrap();
    assert_eq!(
        checkout.success_url,
        "https://stockwatch.test/api/donation/success?session_id={CHECKOUT_SESSION_ID}"
    );
    assert_eq!(
        checkout.metadata.get("donation_amount").map(String::as_str),
        Some("25")
    );

    let (status, body) = ctx
        .post_json("/api/donation/create-session", json!({ "amount": 0 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Donation amount must be at least $1");
}

#[tokio::test]
async fn test_donation_success_saves_paid_session() {
    let ctx = TestContext::new();
    ctx.gateway.respond("save_donation", success("Donation saved"));
    ctx.payments.store_session(CheckoutSession {
        id: "cs_paid".to_string(),
        mode: Some("payment".to_string()),
        payment_status: Some("paid".to_string()),
        metadata: HashMap::from([
            ("donor_name".to_string(), "Grace".to_string()),
            ("donation_amount".to_string(), "25".to_string()),
        ]),
        ..Default::default()
    });

    let request = Request::builder()
        .method("GET")
        .uri("/api/donation/success?session_id=cs_paid")
        .body(Body::empty())
        .unwrap();
    let (status, body) = ctx.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Thank you for your donation!");
    assert_eq!(body["amount"], 25.0);
    assert_eq!(body["donor_name"], "Grace");

    let params = ctx.gateway.params_of("save_donation");
    assert_eq!(text_param(&params[0], "p_session_id").as_deref(), Some("cs_paid"));
    assert_eq!(text_param(&params[0], "p_status").as_deref(), Some("completed"));
}

#[tokio::test]
async fn test_donation_success_requires_payment() {
    let ctx = TestContext::new();
    ctx.payments.store_session(CheckoutSession {
        id: "cs_open".to_string(),
        payment_status: Some("unpaid".to_string()),
        ..Default::default()
    });

    let request = Request::builder()
        .method("GET")
        .uri("/api/donation/success?session_id=cs_open")
        .body(Body::empty())
        .unwrap();
    let (status, body) = ctx.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Payment was not successful");
    assert!(ctx.gateway.called().is_empty());
}

#[tokio::test]
async fn test_donation_webhook_records_completed_session() {
    let ctx = TestContext::new();
    ctx.gateway.respond("save_donation", success("Donation saved"));

    let event = json!({
        "id": "evt_2",
        "type": "checkout.session.completed",
        "data": { "object": donation_session("cs_hook", "paid") }
    });
    let (status, body) = ctx
        .send(signed_webhook("/api/donation/webhook", &event, TEST_WEBHOOK_SECRET))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "success" }));

    let params = ctx.gateway.params_of("save_donation");
    assert_eq!(params[0].get("p_amount"), Some(&Scalar::Float(25.0)));
    assert_eq!(
        text_param(&params[0], "p_stripe_payment_intent").as_deref(),
        Some("pi_1")
    );
}

#[tokio::test]
async fn test_donation_webhook_fails_when_nothing_is_saved() {
    let ctx = TestContext::new();

    let event = json!({
        "type": "checkout.session.completed",
        "data": { "object": donation_session("cs_lost", "paid") }
    });
    let (status, body) = ctx
        .send(signed_webhook("/api/donation/webhook", &event, TEST_WEBHOOK_SECRET))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "No results returned");
}

#[tokio::test]
async fn test_donation_webhook_failed_payment_is_a_warning() {
    let ctx = TestContext::new();
    ctx.gateway
        .respond("update_donation_status", rejected("Donation not found"));

    let event = json!({
        "type": "checkout.session.async_payment_failed",
        "data": { "object": donation_session("cs_failed", "unpaid") }
    });
    let (status, body) = ctx
        .send(signed_webhook("/api/donation/webhook", &event, TEST_WEBHOOK_SECRET))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["warnings"][0],
        "Donation status was not updated: Donation not found"
    );

    let params = ctx.gateway.params_of("update_donation_status");
    assert_eq!(text_param(&params[0], "p_status").as_deref(), Some("failed"));
}

#[tokio::test]
async fn test_donation_listing_requires_token() {
    let ctx = TestContext::new();

    let request = Request::builder()
        .method("GET")
        .uri("/api/donation/admin/donations")
        .body(Body::empty())
        .unwrap();
    let (status, _) = ctx.send(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
