//! Common test utilities for integration tests
//!
//! This module provides shared infrastructure for integration tests:
//! - An in-memory procedure gateway with scriptable answers
//! - Fake payment provider and mailer that record what they were asked
//! - JWT token generation
//! - API client helpers

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};
use stockwatch_api::{
    app::{build_router, AppState},
    config::Config,
};
use stockwatch_shared::{
    auth::jwt::ProfileClaims,
    db::{
        gateway::{DbError, ProcParams, ProcedureGateway},
        row::{ProcRow, Scalar},
    },
    notify::{NotifyError, PasswordResetMailer},
    payments::{
        provider::{CheckoutRequest, CheckoutSession, Customer, Price, PriceData, Subscription},
        PaymentError, PaymentProvider, PaymentResult,
    },
};
use tower::Service as _;

pub const TEST_JWT_SECRET: &str = "integration-test-secret";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_integration";
pub const TEST_BASE_URL: &str = "https://stockwatch.test";

type Handler = Arc<dyn Fn(&ProcParams) -> Result<Vec<ProcRow>, DbError> + Send + Sync>;

/// In-memory gateway
///
/// Each procedure answers through a handler registered by the test.
/// Unregistered procedures return no rows. Every call is recorded.
#[derive(Default)]
pub struct FakeGateway {
    handlers: Mutex<HashMap<String, Handler>>,
    calls: Mutex<Vec<(String, ProcParams)>>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a handler for `procedure`
    pub fn on<F>(&self, procedure: &str, handler: F)
    where
        F: Fn(&ProcParams) -> Result<Vec<ProcRow>, DbError> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert(procedure.to_string(), Arc::new(handler));
    }

    /// `procedure` always answers `rows`
    pub fn respond(&self, procedure: &str, rows: Vec<ProcRow>) {
        self.on(procedure, move |_| Ok(rows.clone()));
    }

    /// `procedure` always fails
    pub fn fail(&self, procedure: &str) {
        let message = format!("{} is unavailable", procedure);
        self.on(procedure, move |_| Err(DbError::Other(message.clone())));
    }

    /// Names of the procedures called so far, in order
    pub fn called(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Parameters of every call to `procedure`
    pub fn params_of(&self, procedure: &str) -> Vec<ProcParams> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == procedure)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

#[async_trait]
impl ProcedureGateway for FakeGateway {
    async fn call(&self, name: &str, params: ProcParams) -> Result<Vec<ProcRow>, DbError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), params.clone()));

        let handler = self.handlers.lock().unwrap().get(name).cloned();
        match handler {
            Some(handler) => handler(&params),
            None => Ok(Vec::new()),
        }
    }

    async fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }
}

/// `("success", message)`
pub fn success(message: &str) -> Vec<ProcRow> {
    vec![ProcRow::new(vec![Scalar::from("success"), Scalar::from(message)])]
}

/// `("error", message)`
pub fn rejected(message: &str) -> Vec<ProcRow> {
    vec![ProcRow::new(vec![Scalar::from("error"), Scalar::from(message)])]
}

/// Text parameter of a recorded call
pub fn text_param(params: &ProcParams, name: &str) -> Option<String> {
    params.get(name).and_then(Scalar::as_str).map(str::to_string)
}

/// Payment provider that hands out sequential session ids
#[derive(Default)]
pub struct FakePayments {
    checkouts: Mutex<Vec<CheckoutRequest>>,
    sessions: Mutex<HashMap<String, CheckoutSession>>,
}

impl FakePayments {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes `retrieve_checkout_session` return `session`
    pub fn store_session(&self, session: CheckoutSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    /// Checkout requests received so far
    pub fn checkouts(&self) -> Vec<CheckoutRequest> {
        self.checkouts.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentProvider for FakePayments {
    async fn create_customer(
        &self,
        email: &str,
        _metadata: &BTreeMap<String, String>,
    ) -> PaymentResult<Customer> {
        Ok(Customer {
            id: "cus_test".to_string(),
            email: Some(email.to_string()),
        })
    }

    async fn find_customer_by_email(&self, _email: &str) -> PaymentResult<Option<Customer>> {
        Ok(None)
    }

    async fn create_price(&self, price: &PriceData) -> PaymentResult<Price> {
        Ok(Price {
            id: format!("price_{}", price.unit_amount),
            unit_amount: Some(price.unit_amount),
        })
    }

    async fn create_checkout_session(&self, request: &CheckoutRequest) -> PaymentResult<CheckoutSession> {
        let mut checkouts = self.checkouts.lock().unwrap();
        checkouts.push(request.clone());

        let id = format!("cs_test_{}", checkouts.len());
        Ok(CheckoutSession {
            url: Some(format!("https://checkout.test/{}", id)),
            id,
            ..Default::default()
        })
    }

    async fn retrieve_checkout_session(&self, session_id: &str) -> PaymentResult<CheckoutSession> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| PaymentError::Api {
                status: 404,
                message: format!("No such checkout.session: {}", session_id),
            })
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> PaymentResult<Subscription> {
        Ok(Subscription {
            id: subscription_id.to_string(),
            status: Some("active".to_string()),
            ..Default::default()
        })
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> PaymentResult<Subscription> {
        self.retrieve_subscription(subscription_id).await
    }

    async fn cancel_at_period_end(&self, subscription_id: &str) -> PaymentResult<Subscription> {
        self.retrieve_subscription(subscription_id).await
    }
}

/// Mailer that keeps every reset link
#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<(String, String)>>,
}

impl FakeMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `(email, reset_url)` pairs
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Token carried by the most recent link
    pub fn last_token(&self) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .last()
            .and_then(|(_, url)| url.split("token=").nth(1).map(str::to_string))
    }
}

#[async_trait]
impl PasswordResetMailer for FakeMailer {
    async fn send_reset(&self, email: &str, _full_name: &str, reset_url: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), reset_url.to_string()));
        Ok(())
    }
}

/// Test context containing all necessary resources
pub struct TestContext {
    pub app: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    pub payments: Arc<FakePayments>,
    pub mailer: Arc<FakeMailer>,
}

impl TestContext {
    /// Creates a context with testing configuration and empty fakes
    pub fn new() -> Self {
        let config = Config::from_lookup(|key| {
            let value = match key {
                "STOCKWATCH_ENV" => Some("testing"),
                "JWT_SECRET_KEY" => Some(TEST_JWT_SECRET),
                "STRIPE_WEBHOOK_SECRET" => Some(TEST_WEBHOOK_SECRET),
                "BASE_URL" => Some(TEST_BASE_URL),
                "CORS_ORIGINS" => Some("https://app.stockwatch.test"),
                _ => None,
            };
            value.map(str::to_string)
        })
        .expect("test configuration");

        let gateway = FakeGateway::new();
        let payments = FakePayments::new();
        let mailer = FakeMailer::new();

        let state = AppState::new(gateway.clone(), payments.clone(), mailer.clone(), config);
        let app = build_router(state.clone());

        Self {
            app,
            state,
            gateway,
            payments,
            mailer,
        }
    }

    /// Access token for `user_id`
    pub fn access_token(&self, user_id: i64) -> String {
        self.state
            .tokens
            .issue_access(
                user_id.to_string(),
                ProfileClaims {
                    email: "ada@example.com".to_string(),
                    full_name: "Ada Lovelace".to_string(),
                    email_verified: true,
                },
            )
            .expect("access token")
    }

    /// Refresh token for `user_id`
    pub fn refresh_token(&self, user_id: i64) -> String {
        self.state
            .tokens
            .issue_refresh(user_id.to_string())
            .expect("refresh token")
    }

    /// Sends a request and returns the status with the decoded JSON body
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().call(request).await.expect("router call");
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).expect("JSON body")
        };
        (status, json)
    }

    /// POSTs a JSON body without credentials
    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(json_request("POST", uri, None, body)).await
    }

    /// Sends an authenticated request with an optional JSON body
    pub async fn authed(
        &self,
        method: &str,
        uri: &str,
        token: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = match body {
            Some(body) => json_request(method, uri, Some(token), body),
            None => Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        };
        self.send(request).await
    }
}

/// Builds a JSON request
pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }

    builder.body(Body::from(body.to_string())).unwrap()
}
