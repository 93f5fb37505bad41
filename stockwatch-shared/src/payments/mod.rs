/// Payment provider integration
///
/// - [`provider`]: the [`PaymentProvider`](provider::PaymentProvider) trait and object types
/// - [`stripe`]: the production REST client
/// - [`webhook`]: signature verification for incoming events

pub mod provider;
pub mod stripe;
pub mod webhook;

pub use provider::{PaymentError, PaymentProvider, PaymentResult};
pub use stripe::StripeClient;
