/// Password-reset notifications
///
/// Delivery of reset links sits behind [`PasswordResetMailer`]. The service
/// ships with [`LogMailer`], which writes the link to the log instead of
/// sending mail.

use async_trait::async_trait;

/// Subject line of the reset message
pub const RESET_SUBJECT: &str = "Reset Your StockWatch Password";

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to deliver notification: {0}")]
    Delivery(String),
}

/// Sends password-reset links
#[async_trait]
pub trait PasswordResetMailer: Send + Sync {
    async fn send_reset(&self, email: &str, full_name: &str, reset_url: &str) -> Result<(), NotifyError>;
}

/// Mailer that only logs the message
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl PasswordResetMailer for LogMailer {
    async fn send_reset(&self, email: &str, full_name: &str, reset_url: &str) -> Result<(), NotifyError> {
        tracing::info!(
            to = email,
            name = full_name,
            subject = RESET_SUBJECT,
            reset_url,
            "Password reset link generated"
        );
        Ok(())
    }
}
