/// Donation records
///
/// Donations are written once the payment provider reports a paid checkout
/// session, either from the success redirect or from the webhook. Both paths
/// call `save_donation` with the same session id.

use serde::Serialize;

use super::ModelResult;
use crate::db::{
    gateway::{ProcParams, ProcedureGateway},
    row::{DecodeError, ProcOutcome, ProcRow},
};

/// Status recorded for paid donations
pub const STATUS_COMPLETED: &str = "completed";

/// Status recorded when an asynchronous payment fails
pub const STATUS_FAILED: &str = "failed";

/// A paid donation to record
#[derive(Debug, Clone, PartialEq)]
pub struct NewDonation<'a> {
    pub session_id: &'a str,
    pub donor_name: &'a str,
    pub donor_email: &'a str,
    pub amount: f64,
    pub payment_intent: Option<&'a str>,
}

/// Saves a completed donation
pub async fn save(
    gateway: &dyn ProcedureGateway,
    donation: &NewDonation<'_>,
) -> ModelResult<Option<ProcOutcome>> {
    let rows = gateway
        .call(
            "save_donation",
            ProcParams::new()
                .with("p_session_id", donation.session_id)
                .with("p_donor_name", donation.donor_name)
                .with("p_donor_email", donation.donor_email)
                .with("p_amount", donation.amount)
                .with("p_stripe_payment_intent", donation.payment_intent)
                .with("p_status", STATUS_COMPLETED),
        )
        .await?;

    Ok(ProcOutcome::from_rows(&rows))
}

/// Changes the status of a recorded donation
pub async fn update_status(
    gateway: &dyn ProcedureGateway,
    session_id: &str,
    status: &str,
) -> ModelResult<Option<ProcOutcome>> {
    let rows = gateway
        .call(
            "update_donation_status",
            ProcParams::new()
                .with("p_session_id", session_id)
                .with("p_status", status),
        )
        .await?;

    Ok(ProcOutcome::from_rows(&rows))
}

/// One row of the admin listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DonationRecord {
    pub id: Option<i64>,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
    pub amount: f64,
    pub status: Option<String>,
    pub created_at: Option<String>,
    pub session_id: Option<String>,
}

impl DonationRecord {
    /// Decodes `(id, donor_name, donor_email, amount, status, created_at, session_id)`
    pub fn from_row(row: &ProcRow) -> Result<Self, DecodeError> {
        Ok(Self {
            id: row.int(0)?,
            donor_name: row.text(1)?,
            donor_email: row.text(2)?,
            amount: row.float_or(3, 0.0)?,
            status: row.text(4)?,
            created_at: row.timestamp(5)?,
            session_id: row.text(6)?,
        })
    }

    /// Whether the donation was paid
    pub fn is_completed(&self) -> bool {
        self.status.as_deref() == Some(STATUS_COMPLETED)
    }
}

/// Admin listing with totals
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DonationSummary {
    pub donations: Vec<DonationRecord>,
    pub total_donations: usize,
    pub total_amount: f64,
}

impl DonationSummary {
    /// Totals the listing; only completed donations count towards the amount
    pub fn new(donations: Vec<DonationRecord>) -> Self {
        let total_amount = donations
            .iter()
            .filter(|d| d.is_completed())
            .map(|d| d.amount)
            .sum();

        Self {
            total_donations: donations.len(),
            total_amount,
            donations,
        }
    }
}

/// Lists every donation
pub async fn list_all(gateway: &dyn ProcedureGateway) -> ModelResult<DonationSummary> {
    let rows = gateway.call("get_all_donations", ProcParams::new()).await?;

    let donations = rows
        .iter()
        .map(DonationRecord::from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DonationSummary::new(donations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::row::Scalar;

    fn row(id: i64, amount: &str, status: &str) -> ProcRow {
        ProcRow::new(vec![
            Scalar::Int(id),
            Scalar::from("Grace"),
            Scalar::from("grace@example.com"),
            Scalar::from(amount),
            Scalar::from(status),
            Scalar::Null,
            Scalar::from(format!("cs_{}", id)),
        ])
    }

    #[test]
    fn test_summary_counts_only_completed_amounts() {
        let donations = [row(1, "25.00", "completed"), row(2, "10", "failed"), row(3, "5.5", "completed")]
            .iter()
            .map(|r| DonationRecord::from_row(r).unwrap())
            .collect();

        let summary = DonationSummary::new(donations);
        assert_eq!(summary.total_donations, 3);
        assert_eq!(summary.total_amount, 30.5);
        assert_eq!(summary.donations[2].session_id.as_deref(), Some("cs_3"));
    }

    #[test]
    fn test_empty_summary() {
        let summary = DonationSummary::new(Vec::new());
        assert_eq!(summary.total_donations, 0);
        assert_eq!(summary.total_amount, 0.0);
    }
}
