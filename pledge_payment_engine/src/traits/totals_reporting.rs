use crate::{db_types::CampaignTotals, traits::PaymentGatewayError};

/// The backend contract for the totals read path.
///
/// `compute_campaign_totals` is the authoritative (and most expensive) source; the snapshot methods back the
/// precomputed middle tier. Snapshot rows are advisory and may be dropped or rebuilt at any time.
#[allow(async_fn_in_trait)]
pub trait TotalsReporting: Clone {
    /// Aggregates directly over the completed pledges of the campaign. Strongly consistent.
    async fn compute_campaign_totals(&self, campaign_id: &str) -> Result<CampaignTotals, PaymentGatewayError>;

    /// The precomputed snapshot for the campaign, if one has been materialized.
    async fn fetch_totals_snapshot(&self, campaign_id: &str) -> Result<Option<CampaignTotals>, PaymentGatewayError>;

    /// Replaces the campaign's snapshot with freshly computed totals.
    async fn upsert_totals_snapshot(&self, totals: &CampaignTotals) -> Result<(), PaymentGatewayError>;
}
