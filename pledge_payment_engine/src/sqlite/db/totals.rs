use chrono::Utc;
use ppg_common::Money;
use sqlx::SqliteConnection;

use crate::{db_types::CampaignTotals, traits::PaymentGatewayError};

/// Aggregates directly over the base table. This is the authoritative (slowest) tier of the totals read path; only
/// completed pledges count.
pub async fn compute_totals(
    campaign_id: &str,
    conn: &mut SqliteConnection,
) -> Result<CampaignTotals, PaymentGatewayError> {
    let (pledge_count, total_amount, unique_donors): (i64, i64, i64) = sqlx::query_as(
        r#"
            SELECT COUNT(*), COALESCE(SUM(amount), 0), COUNT(DISTINCT donor_email)
            FROM pledges
            WHERE campaign_id = $1 AND status = 'Completed';
        "#,
    )
    .bind(campaign_id)
    .fetch_one(conn)
    .await?;
    Ok(CampaignTotals {
        campaign_id: campaign_id.to_string(),
        pledge_count,
        total_amount: Money::from(total_amount),
        unique_donors,
        computed_at: Utc::now(),
    })
}

pub async fn fetch_snapshot(
    campaign_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<CampaignTotals>, sqlx::Error> {
    let snapshot = sqlx::query_as("SELECT * FROM campaign_totals WHERE campaign_id = $1")
        .bind(campaign_id)
        .fetch_optional(conn)
        .await?;
    Ok(snapshot)
}

pub async fn upsert_snapshot(totals: &CampaignTotals, conn: &mut SqliteConnection) -> Result<(), PaymentGatewayError> {
    sqlx::query(
        r#"
            INSERT INTO campaign_totals (campaign_id, pledge_count, total_amount, unique_donors, computed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (campaign_id) DO UPDATE SET
                pledge_count = excluded.pledge_count,
                total_amount = excluded.total_amount,
                unique_donors = excluded.unique_donors,
                computed_at = excluded.computed_at;
        "#,
    )
    .bind(&totals.campaign_id)
    .bind(totals.pledge_count)
    .bind(totals.total_amount.value())
    .bind(totals.unique_donors)
    .bind(totals.computed_at)
    .execute(conn)
    .await?;
    Ok(())
}
