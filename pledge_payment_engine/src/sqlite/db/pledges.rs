use chrono::{DateTime, Utc};
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewPledge, Pledge, PledgeId, PledgeStatus},
    traits::PaymentGatewayError,
};

/// Inserts a new pledge row. This is not atomic on its own. The outbox write path embeds this call inside a
/// transaction together with [`super::outbox::insert_event`], passing `&mut *tx` as the connection argument.
pub async fn insert_pledge(pledge: NewPledge, conn: &mut SqliteConnection) -> Result<Pledge, PaymentGatewayError> {
    let pledge: Pledge = sqlx::query_as(
        r#"
            INSERT INTO pledges (pledge_id, campaign_id, donor_email, amount, currency)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(pledge.pledge_id)
    .bind(pledge.campaign_id)
    .bind(pledge.donor_email)
    .bind(pledge.amount.value())
    .bind(pledge.currency)
    .fetch_one(conn)
    .await?;
    debug!("🪙️ Pledge [{}] inserted with id {}", pledge.pledge_id, pledge.id);
    Ok(pledge)
}

pub async fn fetch_pledge_by_pledge_id(
    pledge_id: &PledgeId,
    conn: &mut SqliteConnection,
) -> Result<Option<Pledge>, sqlx::Error> {
    let pledge = sqlx::query_as("SELECT * FROM pledges WHERE pledge_id = $1")
        .bind(pledge_id.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(pledge)
}

/// Records the external payment reference on the pledge once its payment intent exists.
pub async fn link_payment_reference(
    pledge_id: &PledgeId,
    external_reference: &str,
    conn: &mut SqliteConnection,
) -> Result<Pledge, PaymentGatewayError> {
    let result: Option<Pledge> = sqlx::query_as(
        "UPDATE pledges SET payment_reference = $1, updated_at = CURRENT_TIMESTAMP WHERE pledge_id = $2 RETURNING *",
    )
    .bind(external_reference)
    .bind(pledge_id.as_str())
    .fetch_optional(conn)
    .await?;
    result.ok_or_else(|| PaymentGatewayError::PledgeNotFound(pledge_id.clone()))
}

/// Moves the pledge to a new status, bumping its version. Called by the state machine when a payment reaches an
/// aggregate-relevant state, inside the same transaction as the payment mutation.
pub async fn update_pledge_status(
    pledge_id: &PledgeId,
    status: PledgeStatus,
    updated_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Pledge, PaymentGatewayError> {
    let result: Option<Pledge> = sqlx::query_as(
        r#"
            UPDATE pledges SET status = $1, version = version + 1, updated_at = $2
            WHERE pledge_id = $3
            RETURNING *;
        "#,
    )
    .bind(status.to_string())
    .bind(updated_at)
    .bind(pledge_id.as_str())
    .fetch_optional(conn)
    .await?;
    result.ok_or_else(|| PaymentGatewayError::PledgeNotFound(pledge_id.clone()))
}

#[cfg(test)]
mod test {
    use ppg_common::Money;

    use super::*;
    use crate::{db_types::NewOutboxEvent, events::OutboxEventType, sqlite::db::outbox, SqliteDatabase};

    async fn test_db() -> SqliteDatabase {
        let url = crate::sqlite::sqlite_impl::test_support::random_db_url();
        crate::sqlite::sqlite_impl::test_support::create_test_database(&url).await
    }

    #[tokio::test]
    async fn rolled_back_transaction_leaves_no_rows() {
        let db = test_db().await;
        let mut tx = db.pool().begin().await.unwrap();
        let pledge = NewPledge::new(PledgeId::from("pl-rollback".to_string()), "camp-1", "a@b.c", Money::from(500));
        let pledge = insert_pledge(pledge, &mut tx).await.unwrap();
        let event = NewOutboxEvent::new(
            pledge.pledge_id.as_str(),
            OutboxEventType::PledgeCreated,
            &serde_json::json!({"pledge_id": pledge.pledge_id}),
        )
        .unwrap();
        outbox::insert_event(event, &mut tx).await.unwrap();
        // drop the transaction without committing -> both writes must vanish
        drop(tx);

        let mut conn = db.pool().acquire().await.unwrap();
        let found = fetch_pledge_by_pledge_id(&PledgeId::from("pl-rollback".to_string()), &mut conn).await.unwrap();
        assert!(found.is_none());
        let events = outbox::fetch_unpublished(10, 10, &mut conn).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn status_update_bumps_version() {
        let db = test_db().await;
        let mut conn = db.pool().acquire().await.unwrap();
        let pledge = NewPledge::new(PledgeId::from("pl-status".to_string()), "camp-1", "a@b.c", Money::from(500));
        let pledge = insert_pledge(pledge, &mut conn).await.unwrap();
        assert_eq!(pledge.status, PledgeStatus::Pending);
        assert_eq!(pledge.version, 1);
        let updated =
            update_pledge_status(&pledge.pledge_id, PledgeStatus::Completed, Utc::now(), &mut conn).await.unwrap();
        assert_eq!(updated.status, PledgeStatus::Completed);
        assert_eq!(updated.version, 2);
    }
}
