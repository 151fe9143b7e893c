use std::fmt::Display;

use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    cache::TtlCache,
    db_types::CampaignTotals,
    traits::{PaymentGatewayError, TotalsReporting},
};

//--------------------------------------      DataSource     ---------------------------------------------------------
/// Which tier answered a totals read. Surfaced to callers so they can see the consistency they got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// The hot cache (volatile, short TTL).
    Cache,
    /// The precomputed snapshot table.
    View,
    /// A direct aggregate over the base tables. Strongly consistent.
    Base,
}

impl Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Cache => write!(f, "cache"),
            DataSource::View => write!(f, "view"),
            DataSource::Base => write!(f, "base"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TotalsResult {
    pub totals: CampaignTotals,
    pub data_source: DataSource,
}

//--------------------------------------      TotalsApi      ---------------------------------------------------------
/// The tiered totals read path: hot cache → precomputed snapshot → base tables. The cache handle is injected and
/// shared with the invalidation worker, so a completion event drops the hot entry for everyone at once.
pub struct TotalsApi<B> {
    db: B,
    hot_cache: TtlCache<CampaignTotals>,
}

impl<B> TotalsApi<B> {
    pub fn new(db: B, hot_cache: TtlCache<CampaignTotals>) -> Self {
        Self { db, hot_cache }
    }
}

impl<B> Clone for TotalsApi<B>
where B: Clone
{
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), hot_cache: self.hot_cache.clone() }
    }
}

impl<B> TotalsApi<B>
where B: TotalsReporting
{
    /// Reads the totals for one campaign.
    ///
    /// With `realtime = true` every cache tier is bypassed and the result is aggregated from the base tables —
    /// strongly consistent, more expensive, to be used sparingly. The default path is eventually consistent: hot
    /// cache first, then the precomputed snapshot (which warms the hot cache), then the base tables (which warm
    /// both tiers).
    pub async fn campaign_totals(&self, campaign_id: &str, realtime: bool) -> Result<TotalsResult, PaymentGatewayError> {
        if realtime {
            let totals = self.db.compute_campaign_totals(campaign_id).await?;
            return Ok(TotalsResult { totals, data_source: DataSource::Base });
        }
        if let Some(totals) = self.hot_cache.get(campaign_id).await {
            trace!("📊️ Totals for campaign {campaign_id} served from the hot cache");
            return Ok(TotalsResult { totals, data_source: DataSource::Cache });
        }
        if let Some(totals) = self.db.fetch_totals_snapshot(campaign_id).await? {
            self.hot_cache.insert(campaign_id, totals.clone()).await;
            trace!("📊️ Totals for campaign {campaign_id} served from the snapshot");
            return Ok(TotalsResult { totals, data_source: DataSource::View });
        }
        // Nothing precomputed yet: fall through to the base tables and warm both tiers on the way out.
        let totals = self.db.compute_campaign_totals(campaign_id).await?;
        self.hot_cache.insert(campaign_id, totals.clone()).await;
        self.db.upsert_totals_snapshot(&totals).await?;
        debug!("📊️ Totals for campaign {campaign_id} computed from the base tables and cached");
        Ok(TotalsResult { totals, data_source: DataSource::Base })
    }

    /// Recomputes the snapshot for one campaign from the base tables. Returns the fresh totals.
    pub async fn refresh_snapshot(&self, campaign_id: &str) -> Result<CampaignTotals, PaymentGatewayError> {
        let totals = self.db.compute_campaign_totals(campaign_id).await?;
        self.db.upsert_totals_snapshot(&totals).await?;
        debug!("📊️ Snapshot for campaign {campaign_id} refreshed");
        Ok(totals)
    }

    /// Reacts to an aggregate-changing completion event: the hot-cache entry is dropped immediately and the
    /// snapshot rebuilt, so the next cached read reflects the new value.
    pub async fn invalidate(&self, campaign_id: &str) -> Result<(), PaymentGatewayError> {
        self.hot_cache.remove(campaign_id).await;
        self.refresh_snapshot(campaign_id).await?;
        info!("♻️ Totals cache invalidated for campaign {campaign_id}");
        Ok(())
    }
}
