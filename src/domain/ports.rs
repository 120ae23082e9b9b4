use crate::domain::market::Timeframe;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// External feature engine that turns raw candles into `FeatureRow`s.
///
/// The ML pipeline only asks it to bring the feature store up to date; the
/// feature math itself lives outside this crate.
#[async_trait]
pub trait FeatureEngine: Send + Sync {
    /// Recompute features for `interval` up to `now`. Returns rows written.
    async fn refresh(&self, interval: Timeframe, now: DateTime<Utc>) -> Result<usize>;
}
