// results.rs
//! Aggregated poll results behind a short-lived cache.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::cache::ResultCache;
use crate::error::{Error, Result};
use crate::lifecycle;
use crate::models::{tally, OptionTally, Poll, PollOption};
use crate::store::PollStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResults {
    pub poll_id: i64,
    pub title: String,
    pub description: String,
    pub status: PollStatus,
    pub options: Vec<OptionTally>,
    pub total_votes: i64,
    /// Every option sharing the top count; `None` until a vote is cast.
    pub winner: Option<Vec<OptionTally>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl PollResults {
    pub fn compute(poll: &Poll, options: &[PollOption], now: DateTime<Utc>) -> Self {
        let (total_votes, options) = tally(options);

        let winner = if total_votes == 0 {
            None
        } else {
            let top = options.iter().map(|o| o.vote_count).max().unwrap_or(0);
            Some(
                options
                    .iter()
                    .filter(|o| o.vote_count == top)
                    .cloned()
                    .collect(),
            )
        };

        let status = if lifecycle::is_available(poll, now) {
            PollStatus::Open
        } else {
            PollStatus::Closed
        };

        Self {
            poll_id: poll.id,
            title: poll.title.clone(),
            description: poll.description.clone(),
            status,
            options,
            total_votes,
            winner,
            created_at: poll.created_at,
            expires_at: poll.expires_at,
        }
    }
}

pub fn cache_key(poll_id: i64) -> String {
    format!("poll_results:{poll_id}")
}

/// Drops the cached results for a poll. Failures are logged; the TTL still bounds staleness.
pub async fn invalidate(cache: &dyn ResultCache, poll_id: i64) {
    if let Err(e) = cache.delete(&cache_key(poll_id)).await {
        warn!(poll_id, error = %e, "failed to invalidate cached results");
    }
}

#[derive(Clone)]
pub struct ResultAggregator {
    store: PollStore,
    cache: Arc<dyn ResultCache>,
    ttl: Duration,
}

impl ResultAggregator {
    pub fn new(store: PollStore, cache: Arc<dyn ResultCache>, ttl: Duration) -> Self {
        Self { store, cache, ttl }
    }

    #[instrument(skip(self, now))]
    pub async fn get_results(&self, poll_id: i64, now: DateTime<Utc>) -> Result<PollResults> {
        let key = cache_key(poll_id);

        match self.cache.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(results) => {
                    debug!("results served from cache");
                    return Ok(results);
                }
                Err(e) => warn!(error = %e, "discarding undecodable cached results"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "results cache unavailable, recomputing"),
        }

        let poll = self
            .store
            .find_poll(poll_id)
            .await?
            .ok_or(Error::NotFound("Poll"))?;
        let options = self.store.options_for_poll(poll_id).await?;
        let results = PollResults::compute(&poll, &options, now);

        let bytes = serde_json::to_vec(&results)?;
        if let Err(e) = self.cache.set(&key, bytes, self.ttl).await {
            warn!(error = %e, "failed to cache results");
        }

        Ok(results)
    }

    pub async fn invalidate(&self, poll_id: i64) {
        invalidate(self.cache.as_ref(), poll_id).await;
    }
}
