// state.rs
use std::sync::Arc;

use sqlx::SqlitePool;

use crate::cache::ResultCache;
use crate::config::Config;
use crate::results::ResultAggregator;
use crate::store::PollStore;
use crate::voting::VoteRecorder;

/// Shared handles given to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub polls: PollStore,
    pub recorder: VoteRecorder,
    pub results: ResultAggregator,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool, cache: Arc<dyn ResultCache>) -> Self {
        let polls = PollStore::new(pool);
        let recorder = VoteRecorder::new(polls.clone(), cache.clone());
        let results = ResultAggregator::new(polls.clone(), cache, config.results_cache_ttl);

        Self {
            config: Arc::new(config),
            polls,
            recorder,
            results,
        }
    }
}
