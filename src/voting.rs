// voting.rs
//! Recording votes: availability, one-vote-per-voter and the option counter.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::cache::ResultCache;
use crate::error::{Error, Result};
use crate::lifecycle;
use crate::models::Vote;
use crate::results;
use crate::store::{NewVote, PollStore};

const MAX_VOTER_IDENTIFIER_LEN: usize = 255;
const MAX_USER_AGENT_LEN: usize = 255;

/// Request details stored alongside a vote.
#[derive(Debug, Clone, Default)]
pub struct VoteMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VoteReceipt {
    pub vote: Vote,
    pub option_text: String,
}

#[derive(Clone)]
pub struct VoteRecorder {
    store: PollStore,
    cache: Arc<dyn ResultCache>,
}

impl VoteRecorder {
    pub fn new(store: PollStore, cache: Arc<dyn ResultCache>) -> Self {
        Self { store, cache }
    }

    #[instrument(skip(self, voter_identifier, metadata, now))]
    pub async fn record_vote(
        &self,
        poll_id: i64,
        option_id: i64,
        voter_identifier: &str,
        metadata: VoteMetadata,
        now: DateTime<Utc>,
    ) -> Result<VoteReceipt> {
        let voter = voter_identifier.trim();
        if voter.is_empty() {
            return Err(Error::invalid("voter_identifier", "This field is required."));
        }
        if voter.chars().count() > MAX_VOTER_IDENTIFIER_LEN {
            return Err(Error::invalid(
                "voter_identifier",
                "Voter identifier must be at most 255 characters.",
            ));
        }

        let poll = self
            .store
            .find_poll(poll_id)
            .await?
            .ok_or(Error::NotFound("Poll"))?;
        let option = self
            .store
            .find_option(poll_id, option_id)
            .await?
            .ok_or(Error::NotFound("Option"))?;

        if !lifecycle::is_available(&poll, now) {
            return Err(Error::PollClosed);
        }

        // fast path only; the unique index settles races
        if !poll.allow_multiple_votes && self.store.has_voted(poll_id, voter).await? {
            return Err(Error::DuplicateVote);
        }

        let user_agent = metadata
            .user_agent
            .as_deref()
            .map(|ua| truncate(ua, MAX_USER_AGENT_LEN));

        let vote = self
            .store
            .insert_vote(&NewVote {
                poll_id,
                option_id,
                voter_identifier: voter,
                voted_at: now,
                ip_address: metadata.ip_address.as_deref(),
                user_agent,
                one_per_voter: !poll.allow_multiple_votes,
            })
            .await?;

        results::invalidate(self.cache.as_ref(), poll_id).await;
        info!(vote_id = vote.id, "vote recorded");

        Ok(VoteReceipt {
            vote,
            option_text: option.text,
        })
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
