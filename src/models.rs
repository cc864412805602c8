// models.rs
use std::{borrow::Cow, collections::HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use validator::{Validate, ValidationError};

use crate::error::{self, collect_field_errors, Error, FieldErrors};
use crate::lifecycle;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Poll {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub allow_multiple_votes: bool,
    pub created_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PollOption {
    pub id: i64,
    pub poll_id: i64,
    pub text: String,
    #[sqlx(rename = "display_order")]
    pub order: i64,
    pub vote_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub id: i64,
    pub poll_id: i64,
    pub option_id: i64,
    pub voter_identifier: String,
    pub voted_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// A poll row joined with its option aggregates.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PollStats {
    #[sqlx(flatten)]
    pub poll: Poll,
    pub total_votes: i64,
    pub options_count: i64,
}

// ---- requests ----

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePollRequest {
    #[validate(length(min = 1, max = 255, message = "Title must be between 1 and 255 characters."))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[validate(custom(function = "in_the_future"))]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub allow_multiple_votes: bool,
    #[serde(default)]
    #[validate(length(max = 100, message = "Creator label must be at most 100 characters."))]
    pub created_by: String,
    #[validate(length(min = 2, message = "Poll must have at least 2 options."))]
    #[validate(custom(function = "distinct_option_texts"))]
    pub options: Vec<NewOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewOption {
    #[validate(length(min = 1, max = 255, message = "Option text must be between 1 and 255 characters."))]
    pub text: String,
    #[serde(default)]
    #[validate(range(min = 0, message = "Order must not be negative."))]
    pub order: i64,
}

impl CreatePollRequest {
    /// Trims free text in place so validation sees what will be stored.
    pub fn normalize(&mut self) {
        self.title = self.title.trim().to_string();
        self.created_by = self.created_by.trim().to_string();
        for option in &mut self.options {
            option.text = option.text.trim().to_string();
        }
    }

    /// Validates the poll and each option, keying option errors as `options[i].field`.
    pub fn check(&self) -> error::Result<()> {
        let mut fields = FieldErrors::new();
        if let Err(errors) = self.validate() {
            collect_field_errors(&errors, "", &mut fields);
        }
        for (i, option) in self.options.iter().enumerate() {
            if let Err(errors) = option.validate() {
                collect_field_errors(&errors, &format!("options[{i}]."), &mut fields);
            }
        }

        if fields.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidInput(fields))
        }
    }
}

/// Admin edit. `allow_multiple_votes` is fixed at creation.
///
/// `expires_at` is three-state: absent keeps the stored expiry, `null` removes it and a
/// timestamp replaces it.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdatePollRequest {
    #[validate(length(min = 1, max = 255, message = "Title must be between 1 and 255 characters."))]
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

impl UpdatePollRequest {
    pub fn normalize(&mut self) {
        if let Some(title) = &mut self.title {
            *title = title.trim().to_string();
        }
    }

    pub fn check(&self) -> error::Result<()> {
        let mut fields = FieldErrors::new();
        if let Err(errors) = self.validate() {
            collect_field_errors(&errors, "", &mut fields);
        }
        if let Some(Some(expires_at)) = &self.expires_at {
            if let Err(err) = in_the_future(expires_at) {
                let message = err.message.map(|m| m.to_string()).unwrap_or_default();
                fields.entry("expires_at".to_string()).or_default().push(message);
            }
        }

        if fields.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidInput(fields))
        }
    }
}

/// Distinguishes an explicit `null` from a missing field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub option_id: i64,
    #[serde(default)]
    pub voter_identifier: Option<String>,
}

fn default_true() -> bool {
    true
}

fn in_the_future(value: &DateTime<Utc>) -> Result<(), ValidationError> {
    if *value <= Utc::now() {
        let mut err = ValidationError::new("expires_in_past");
        err.message = Some(Cow::Borrowed("Expiry date must be in the future."));
        return Err(err);
    }
    Ok(())
}

fn distinct_option_texts(options: &[NewOption]) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    if options.iter().all(|option| seen.insert(option.text.as_str())) {
        return Ok(());
    }
    let mut err = ValidationError::new("duplicate_option");
    err.message = Some(Cow::Borrowed("Option texts must be unique within a poll."));
    Err(err)
}

// ---- responses ----

#[derive(Debug, Serialize)]
pub struct PollSummary {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_expired: bool,
    pub total_votes: i64,
    pub options_count: i64,
}

impl PollSummary {
    pub fn new(stats: PollStats, now: DateTime<Utc>) -> Self {
        let is_expired = lifecycle::is_expired(&stats.poll, now);
        let poll = stats.poll;
        Self {
            id: poll.id,
            title: poll.title,
            description: poll.description,
            created_at: poll.created_at,
            expires_at: poll.expires_at,
            is_active: poll.is_active,
            is_expired,
            total_votes: stats.total_votes,
            options_count: stats.options_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTally {
    pub id: i64,
    pub text: String,
    pub order: i64,
    pub vote_count: i64,
    pub percentage: f64,
}

#[derive(Debug, Serialize)]
pub struct PollDetail {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub allow_multiple_votes: bool,
    pub created_by: String,
    pub is_expired: bool,
    pub is_available: bool,
    pub total_votes: i64,
    pub options: Vec<OptionTally>,
}

impl PollDetail {
    pub fn new(poll: Poll, options: &[PollOption], now: DateTime<Utc>) -> Self {
        let (total_votes, options) = tally(options);
        Self {
            is_expired: lifecycle::is_expired(&poll, now),
            is_available: lifecycle::is_available(&poll, now),
            id: poll.id,
            title: poll.title,
            description: poll.description,
            created_at: poll.created_at,
            expires_at: poll.expires_at,
            is_active: poll.is_active,
            allow_multiple_votes: poll.allow_multiple_votes,
            created_by: poll.created_by,
            total_votes,
            options,
        }
    }
}

/// Totals the denormalized counters and attaches a percentage to each option.
pub fn tally(options: &[PollOption]) -> (i64, Vec<OptionTally>) {
    let total: i64 = options.iter().map(|o| o.vote_count).sum();
    let tallies = options
        .iter()
        .map(|o| OptionTally {
            id: o.id,
            text: o.text.clone(),
            order: o.order,
            vote_count: o.vote_count,
            percentage: percentage(o.vote_count, total),
        })
        .collect();
    (total, tallies)
}

/// `round(count / total * 100, 2)`, or 0.0 when nothing has been cast.
pub fn percentage(count: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = count as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

#[derive(Debug, Serialize)]
pub struct VoteResponse {
    pub id: i64,
    pub poll_id: i64,
    pub option_id: i64,
    pub option_text: String,
    pub voter_identifier: String,
    pub voted_at: DateTime<Utc>,
}
