// handlers.rs
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    Json,
};
use chrono::Utc;
use http::StatusCode;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{Error, Result};
use crate::identity::VoterContext;
use crate::models::{
    CreatePollRequest, PollDetail, PollSummary, UpdatePollRequest, VoteRequest, VoteResponse,
};
use crate::results::PollResults;
use crate::state::AppState;

pub async fn index() -> Json<Value> {
    Json(json!({ "message": "Online Poll API is running" }))
}

/// Create a poll with its options
pub async fn create_poll(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreatePollRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PollDetail>)> {
    let Json(mut request) = payload?;
    request.normalize();
    request.check()?;

    let now = Utc::now();
    let poll_id = state.polls.create_poll(&request, now).await?;
    info!(poll_id, "poll created");

    let detail = load_detail(&state, poll_id).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// List polls, newest first
pub async fn list_polls(State(state): State<AppState>) -> Result<Json<Vec<PollSummary>>> {
    let now = Utc::now();
    let polls = state
        .polls
        .list_polls()
        .await?
        .into_iter()
        .map(|stats| PollSummary::new(stats, now))
        .collect();
    Ok(Json(polls))
}

pub async fn get_poll(
    State(state): State<AppState>,
    path: std::result::Result<Path<i64>, PathRejection>,
) -> Result<Json<PollDetail>> {
    let Path(poll_id) = path?;
    Ok(Json(load_detail(&state, poll_id).await?))
}

/// Admin edit of title, description, active flag or expiry
pub async fn update_poll(
    State(state): State<AppState>,
    path: std::result::Result<Path<i64>, PathRejection>,
    payload: std::result::Result<Json<UpdatePollRequest>, JsonRejection>,
) -> Result<Json<PollDetail>> {
    let Path(poll_id) = path?;
    let Json(mut edit) = payload?;
    edit.normalize();
    edit.check()?;

    if !state.polls.update_poll(poll_id, &edit).await? {
        return Err(Error::NotFound("Poll"));
    }
    state.results.invalidate(poll_id).await;
    info!(poll_id, "poll updated");

    Ok(Json(load_detail(&state, poll_id).await?))
}

pub async fn delete_poll(
    State(state): State<AppState>,
    path: std::result::Result<Path<i64>, PathRejection>,
) -> Result<StatusCode> {
    let Path(poll_id) = path?;
    if !state.polls.delete_poll(poll_id).await? {
        return Err(Error::NotFound("Poll"));
    }
    state.results.invalidate(poll_id).await;
    info!(poll_id, "poll deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Vote for an option
pub async fn vote(
    State(state): State<AppState>,
    path: std::result::Result<Path<i64>, PathRejection>,
    voter: VoterContext,
    payload: std::result::Result<Json<VoteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<VoteResponse>)> {
    let Path(poll_id) = path?;
    let Json(request) = payload?;
    let voter_identifier = voter.voter_identifier(request.voter_identifier.as_deref());

    let receipt = state
        .recorder
        .record_vote(
            poll_id,
            request.option_id,
            &voter_identifier,
            voter.metadata,
            Utc::now(),
        )
        .await?;

    let vote = receipt.vote;
    Ok((
        StatusCode::CREATED,
        Json(VoteResponse {
            id: vote.id,
            poll_id: vote.poll_id,
            option_id: vote.option_id,
            option_text: receipt.option_text,
            voter_identifier: vote.voter_identifier,
            voted_at: vote.voted_at,
        }),
    ))
}

/// Aggregated results, served from cache when fresh
pub async fn poll_results(
    State(state): State<AppState>,
    path: std::result::Result<Path<i64>, PathRejection>,
) -> Result<Json<PollResults>> {
    let Path(poll_id) = path?;
    let results = state.results.get_results(poll_id, Utc::now()).await?;
    Ok(Json(results))
}

async fn load_detail(state: &AppState, poll_id: i64) -> Result<PollDetail> {
    let poll = state
        .polls
        .find_poll(poll_id)
        .await?
        .ok_or(Error::NotFound("Poll"))?;
    let options = state.polls.options_for_poll(poll_id).await?;
    Ok(PollDetail::new(poll, &options, Utc::now()))
}
