// identity.rs
//! Who is voting, and from where.

use std::{convert::Infallible, net::IpAddr, net::SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use http::{header::USER_AGENT, request::Parts, HeaderMap};

use crate::state::AppState;
use crate::voting::VoteMetadata;

/// Caller details pulled from request headers and the connection.
#[derive(Debug, Clone, Default)]
pub struct VoterContext {
    /// Identity vouched for by the upstream token issuer.
    pub verified_identity: Option<String>,
    pub metadata: VoteMetadata,
}

impl VoterContext {
    /// The verified identity when there is one, else what the caller supplied.
    pub fn voter_identifier(&self, supplied: Option<&str>) -> String {
        self.verified_identity
            .as_deref()
            .or(supplied)
            .unwrap_or_default()
            .to_string()
    }
}

impl FromRequestParts<AppState> for VoterContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let verified_identity = state
            .config
            .identity_header
            .as_deref()
            .and_then(|name| header_text(&parts.headers, name));

        let ip_address = forwarded_for(&parts.headers)
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip())
            })
            .map(|ip| ip.to_string());

        Ok(Self {
            verified_identity,
            metadata: VoteMetadata {
                ip_address,
                user_agent: header_text(&parts.headers, USER_AGENT.as_str()),
            },
        })
    }
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
}

/// First well-formed address in `X-Forwarded-For`.
fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    header_text(headers, "x-forwarded-for")?
        .split(',')
        .find_map(|candidate| candidate.trim().parse().ok())
}
