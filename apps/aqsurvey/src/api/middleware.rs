//! # Middleware Module
//!
//! Request rate limiting for the participant API.
//!
//! Two quotas apply:
//! - a global one across all clients (`server.rate_limit`)
//! - one per participant id, taken from `/participants/{id}/...` paths
//!   (`server.participant_rate_limit`)
//!
//! A quota of 0 disables that limiter.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use governor::{DefaultDirectRateLimiter, DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Keyed state is pruned once this many participant ids are tracked.
const MAX_TRACKED_PARTICIPANTS: usize = 10_000;

// =============================================================================
// RATE LIMITS
// =============================================================================

/// Both limiters, cheap to clone into the middleware state.
#[derive(Clone, Default)]
pub struct RateLimits {
    global: Option<Arc<DefaultDirectRateLimiter>>,
    participant: Option<Arc<DefaultKeyedRateLimiter<String>>>,
}

impl RateLimits {
    /// Build the limiters; `0` leaves one out.
    pub fn new(global_rps: u32, participant_rps: u32) -> Self {
        Self {
            global: NonZeroU32::new(global_rps)
                .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps)))),
            participant: NonZeroU32::new(participant_rps)
                .map(|rps| Arc::new(RateLimiter::keyed(Quota::per_second(rps)))),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.global.is_some() || self.participant.is_some()
    }

    /// Admit or reject one request for `path`.
    pub fn check(&self, path: &str) -> Result<(), &'static str> {
        if let Some(global) = &self.global
            && global.check().is_err()
        {
            return Err("global");
        }

        if let (Some(limiter), Some(participant)) = (&self.participant, participant_from_path(path))
        {
            if limiter.len() > MAX_TRACKED_PARTICIPANTS {
                limiter.retain_recent();
            }
            if limiter.check_key(&participant.to_string()).is_err() {
                return Err("participant");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("global", &self.global.is_some())
            .field("participant", &self.participant.is_some())
            .finish()
    }
}

/// Participant id segment of `/participants/{id}` and its sub-routes.
pub fn participant_from_path(path: &str) -> Option<&str> {
    path.strip_prefix("/participants/")?
        .split('/')
        .next()
        .filter(|id| !id.is_empty())
}

/// Returns 429 Too Many Requests when a quota is exhausted.
pub async fn rate_limit_middleware(
    State(limits): State<RateLimits>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    match limits.check(request.uri().path()) {
        Ok(()) => Ok(next.run(request).await),
        Err(scope) => {
            tracing::warn!(scope, path = request.uri().path(), "Rate limit exceeded");
            Err((StatusCode::TOO_MANY_REQUESTS, "Too Many Requests"))
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
