//! HTTP API for the daily challenge
//!
//! ## Player API
//! - `POST /v1/scores/submit` - Submit a color guess
//! - `GET /v1/scores/summary?date=` - Attempts and budget for a day
//! - `GET /v1/scores/history?limit=` - All attempts, newest day first
//! - `GET /v1/leaderboard?date=&limit=&offset=` - Day ranking
//! - `GET /v1/leaderboard/rank?date=` - Caller's position in the day ranking
//!
//! ## Admin API
//! - `POST /v1/admin/targets` - Publish a day's target color
//! - `POST /v1/admin/scores/reset` - Reset a user's day
//! - `POST /v1/admin/items/extra-attempts` - Apply an item the shop already
//!   took out of the user's inventory
//!
//! The caller is identified by the `X-User-Id` header; authentication
//! happens in front of this server. Dates are `YYYY-MM-DD` and default to
//! the current UTC day. Guesses are only accepted for the current day.
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST -H "X-User-Id: alice" \
//!      -d '{"submitted_color_r": 200, "submitted_color_g": 40, "submitted_color_b": 90}' \
//!      http://localhost:8095/v1/scores/submit
//!
//! curl "http://localhost:8095/v1/leaderboard?limit=10"
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use chrono::NaiveDate;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::HeaderMap;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::collaborators::{ItemMetadata, EXTRA_ATTEMPT_EFFECT};
use crate::db::models::{parse_date, today};
use crate::error::ChallengeError;
use crate::scoring::Rgb;
use crate::services::response::{
    created, error_response, from_result, limit_reached, not_found, ok,
};
use crate::services::{Services, SubmitOutcome};

/// Header carrying the authenticated caller's id
pub const USER_ID_HEADER: &str = "x-user-id";

const DEFAULT_HISTORY_LIMIT: u32 = 100;

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    bind_addr: SocketAddr,
    leaderboard_limit: u32,
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    submitted_color_r: i64,
    submitted_color_g: i64,
    submitted_color_b: i64,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtraAttemptsRequest {
    user_id: String,
    #[serde(default)]
    extra_attempts: Option<serde_json::Value>,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PublishTargetRequest {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    color_name: Option<String>,
    r: i64,
    g: i64,
    b: i64,
}

#[derive(Debug, Deserialize)]
struct ResetRequest {
    user_id: String,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DateQuery {
    date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LeaderboardQuery {
    date: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
}

impl HttpServer {
    pub fn new(services: Arc<Services>, bind_addr: SocketAddr, leaderboard_limit: u32) -> Self {
        Self {
            services,
            bind_addr,
            leaderboard_limit,
        }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), ChallengeError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let (parts, body) = req.into_parts();
        let body = body.collect().await?.to_bytes();

        Ok(self
            .route(
                &parts.method,
                parts.uri.path(),
                parts.uri.query(),
                &parts.headers,
                body,
            )
            .await)
    }

    /// Route a fully-read request to its handler
    pub async fn route(
        &self,
        method: &Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Response<Full<Bytes>> {
        debug!(method = %method, path = %path, "Incoming request");

        let result = match (method.clone(), path) {
            (Method::GET, "/health") => self.handle_health().await,

            (Method::POST, "/v1/scores/submit") => self.handle_submit(headers, &body).await,
            (Method::GET, "/v1/scores/summary") => self.handle_summary(headers, query).await,
            (Method::GET, "/v1/scores/history") => self.handle_history(headers, query).await,

            (Method::GET, "/v1/leaderboard") => self.handle_leaderboard(query).await,
            (Method::GET, "/v1/leaderboard/rank") => self.handle_rank(headers, query).await,

            (Method::POST, "/v1/admin/targets") => self.handle_publish_target(&body).await,
            (Method::POST, "/v1/admin/scores/reset") => self.handle_reset(&body).await,
            (Method::POST, "/v1/admin/items/extra-attempts") => {
                self.handle_extra_attempts(&body).await
            }

            _ => Ok(not_found("Not Found")),
        };

        result.unwrap_or_else(error_response)
    }

    /// Health check endpoint
    async fn handle_health(&self) -> Result<Response<Full<Bytes>>, ChallengeError> {
        let db = self.services.db.clone();
        let stats = blocking(move || db.stats()).await?;

        Ok(ok(&serde_json::json!({
            "status": "ok",
            "targets": stats.target_count,
            "attempts": stats.attempt_count,
            "leaderboard_entries": stats.leaderboard_count,
            "settlements": stats.settlement_count,
        })))
    }

    /// POST /v1/scores/submit
    async fn handle_submit(
        &self,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Result<Response<Full<Bytes>>, ChallengeError> {
        let user_id = caller(headers)?;
        let req: SubmitRequest = parse_body(body)?;
        let date = submission_date(req.date.as_deref())?;
        let submitted = Rgb::from_components(
            req.submitted_color_r,
            req.submitted_color_g,
            req.submitted_color_b,
        )?;

        let challenge = self.services.challenge.clone();
        let outcome = blocking(move || challenge.submit_attempt(&user_id, date, submitted)).await?;

        Ok(match outcome {
            SubmitOutcome::Accepted(result) => ok(&result),
            SubmitOutcome::AttemptLimitReached {
                max_attempts,
                attempts_used,
            } => limit_reached(max_attempts, attempts_used),
            SubmitOutcome::NotPublished { date } => {
                not_found(&format!("No target color published for {}", date))
            }
        })
    }

    /// GET /v1/scores/summary
    async fn handle_summary(
        &self,
        headers: &HeaderMap,
        query: Option<&str>,
    ) -> Result<Response<Full<Bytes>>, ChallengeError> {
        let user_id = caller(headers)?;
        let q: DateQuery = parse_query(query)?;
        let date = date_or_today(q.date.as_deref())?;

        let challenge = self.services.challenge.clone();
        Ok(from_result(
            blocking(move || challenge.get_user_day_summary(&user_id, date)).await,
        ))
    }

    /// GET /v1/scores/history
    async fn handle_history(
        &self,
        headers: &HeaderMap,
        query: Option<&str>,
    ) -> Result<Response<Full<Bytes>>, ChallengeError> {
        let user_id = caller(headers)?;
        let q: HistoryQuery = parse_query(query)?;
        let limit = q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);

        let challenge = self.services.challenge.clone();
        Ok(from_result(
            blocking(move || challenge.get_user_history(&user_id, limit)).await,
        ))
    }

    /// GET /v1/leaderboard
    async fn handle_leaderboard(&self, query: Option<&str>) -> Result<Response<Full<Bytes>>, ChallengeError> {
        let q: LeaderboardQuery = parse_query(query)?;
        let date = date_or_today(q.date.as_deref())?;
        let limit = q.limit.unwrap_or(self.leaderboard_limit);
        let offset = q.offset.unwrap_or(0);

        let challenge = self.services.challenge.clone();
        Ok(from_result(
            blocking(move || challenge.get_leaderboard(date, limit, offset)).await,
        ))
    }

    /// GET /v1/leaderboard/rank
    async fn handle_rank(
        &self,
        headers: &HeaderMap,
        query: Option<&str>,
    ) -> Result<Response<Full<Bytes>>, ChallengeError> {
        let user_id = caller(headers)?;
        let q: DateQuery = parse_query(query)?;
        let date = date_or_today(q.date.as_deref())?;

        let challenge = self.services.challenge.clone();
        let rank = {
            let user_id = user_id.clone();
            blocking(move || challenge.user_rank(&user_id, date)).await?
        };

        Ok(ok(&serde_json::json!({
            "userId": user_id,
            "date": date,
            "rank": rank,
        })))
    }

    /// POST /v1/admin/items/extra-attempts
    async fn handle_extra_attempts(&self, body: &Bytes) -> Result<Response<Full<Bytes>>, ChallengeError> {
        let req: ExtraAttemptsRequest = parse_body(body)?;
        let user_id = req.user_id;
        let date = date_or_today(req.date.as_deref())?;

        let mut metadata = serde_json::json!({ "effect_type": EXTRA_ATTEMPT_EFFECT });
        if let Some(extra) = req.extra_attempts {
            metadata["extra_attempts"] = extra;
        }
        let item = ItemMetadata(metadata);

        let challenge = self.services.challenge.clone();
        Ok(from_result(
            blocking(move || challenge.use_extra_attempt_item(&user_id, date, &item)).await,
        ))
    }

    /// POST /v1/admin/targets
    async fn handle_publish_target(&self, body: &Bytes) -> Result<Response<Full<Bytes>>, ChallengeError> {
        let req: PublishTargetRequest = parse_body(body)?;
        let date = date_or_today(req.date.as_deref())?;
        let color = Rgb::from_components(req.r, req.g, req.b)?;

        let challenge = self.services.challenge.clone();
        let published =
            blocking(move || challenge.publish_target(date, req.color_name.as_deref(), color)).await?;

        Ok(if published.created {
            created(&published)
        } else {
            ok(&published)
        })
    }

    /// POST /v1/admin/scores/reset
    async fn handle_reset(&self, body: &Bytes) -> Result<Response<Full<Bytes>>, ChallengeError> {
        let req: ResetRequest = parse_body(body)?;
        let date = date_or_today(req.date.as_deref())?;

        let challenge = self.services.challenge.clone();
        Ok(from_result(
            blocking(move || challenge.reset_user_day(&req.user_id, date)).await,
        ))
    }
}

/// Run synchronous service work off the async runtime
async fn blocking<T, F>(f: F) -> Result<T, ChallengeError>
where
    F: FnOnce() -> Result<T, ChallengeError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ChallengeError::Internal(format!("Blocking task failed: {}", e)))?
}

fn caller(headers: &HeaderMap) -> Result<String, ChallengeError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ChallengeError::InvalidInput("missing X-User-Id header".to_string()))
}

fn date_or_today(raw: Option<&str>) -> Result<NaiveDate, ChallengeError> {
    match raw {
        Some(raw) if !raw.is_empty() => parse_date(raw),
        _ => Ok(today()),
    }
}

/// Players only guess at the current day; an explicit date must match it
fn submission_date(raw: Option<&str>) -> Result<NaiveDate, ChallengeError> {
    let today = today();
    let date = date_or_today(raw)?;
    if date != today {
        return Err(ChallengeError::InvalidInput(format!(
            "guesses are only accepted for {}",
            today
        )));
    }
    Ok(date)
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ChallengeError> {
    if body.is_empty() {
        return Err(ChallengeError::InvalidInput("request body is required".to_string()));
    }
    Ok(serde_json::from_slice(body)?)
}

fn parse_query<T: DeserializeOwned + Default>(query: Option<&str>) -> Result<T, ChallengeError> {
    match query {
        Some(q) if !q.is_empty() => serde_urlencoded::from_str(q)
            .map_err(|e| ChallengeError::InvalidInput(format!("invalid query: {}", e))),
        _ => Ok(T::default()),
    }
}
