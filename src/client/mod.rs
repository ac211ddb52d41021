//! Bulk match API client
//!
//! One request per batch. Every response is classified into a per-record
//! [`EnrichmentResult`]; only an exhausted-credits response is surfaced as an
//! error, because no later batch could succeed either.

use crate::error::{Error, Result};
use crate::record::Record;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, warn};

#[cfg(test)]
mod tests;

pub const DEFAULT_ENDPOINT: &str = "https://api.apollo.io/api/v1/people/bulk_match";

const NO_EMAIL_FOUND: &str = "No email found";
const QUOTA_MARKERS: [&str; 1] = ["insufficient credits"];

/// API credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Outcome of enriching a single record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EnrichmentResult {
    Email(String),
    NoEmailFound,
    ValidationError,
    ApiError,
    HttpError,
}

impl EnrichmentResult {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            EnrichmentResult::ValidationError
                | EnrichmentResult::ApiError
                | EnrichmentResult::HttpError
        )
    }
}

impl fmt::Display for EnrichmentResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnrichmentResult::Email(email) => f.write_str(email),
            EnrichmentResult::NoEmailFound => f.write_str(NO_EMAIL_FOUND),
            EnrichmentResult::ValidationError => f.write_str("Validation Error"),
            EnrichmentResult::ApiError => f.write_str("API Error"),
            EnrichmentResult::HttpError => f.write_str("HTTP Error"),
        }
    }
}

/// Enrichment backend used by the batch scheduler.
///
/// Implementations must return exactly one result per input record, in input
/// order. `Err` is reserved for conditions that abort the whole job.
#[async_trait]
pub trait EnrichmentApi: Send + Sync {
    async fn enrich(&self, records: &[Record], key: &ApiKey) -> Result<Vec<EnrichmentResult>>;
}

#[derive(Debug, Serialize)]
struct BulkMatchRequest<'a> {
    details: &'a [Record],
}

#[derive(Debug, Deserialize)]
struct BulkMatchResponse {
    matches: Option<Vec<Option<Match>>>,
}

#[derive(Debug, Deserialize)]
struct Match {
    email: Option<String>,
}

/// reqwest-backed client for the bulk people match endpoint.
pub struct ApolloClient {
    client: Client,
    endpoint: String,
}

impl ApolloClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    async fn send(&self, records: &[Record], key: &ApiKey) -> reqwest::Result<(StatusCode, String)> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[
                ("reveal_personal_emails", "true"),
                ("reveal_phone_number", "false"),
            ])
            .header("x-api-key", key.expose())
            .header("accept", "application/json")
            .header("content-type", "application/json")
            .header("cache-control", "no-cache")
            .json(&BulkMatchRequest { details: records })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }
}

#[async_trait]
impl EnrichmentApi for ApolloClient {
    async fn enrich(&self, records: &[Record], key: &ApiKey) -> Result<Vec<EnrichmentResult>> {
        match self.send(records, key).await {
            Ok((status, body)) => classify_response(status, &body, records.len()),
            Err(e) => {
                warn!("HTTP error while calling enrichment API: {}", e);
                Ok(vec![EnrichmentResult::HttpError; records.len()])
            }
        }
    }
}

/// Map a raw API response onto per-record results.
pub fn classify_response(
    status: StatusCode,
    body: &str,
    expected: usize,
) -> Result<Vec<EnrichmentResult>> {
    if status == StatusCode::UNPROCESSABLE_ENTITY {
        warn!("Validation error from enrichment API: {}", preview(body));
        return Ok(vec![EnrichmentResult::ValidationError; expected]);
    }

    if !status.is_success() {
        warn!("API error {}: {}", status, preview(body));
        if indicates_quota_exhausted(body) {
            error!("Enrichment API reports exhausted credits, stopping");
            return Err(Error::QuotaExhausted(
                "Please upgrade your plan.".to_string(),
            ));
        }
        return Ok(vec![EnrichmentResult::ApiError; expected]);
    }

    let parsed: BulkMatchResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Malformed enrichment response: {}", e);
            return Ok(vec![EnrichmentResult::HttpError; expected]);
        }
    };

    let Some(matches) = parsed.matches else {
        debug!("Response carried no matches");
        return Ok(vec![EnrichmentResult::NoEmailFound; expected]);
    };

    if matches.len() != expected {
        warn!(
            "Enrichment API returned {} matches for {} records",
            matches.len(),
            expected
        );
    }

    let mut results: Vec<EnrichmentResult> = matches
        .into_iter()
        .take(expected)
        .map(|m| match m.and_then(|m| m.email) {
            Some(email) if !email.trim().is_empty() => EnrichmentResult::Email(email),
            _ => EnrichmentResult::NoEmailFound,
        })
        .collect();
    results.resize(expected, EnrichmentResult::NoEmailFound);

    Ok(results)
}

fn indicates_quota_exhausted(body: &str) -> bool {
    let lower = body.to_lowercase();
    QUOTA_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}
