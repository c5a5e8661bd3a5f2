use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::ingestion::{load_places, write_places};
use crate::retry::{retry, RetryError, RetryPolicy};

const DETAIL_FIELDS: &str = "editorial_summary,website";

/// Classified outcome of one detail lookup. Every processed record gets a
/// status marker, success or failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailStatus {
    Ok,
    ZeroResults,
    NotFound,
    OverQueryLimit,
    HttpError,
    RetriesExhausted,
    Other(String),
}

impl DetailStatus {
    pub fn as_str(&self) -> &str {
        match self {
            DetailStatus::Ok => "OK",
            DetailStatus::ZeroResults => "ZERO_RESULTS",
            DetailStatus::NotFound => "NOT_FOUND",
            DetailStatus::OverQueryLimit => "OVER_QUERY_LIMIT",
            DetailStatus::HttpError => "HTTP_ERROR",
            DetailStatus::RetriesExhausted => "MAX_RETRIES_EXCEEDED",
            DetailStatus::Other(status) => status,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DetailSummary {
    pub summary: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DetailOutcome {
    pub status: DetailStatus,
    /// `None` means the lookup failed outright; an empty summary means the
    /// service answered but had nothing for this place.
    pub result: Option<DetailSummary>,
}

/// Raw reply from the detail service, before classification.
#[derive(Debug, Clone)]
pub struct DetailReply {
    pub status: String,
    pub summary: Option<String>,
    pub website: Option<String>,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait DetailBackend: Send + Sync {
    async fn fetch(&self, place_id: &str) -> AppResult<DetailReply>;
}

pub struct HttpDetailClient {
    http: reqwest::Client,
    url: String,
    api_key: SecretString,
}

impl HttpDetailClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let api_key = config.details_api_key.clone().ok_or_else(|| {
            AppError::Config("DETAILS_API_KEY is required for the details stage".into())
        })?;
        let http = reqwest::Client::builder()
            .user_agent("places-pipeline/0.1.0")
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            url: config.details_api_url.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl DetailBackend for HttpDetailClient {
    async fn fetch(&self, place_id: &str) -> AppResult<DetailReply> {
        #[derive(Deserialize)]
        struct Response {
            status: String,
            result: Option<ResponseResult>,
            error_message: Option<String>,
        }

        #[derive(Deserialize)]
        struct ResponseResult {
            editorial_summary: Option<EditorialSummary>,
            website: Option<String>,
        }

        #[derive(Deserialize)]
        struct EditorialSummary {
            overview: Option<String>,
        }

        let response = self
            .http
            .get(&self.url)
            .query(&[
                ("place_id", place_id),
                ("fields", DETAIL_FIELDS),
                ("key", self.api_key.expose_secret()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let parsed: Response = response.json().await?;
        let result = parsed.result.unwrap_or(ResponseResult {
            editorial_summary: None,
            website: None,
        });
        Ok(DetailReply {
            status: parsed.status,
            summary: result.editorial_summary.and_then(|s| s.overview),
            website: result.website,
            error_message: parsed.error_message,
        })
    }
}

pub struct DetailClient {
    backend: Arc<dyn DetailBackend>,
    policy: RetryPolicy,
}

impl DetailClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let backend = Arc::new(HttpDetailClient::new(config)?);
        Ok(Self::with_backend(
            backend,
            config.max_retries,
            Duration::from_millis(config.retry_base_delay_ms),
        ))
    }

    pub fn with_backend(
        backend: Arc<dyn DetailBackend>,
        max_retries: u32,
        base_delay: Duration,
    ) -> Self {
        Self {
            backend,
            policy: RetryPolicy::exponential(max_retries, base_delay),
        }
    }

    /// Always resolves to a classified outcome; the status marker is attached
    /// to the record whether or not the lookup succeeded.
    pub async fn lookup(&self, place_id: &str) -> DetailOutcome {
        let outcome = retry(self.policy, "place detail lookup", || async move {
            let reply = self
                .backend
                .fetch(place_id)
                .await
                .map_err(RetryError::Transient)?;

            match reply.status.as_str() {
                "OK" => Ok(DetailOutcome {
                    status: DetailStatus::Ok,
                    result: Some(DetailSummary {
                        summary: reply.summary,
                        website: reply.website,
                    }),
                }),
                "ZERO_RESULTS" | "NOT_FOUND" => {
                    warn!(place_id, status = %reply.status, "detail lookup found nothing");
                    let status = if reply.status == "ZERO_RESULTS" {
                        DetailStatus::ZeroResults
                    } else {
                        DetailStatus::NotFound
                    };
                    Ok(DetailOutcome {
                        status,
                        result: Some(DetailSummary::default()),
                    })
                }
                "OVER_QUERY_LIMIT" => Err(RetryError::Transient(AppError::RateLimited)),
                other => {
                    warn!(
                        place_id,
                        status = other,
                        message = reply.error_message.as_deref().unwrap_or(""),
                        "detail lookup rejected"
                    );
                    Ok(DetailOutcome {
                        status: DetailStatus::Other(other.to_string()),
                        result: None,
                    })
                }
            }
        })
        .await;

        match outcome {
            Ok(classified) => classified,
            Err(AppError::RateLimited) => DetailOutcome {
                status: DetailStatus::RetriesExhausted,
                result: None,
            },
            Err(err) => {
                warn!(?err, place_id, "detail lookup failed");
                DetailOutcome {
                    status: DetailStatus::HttpError,
                    result: None,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailStats {
    pub processed: usize,
    pub failed: usize,
    pub api_calls: usize,
}

/// Run driver for the `details` stage. Failed lookups still emit the record,
/// with empty fields and the failure status marker.
pub async fn enrich_details(
    config: &AppConfig,
    input: &Path,
    output: &Path,
) -> AppResult<DetailStats> {
    let client = DetailClient::new(config)?;
    run_details(&client, config, input, output).await
}

pub async fn run_details(
    client: &DetailClient,
    config: &AppConfig,
    input: &Path,
    output: &Path,
) -> AppResult<DetailStats> {
    let places = load_places(input)?;
    let mut stats = DetailStats {
        processed: 0,
        failed: 0,
        api_calls: 0,
    };
    let pacing = Duration::from_millis(config.details_call_delay_ms);

    let mut enriched = Vec::with_capacity(places.len());
    for mut place in places {
        let Some(place_id) = place.place_id.clone() else {
            warn!(name = %place.name, "skipping place with no place_id");
            continue;
        };

        info!(name = %place.name, place_id = %place_id, "fetching place details");
        stats.processed += 1;
        stats.api_calls += 1;

        let outcome = client.lookup(&place_id).await;
        if outcome.result.is_none() {
            stats.failed += 1;
        }

        let summary = outcome.result.unwrap_or_default();
        place.description = summary.summary;
        place.website = summary.website;
        place.maps_url = Some(format!(
            "https://www.google.com/maps/place/?q=place_id:{place_id}"
        ));
        place.enrichment_status = Some(outcome.status.as_str().to_string());
        enriched.push(place);

        sleep(pacing).await;
    }

    write_places(output, &enriched)?;
    info!(
        processed = stats.processed,
        failed = stats.failed,
        api_calls = stats.api_calls,
        "detail enrichment finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct ScriptedDetailBackend {
        calls: AtomicU32,
        replies: Vec<AppResult<DetailReply>>,
    }

    impl ScriptedDetailBackend {
        fn new(replies: Vec<AppResult<DetailReply>>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                replies,
            }
        }
    }

    #[async_trait]
    impl DetailBackend for ScriptedDetailBackend {
        async fn fetch(&self, _: &str) -> AppResult<DetailReply> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let reply = self.replies.get(call.min(self.replies.len() - 1));
            match reply {
                Some(Ok(reply)) => Ok(reply.clone()),
                Some(Err(_)) => Err(AppError::Api("scripted failure".into())),
                None => Err(AppError::Api("no scripted reply".into())),
            }
        }
    }

    fn ok_reply(overview: &str) -> DetailReply {
        DetailReply {
            status: "OK".into(),
            summary: Some(overview.to_string()),
            website: Some("https://example.com".into()),
            error_message: None,
        }
    }

    fn status_reply(status: &str) -> DetailReply {
        DetailReply {
            status: status.into(),
            summary: None,
            website: None,
            error_message: None,
        }
    }

    fn client(backend: ScriptedDetailBackend) -> (Arc<ScriptedDetailBackend>, DetailClient) {
        let backend = Arc::new(backend);
        let client =
            DetailClient::with_backend(backend.clone(), 3, Duration::from_millis(1));
        (backend, client)
    }

    #[tokio::test]
    async fn ok_status_carries_summary_and_website() {
        let (_, client) = client(ScriptedDetailBackend::new(vec![Ok(ok_reply(
            "A famous basilica.",
        ))]));

        let outcome = client.lookup("ChIJ123").await;
        assert_eq!(outcome.status, DetailStatus::Ok);
        let summary = outcome.result.unwrap();
        assert_eq!(summary.summary.as_deref(), Some("A famous basilica."));
        assert_eq!(summary.website.as_deref(), Some("https://example.com"));
    }

    #[tokio::test]
    async fn zero_results_is_an_empty_success() {
        let (backend, client) =
            client(ScriptedDetailBackend::new(vec![Ok(status_reply("ZERO_RESULTS"))]));

        let outcome = client.lookup("ChIJ123").await;
        assert_eq!(outcome.status, DetailStatus::ZeroResults);
        let summary = outcome.result.unwrap();
        assert!(summary.summary.is_none());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn over_query_limit_retries_then_succeeds() {
        let (backend, client) = client(ScriptedDetailBackend::new(vec![
            Ok(status_reply("OVER_QUERY_LIMIT")),
            Ok(status_reply("OVER_QUERY_LIMIT")),
            Ok(ok_reply("Recovered.")),
        ]));

        let outcome = client.lookup("ChIJ123").await;
        assert_eq!(outcome.status, DetailStatus::Ok);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn over_query_limit_exhaustion_is_marked() {
        let (backend, client) =
            client(ScriptedDetailBackend::new(vec![Ok(status_reply("OVER_QUERY_LIMIT"))]));

        let outcome = client.lookup("ChIJ123").await;
        assert_eq!(outcome.status, DetailStatus::RetriesExhausted);
        assert_eq!(outcome.status.as_str(), "MAX_RETRIES_EXCEEDED");
        assert!(outcome.result.is_none());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unexpected_status_fails_without_retry() {
        let (backend, client) =
            client(ScriptedDetailBackend::new(vec![Ok(status_reply("REQUEST_DENIED"))]));

        let outcome = client.lookup("ChIJ123").await;
        assert_eq!(outcome.status, DetailStatus::Other("REQUEST_DENIED".into()));
        assert!(outcome.result.is_none());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_errors_retry_then_mark_http_error() {
        let (backend, client) = client(ScriptedDetailBackend::new(vec![Err(AppError::Api(
            "boom".into(),
        ))]));

        let outcome = client.lookup("ChIJ123").await;
        assert_eq!(outcome.status, DetailStatus::HttpError);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }
}
