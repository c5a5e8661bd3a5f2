use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::ingestion::{load_places, write_places};
use crate::ledger::{TokenLedger, UsageSummary};
use crate::place::EnrichmentFields;
use crate::retry::{retry, RetryError, RetryPolicy};

const SYSTEM_PROMPT: &str = "You are a helpful assistant that returns only valid JSON objects.";

fn build_prompt(name: &str, city: &str) -> String {
    format!(
        r#"You are a travel expert helping generate structured data for a travel planning app.
I will give you the name of a point of interest (POI) and the city it's in.
Return a structured JSON object with the following fields.

name: The POI name

description: A detailed and engaging description (4-6 sentences) describing what this place is, what makes it special, and why a traveler should care

category: The general type (e.g. "monument", "museum", "neighborhood", "experience", "religious site", "restaurant", "park")

subcategory: A more specific label if relevant (e.g. "cathedral", "modern art museum", "tapas bar", "food market")

mood_tags: An array of mood-based tags - choose from: "relaxed", "cultural", "romantic", "foodie", "adventurous", "historic", "artsy", "local-gem", "must-see", "spiritual"

suggested_visit_time: The best time of day to visit (e.g. "morning", "afternoon", "evening")

duration: How long a typical visit takes (e.g. "30 minutes", "1-2 hours", "half-day")

local_tip: A practical, local-style travel tip to improve the experience

popularity_score: A float between 0 and 1, representing how popular the place is with international visitors

price_level: One of "free", "$", "$$", "$$$", "$$$$" - based on entry or experience cost

Don't include citation markers like [1], just write clean prose.

POI: {name}
City: {city}"#
    )
}

/// The generated text is often wrapped in a fenced code block. Prefer a block
/// tagged as JSON, fall back to any fenced block, fall back to the raw text.
pub fn extract_fenced_json(content: &str) -> &str {
    if let Some(block) = fenced_block(content, "```json") {
        return block;
    }
    if let Some(block) = fenced_block(content, "```") {
        return block;
    }
    content
}

fn fenced_block<'a>(content: &'a str, opening: &str) -> Option<&'a str> {
    let start = content.find(opening)? + opening.len();
    let rest = &content[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, model: &str, system: &str, user: &str) -> AppResult<ChatCompletion>;
}

pub struct HttpChatClient {
    http: reqwest::Client,
    url: String,
    api_key: SecretString,
}

impl HttpChatClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let api_key = config.enrichment_api_key.clone().ok_or_else(|| {
            AppError::Config("ENRICHMENT_API_KEY is required for the enrich stage".into())
        })?;
        let http = reqwest::Client::builder()
            .user_agent("places-pipeline/0.1.0")
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            url: config.enrichment_api_url.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl ChatBackend for HttpChatClient {
    async fn complete(&self, model: &str, system: &str, user: &str) -> AppResult<ChatCompletion> {
        #[derive(Serialize)]
        struct RequestBody<'a> {
            model: &'a str,
            messages: [RequestMessage<'a>; 2],
        }

        #[derive(Serialize)]
        struct RequestMessage<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Deserialize)]
        struct Response {
            choices: Vec<ResponseChoice>,
            usage: Option<ResponseUsage>,
        }

        #[derive(Deserialize)]
        struct ResponseChoice {
            message: ResponseMessage,
        }

        #[derive(Deserialize)]
        struct ResponseMessage {
            content: String,
        }

        #[derive(Deserialize)]
        struct ResponseUsage {
            #[serde(default)]
            prompt_tokens: u64,
            #[serde(default)]
            completion_tokens: u64,
        }

        let body = RequestBody {
            model,
            messages: [
                RequestMessage {
                    role: "system",
                    content: system,
                },
                RequestMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(AppError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(AppError::Api(format!(
                "enrichment service returned {}",
                response.status()
            )));
        }

        let parsed: Response = response.json().await?;
        let usage = parsed.usage.unwrap_or(ResponseUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AppError::Api("enrichment response missing choices".into()))?;

        Ok(ChatCompletion {
            content,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }
}

/// Sequential per-place enrichment with bounded retries and an explicit token
/// ledger. One enricher (and one ledger) per run.
pub struct PlaceEnricher {
    backend: Arc<dyn ChatBackend>,
    model: String,
    policy: RetryPolicy,
    parse_retry_delay: Duration,
    ledger: Mutex<TokenLedger>,
}

impl PlaceEnricher {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let backend = Arc::new(HttpChatClient::new(config)?);
        Ok(Self::with_backend(
            backend,
            &config.enrichment_model,
            config.max_retries,
            Duration::from_millis(config.retry_base_delay_ms),
        ))
    }

    pub fn with_backend(
        backend: Arc<dyn ChatBackend>,
        model: &str,
        max_retries: u32,
        base_delay: Duration,
    ) -> Self {
        Self {
            backend,
            model: model.to_string(),
            policy: RetryPolicy::exponential(max_retries, base_delay),
            parse_retry_delay: base_delay,
            ledger: Mutex::new(TokenLedger::new()),
        }
    }

    /// Either a fully parsed enrichment object or `None` when retries are
    /// exhausted; a half-parsed object is never surfaced. Token usage is
    /// recorded for every successful call, even when the parse step fails.
    pub async fn enrich(&self, name: &str, city: &str) -> AppResult<Option<EnrichmentFields>> {
        let prompt = build_prompt(name, city);
        let outcome = retry(self.policy, "enrichment call", || {
            let prompt = prompt.as_str();
            async move {
                let completion = self
                    .backend
                    .complete(&self.model, SYSTEM_PROMPT, prompt)
                    .await
                    .map_err(|err| match err {
                        AppError::RateLimited => RetryError::Transient(err),
                        other => RetryError::TransientAfter(other, self.parse_retry_delay),
                    })?;

                self.ledger
                    .lock()
                    .record(
                        &self.model,
                        completion.prompt_tokens,
                        completion.completion_tokens,
                    )
                    .map_err(RetryError::Fatal)?;

                let payload = extract_fenced_json(&completion.content);
                serde_json::from_str::<EnrichmentFields>(payload).map_err(|err| {
                    RetryError::TransientAfter(AppError::Json(err), self.parse_retry_delay)
                })
            }
        })
        .await;

        match outcome {
            Ok(fields) => Ok(Some(fields)),
            Err(err @ AppError::UnknownModel(_)) => Err(err),
            Err(err) => {
                warn!(?err, place = name, "enrichment exhausted retries");
                Ok(None)
            }
        }
    }

    pub fn usage_summary(&self) -> UsageSummary {
        self.ledger.lock().summary()
    }

    pub fn log_usage_summary(&self) {
        self.ledger.lock().log_summary();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentStats {
    pub total: usize,
    pub enriched: usize,
    pub failed: usize,
}

/// Run driver for the `enrich` stage: load, enrich each record sequentially
/// with a fixed inter-call delay, write the survivors, report usage.
pub async fn enrich_places(
    config: &AppConfig,
    input: &Path,
    output: &Path,
) -> AppResult<EnrichmentStats> {
    let enricher = PlaceEnricher::new(config)?;
    run_enrichment(&enricher, config, input, output).await
}

pub async fn run_enrichment(
    enricher: &PlaceEnricher,
    config: &AppConfig,
    input: &Path,
    output: &Path,
) -> AppResult<EnrichmentStats> {
    let places = load_places(input)?;
    let mut stats = EnrichmentStats {
        total: places.len(),
        enriched: 0,
        failed: 0,
    };
    let pacing = Duration::from_millis(config.enrich_call_delay_ms);

    let mut enriched = Vec::new();
    for (index, mut place) in places.into_iter().enumerate() {
        info!(
            current = index + 1,
            total = stats.total,
            name = %place.name,
            city = %place.city,
            "enriching place"
        );
        match enricher.enrich(&place.name, &place.city).await? {
            Some(fields) => {
                place.apply_enrichment(fields);
                enriched.push(place);
                stats.enriched += 1;
            }
            None => {
                stats.failed += 1;
            }
        }
        sleep(pacing).await;
    }

    if enriched.is_empty() {
        warn!("no places were successfully enriched; output not written");
    } else {
        write_places(output, &enriched)?;
    }

    enricher.log_usage_summary();
    info!(
        total = stats.total,
        enriched = stats.enriched,
        failed = stats.failed,
        "enrichment finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use super::*;

    struct ScriptedBackend {
        calls: AtomicU32,
        rate_limited_first: u32,
        content: String,
    }

    impl ScriptedBackend {
        fn new(rate_limited_first: u32, content: &str) -> Self {
            Self {
                calls: AtomicU32::new(0),
                rate_limited_first,
                content: content.to_string(),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn complete(&self, _: &str, _: &str, _: &str) -> AppResult<ChatCompletion> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.rate_limited_first {
                return Err(AppError::RateLimited);
            }
            Ok(ChatCompletion {
                content: self.content.clone(),
                prompt_tokens: 120,
                completion_tokens: 80,
            })
        }
    }

    const FENCED: &str = "```json\n{\"description\": \"A basilica.\", \"category\": \"religious site\", \"mood_tags\": [\"must-see\"], \"popularity_score\": 0.97, \"price_level\": \"$$\"}\n```";

    #[test]
    fn extracts_json_tagged_fence() {
        assert_eq!(extract_fenced_json("```json\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn extracts_untagged_fence() {
        assert_eq!(extract_fenced_json("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn unfenced_content_passes_through() {
        assert_eq!(extract_fenced_json("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn unterminated_fence_falls_back_to_raw() {
        assert_eq!(extract_fenced_json("```json\n{\"a\":1}"), "```json\n{\"a\":1}");
    }

    #[tokio::test]
    async fn parses_fenced_enrichment_and_records_usage() {
        let backend = Arc::new(ScriptedBackend::new(0, FENCED));
        let enricher =
            PlaceEnricher::with_backend(backend, "sonar-pro", 3, Duration::from_millis(5));

        let fields = enricher
            .enrich("Sagrada Família", "Barcelona")
            .await
            .unwrap()
            .expect("enrichment");
        assert_eq!(fields.category.as_deref(), Some("religious site"));
        assert_eq!(fields.popularity_score, Some(0.97));

        let summary = enricher.usage_summary();
        assert_eq!(summary.total_input_tokens, 120);
        assert_eq!(summary.total_output_tokens, 80);
        assert_eq!(summary.requests.len(), 1);
    }

    #[tokio::test]
    async fn backs_off_exponentially_on_rate_limits() {
        let backend = Arc::new(ScriptedBackend::new(2, FENCED));
        let base = Duration::from_millis(20);
        let enricher = PlaceEnricher::with_backend(backend.clone(), "sonar-pro", 3, base);

        let started = Instant::now();
        let fields = enricher.enrich("Park Güell", "Barcelona").await.unwrap();
        let elapsed = started.elapsed();

        assert!(fields.is_some());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        // two 429s: first delay = base, second = 2 * base
        assert!(elapsed >= base * 3, "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn rate_limit_exhaustion_yields_no_enrichment() {
        let backend = Arc::new(ScriptedBackend::new(u32::MAX, FENCED));
        let enricher =
            PlaceEnricher::with_backend(backend.clone(), "sonar-pro", 3, Duration::from_millis(1));

        let fields = enricher.enrich("Casa Batlló", "Barcelona").await.unwrap();
        assert!(fields.is_none());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert!(enricher.usage_summary().requests.is_empty());
    }

    #[tokio::test]
    async fn unparseable_payload_still_accounts_usage() {
        let backend = Arc::new(ScriptedBackend::new(0, "I could not produce JSON, sorry."));
        let enricher =
            PlaceEnricher::with_backend(backend.clone(), "sonar-pro", 3, Duration::from_millis(1));

        let fields = enricher.enrich("El Born", "Barcelona").await.unwrap();
        assert!(fields.is_none());
        // every attempt got a 200 back, so every attempt is accounted
        assert_eq!(enricher.usage_summary().requests.len(), 3);
    }

    #[tokio::test]
    async fn unknown_model_is_fatal() {
        let backend = Arc::new(ScriptedBackend::new(0, FENCED));
        let enricher =
            PlaceEnricher::with_backend(backend, "mystery-model", 3, Duration::from_millis(1));

        let err = enricher.enrich("Tibidabo", "Barcelona").await.unwrap_err();
        assert!(matches!(err, AppError::UnknownModel(_)));
    }
}
