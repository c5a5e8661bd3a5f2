use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::ingestion::load_records;
use crate::retry::{retry, RetryError, RetryPolicy};
use crate::validation::validate_place;

/// Row shape of the hosted `places` table. Missing source fields become SQL
/// nulls; the geometry column is omitted entirely when coordinates are absent.
#[derive(Debug, Clone, Serialize)]
pub struct PlaceRow {
    pub name: Value,
    pub city: Value,
    pub description: Value,
    pub category: Value,
    pub subcategory: Value,
    pub mood_tags: Value,
    pub suggested_visit_time: Value,
    pub duration: Value,
    pub local_tip: Value,
    pub popularity_score: Value,
    pub price_level: Value,
    pub rating: Value,
    pub user_ratings_total: Value,
    pub place_id: Value,
    pub maps_url: Value,
    pub website: Value,
    pub types: Value,
    pub vicinity: Value,
    pub business_status: Value,
    pub fetched_at: Value,
    pub enrichment_status: Value,
    pub photos: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<String>,
    pub raw_ai_json: Value,
    pub last_updated: String,
}

fn field(place: &Value, name: &str) -> Value {
    place.get(name).cloned().unwrap_or(Value::Null)
}

/// Validates a candidate and maps it into the persisted row shape. Any
/// violation is a silent skip: the caller counts it, the reasons go to the
/// debug log.
pub fn prepare_row(place: &Value) -> Option<PlaceRow> {
    let violations = validate_place(place);
    if !violations.is_empty() {
        debug!(?violations, "record failed validation");
        return None;
    }

    let lat = place
        .get("coordinates")
        .and_then(|c| c.get("lat"))
        .and_then(Value::as_f64);
    let lng = place
        .get("coordinates")
        .and_then(|c| c.get("lng"))
        .and_then(Value::as_f64);
    let coordinates = match (lat, lng) {
        (Some(lat), Some(lng)) => Some(format!("SRID=4326;POINT({lng} {lat})")),
        _ => None,
    };

    let enrichment_status = match field(place, "enrichment_status") {
        Value::Null => Value::String("completed".into()),
        status => status,
    };

    Some(PlaceRow {
        name: field(place, "name"),
        city: field(place, "city"),
        description: field(place, "description"),
        category: field(place, "category"),
        subcategory: field(place, "subcategory"),
        mood_tags: field(place, "mood_tags"),
        suggested_visit_time: field(place, "suggested_visit_time"),
        duration: field(place, "duration"),
        local_tip: field(place, "local_tip"),
        popularity_score: field(place, "popularity_score"),
        price_level: field(place, "price_level"),
        rating: field(place, "rating"),
        user_ratings_total: field(place, "user_ratings_total"),
        place_id: field(place, "place_id"),
        maps_url: field(place, "maps_url"),
        website: field(place, "website"),
        types: field(place, "types"),
        vicinity: field(place, "vicinity"),
        business_status: field(place, "business_status"),
        fetched_at: field(place, "fetched_at"),
        enrichment_status,
        photos: field(place, "photos"),
        coordinates,
        raw_ai_json: place.clone(),
        last_updated: Utc::now().to_rfc3339(),
    })
}

/// REST client for the hosted table: column-select of existing ids plus batch
/// inserts, both with bounded linear-backoff retries.
pub struct PlaceStore {
    http: reqwest::Client,
    table_url: String,
    key: SecretString,
    policy: RetryPolicy,
}

impl PlaceStore {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let base = config.store_url.clone().ok_or_else(|| {
            AppError::Config("SUPABASE_URL is required for the upload stage".into())
        })?;
        let key = config.store_key.clone().ok_or_else(|| {
            AppError::Config("SUPABASE_KEY is required for the upload stage".into())
        })?;
        let http = reqwest::Client::builder()
            .user_agent("places-pipeline/0.1.0")
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            table_url: format!("{}/rest/v1/{}", base, config.places_table),
            key,
            policy: RetryPolicy::linear(
                config.max_retries,
                Duration::from_millis(config.store_retry_delay_ms),
            ),
        })
    }

    /// Identifiers already present remotely. Degrades to an empty set when the
    /// store stays unreachable, so a run may re-attempt duplicates rather
    /// than abort.
    pub async fn fetch_existing_ids(&self) -> HashSet<String> {
        let fetched = retry(self.policy, "existing id fetch", || async move {
            self.select_place_ids().await.map_err(RetryError::Transient)
        })
        .await;

        match fetched {
            Ok(ids) => ids,
            Err(err) => {
                warn!(?err, "could not fetch existing ids; proceeding with empty set");
                HashSet::new()
            }
        }
    }

    async fn select_place_ids(&self) -> AppResult<HashSet<String>> {
        #[derive(Deserialize)]
        struct IdRow {
            place_id: Option<String>,
        }

        let response = self
            .http
            .get(&self.table_url)
            .query(&[("select", "place_id")])
            .header("apikey", self.key.expose_secret())
            .bearer_auth(self.key.expose_secret())
            .send()
            .await?
            .error_for_status()?;

        let rows: Vec<IdRow> = response.json().await?;
        Ok(rows.into_iter().filter_map(|row| row.place_id).collect())
    }

    /// Inserts one batch, true on success. Exhausted retries mark the batch
    /// failed without stopping the run.
    pub async fn insert_batch(&self, batch: &[PlaceRow]) -> bool {
        let inserted = retry(self.policy, "batch insert", || async move {
            self.post_batch(batch).await.map_err(RetryError::Transient)
        })
        .await;

        if let Err(err) = &inserted {
            warn!(?err, rows = batch.len(), "batch insert failed after retries");
        }
        inserted.is_ok()
    }

    async fn post_batch(&self, batch: &[PlaceRow]) -> AppResult<()> {
        self.http
            .post(&self.table_url)
            .header("apikey", self.key.expose_secret())
            .bearer_auth(self.key.expose_secret())
            .header("Prefer", "return=minimal")
            .json(&batch)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub total: usize,
    pub valid: usize,
    pub skipped: usize,
    pub batches_attempted: usize,
    pub batches_succeeded: usize,
    pub elapsed_secs: f64,
    pub avg_secs_per_record: f64,
}

/// Run driver for the `upload` stage: load, dedup against the store, validate,
/// batch, insert.
pub async fn upload_places(config: &AppConfig, input: &Path) -> AppResult<UploadReport> {
    let store = PlaceStore::new(config)?;
    run_upload(&store, config, input).await
}

pub async fn run_upload(
    store: &PlaceStore,
    config: &AppConfig,
    input: &Path,
) -> AppResult<UploadReport> {
    let started = Instant::now();
    let records = load_records(input)?;
    let existing = store.fetch_existing_ids().await;
    info!(count = existing.len(), "ids already in the store");

    let mut rows = Vec::new();
    let mut skipped = 0_usize;
    for record in &records {
        match record.get("place_id").and_then(Value::as_str) {
            Some(id) if existing.contains(id) => {
                skipped += 1;
                continue;
            }
            Some(_) => {}
            None => {
                debug!("record without place_id dropped");
                skipped += 1;
                continue;
            }
        }
        match prepare_row(record) {
            Some(row) => rows.push(row),
            None => skipped += 1,
        }
    }
    info!(valid = rows.len(), skipped, "validated candidate records");

    let batches: Vec<&[PlaceRow]> = rows.chunks(config.batch_size).collect();
    let mut batches_succeeded = 0_usize;
    for (index, batch) in batches.iter().enumerate() {
        info!(
            batch = index + 1,
            batches = batches.len(),
            rows = batch.len(),
            "inserting batch"
        );
        if store.insert_batch(batch).await {
            batches_succeeded += 1;
        }
    }

    let elapsed_secs = started.elapsed().as_secs_f64();
    let report = UploadReport {
        total: records.len(),
        valid: rows.len(),
        skipped,
        batches_attempted: batches.len(),
        batches_succeeded,
        elapsed_secs,
        avg_secs_per_record: if records.is_empty() {
            0.0
        } else {
            elapsed_secs / records.len() as f64
        },
    };
    info!(
        total = report.total,
        valid = report.valid,
        skipped = report.skipped,
        batches_attempted = report.batches_attempted,
        batches_succeeded = report.batches_succeeded,
        elapsed_secs = %format!("{:.2}", report.elapsed_secs),
        "upload finished"
    );
    Ok(report)
}
