use std::{env, io};

use secrecy::SecretString;
use tracing::debug;

const DEFAULT_ENRICHMENT_API_URL: &str = "https://api.perplexity.ai/chat/completions";
const DEFAULT_DETAILS_API_URL: &str = "https://maps.googleapis.com/maps/api/place/details/json";
const DEFAULT_MODEL: &str = "sonar-pro";
const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub enrichment_api_url: String,
    pub enrichment_api_key: Option<SecretString>,
    pub enrichment_model: String,
    pub details_api_url: String,
    pub details_api_key: Option<SecretString>,
    pub store_url: Option<String>,
    pub store_key: Option<SecretString>,
    pub places_table: String,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub store_retry_delay_ms: u64,
    pub enrich_call_delay_ms: u64,
    pub details_call_delay_ms: u64,
    pub http_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            enrichment_api_url: env::var("ENRICHMENT_API_URL")
                .unwrap_or_else(|_| DEFAULT_ENRICHMENT_API_URL.to_string()),
            enrichment_api_key: secret_var("ENRICHMENT_API_KEY"),
            enrichment_model: env::var("ENRICHMENT_MODEL")
                .unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            details_api_url: env::var("DETAILS_API_URL")
                .unwrap_or_else(|_| DEFAULT_DETAILS_API_URL.to_string()),
            details_api_key: secret_var("DETAILS_API_KEY"),
            store_url: env::var("SUPABASE_URL")
                .ok()
                .map(|v| v.trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty()),
            store_key: secret_var("SUPABASE_KEY"),
            places_table: env::var("PLACES_TABLE").unwrap_or_else(|_| "places".to_string()),
            batch_size: parse_usize("BATCH_SIZE", DEFAULT_BATCH_SIZE).max(1),
            max_retries: parse_u32("MAX_RETRIES", DEFAULT_MAX_RETRIES).max(1),
            retry_base_delay_ms: parse_u64("RETRY_BASE_DELAY_MS", 1_000),
            store_retry_delay_ms: parse_u64("STORE_RETRY_DELAY_MS", 2_000),
            enrich_call_delay_ms: parse_u64("ENRICH_CALL_DELAY_MS", 1_000),
            details_call_delay_ms: parse_u64("DETAILS_CALL_DELAY_MS", 100),
            http_timeout_secs: parse_u64("HTTP_TIMEOUT_SECS", 30),
        }
    }
}

fn secret_var(key: &str) -> Option<SecretString> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| SecretString::new(v.into()))
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}
