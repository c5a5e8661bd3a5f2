use serde::Serialize;
use tracing::info;

use crate::errors::{AppError, AppResult};

/// USD per million tokens.
#[derive(Debug, Clone, Copy)]
struct ModelRate {
    input: f64,
    output: f64,
}

const MODEL_PRICING: &[(&str, ModelRate)] = &[
    ("sonar-pro", ModelRate { input: 0.5, output: 1.5 }),
    ("pplx-7b-online", ModelRate { input: 0.2, output: 0.8 }),
    ("pplx-70b-online", ModelRate { input: 1.0, output: 2.0 }),
    ("mixtral-8x7b-instruct", ModelRate { input: 0.6, output: 1.8 }),
    ("codellama-34b-instruct", ModelRate { input: 0.8, output: 2.4 }),
    ("llama-2-70b-chat", ModelRate { input: 0.7, output: 2.8 }),
];

fn rate_for(model: &str) -> Option<ModelRate> {
    MODEL_PRICING
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, rate)| *rate)
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost: f64,
    pub requests: Vec<UsageRecord>,
}

/// Running token/cost accumulation for one pipeline run. Instantiated per run
/// and threaded explicitly; there is no ambient global.
#[derive(Debug, Default)]
pub struct TokenLedger {
    total_input_tokens: u64,
    total_output_tokens: u64,
    total_cost: f64,
    requests: Vec<UsageRecord>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prices one call and folds it into the running totals. An unknown model
    /// is a caller error; there is no fallback rate.
    pub fn record(&mut self, model: &str, input_tokens: u64, output_tokens: u64) -> AppResult<()> {
        let rate = rate_for(model).ok_or_else(|| AppError::UnknownModel(model.to_string()))?;
        let input_cost = input_tokens as f64 / 1_000_000.0 * rate.input;
        let output_cost = output_tokens as f64 / 1_000_000.0 * rate.output;

        self.total_input_tokens += input_tokens;
        self.total_output_tokens += output_tokens;
        self.total_cost += input_cost + output_cost;
        self.requests.push(UsageRecord {
            model: model.to_string(),
            input_tokens,
            output_tokens,
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
        });
        Ok(())
    }

    pub fn summary(&self) -> UsageSummary {
        UsageSummary {
            total_input_tokens: self.total_input_tokens,
            total_output_tokens: self.total_output_tokens,
            total_cost: self.total_cost,
            requests: self.requests.clone(),
        }
    }

    pub fn log_summary(&self) {
        info!(
            total_input_tokens = self.total_input_tokens,
            total_output_tokens = self.total_output_tokens,
            total_cost_usd = %format!("{:.4}", self.total_cost),
            "token usage summary"
        );
        for (index, request) in self.requests.iter().enumerate() {
            info!(
                request = index + 1,
                model = %request.model,
                input_tokens = request.input_tokens,
                output_tokens = request.output_tokens,
                cost_usd = %format!("{:.4}", request.total_cost),
                "enrichment call"
            );
        }
    }
}
