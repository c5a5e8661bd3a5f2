pub mod config;
pub mod details;
pub mod enrichment;
pub mod errors;
pub mod ingestion;
pub mod ledger;
pub mod place;
pub mod retry;
pub mod uploader;
pub mod validation;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::AppConfig;
pub use details::{enrich_details, DetailClient, DetailStats, DetailStatus};
pub use enrichment::{enrich_places, EnrichmentStats, PlaceEnricher};
pub use errors::{AppError, AppResult};
pub use ingestion::{load_places, load_records, write_places};
pub use ledger::{TokenLedger, UsageSummary};
pub use place::{Coordinates, EnrichmentFields, Place};
pub use uploader::{prepare_row, upload_places, PlaceRow, PlaceStore, UploadReport};
pub use validation::{validate_place, FIELD_RULES};

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,places_pipeline=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
