use std::path::PathBuf;

use clap::{Parser, Subcommand};

use places_pipeline::{
    enrich_details, enrich_places, init_tracing, upload_places, AppConfig, AppResult,
};

#[derive(Parser, Debug)]
#[command(name = "places-pipeline")]
#[command(about = "Enrichment and upload pipeline for travel points of interest")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enrich places with structured travel data from the text-generation service
    Enrich {
        /// Path to the JSON (or NDJSON) place list
        #[arg(short, long, env = "INPUT_FILE")]
        input: PathBuf,
        /// Where to write the enriched JSON array
        #[arg(short, long, env = "OUTPUT_FILE")]
        output: PathBuf,
    },
    /// Fetch editorial summaries and websites from the place-detail service
    Details {
        #[arg(short, long, env = "INPUT_FILE")]
        input: PathBuf,
        #[arg(short, long, env = "OUTPUT_FILE")]
        output: PathBuf,
    },
    /// Validate, deduplicate and batch-insert places into the hosted store
    Upload {
        #[arg(short, long, env = "INPUT_FILE")]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> AppResult<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    match cli.command {
        Command::Enrich { input, output } => {
            enrich_places(&config, &input, &output).await?;
        }
        Command::Details { input, output } => {
            enrich_details(&config, &input, &output).await?;
        }
        Command::Upload { input } => {
            upload_places(&config, &input).await?;
        }
    }
    Ok(())
}
