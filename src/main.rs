// src/main.rs
use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use reconcile_lib::classification::VerticalClassifier;
use reconcile_lib::embedding::{BertEmbedder, CachedEmbedder, Embedder, PrecomputedEmbedder};
use reconcile_lib::identity::IdentityRegistry;
use reconcile_lib::utils::env::load_env;
use reconcile_lib::utils::feeds::{load_json_rows, load_optional_json_rows, write_run_outputs};
use reconcile_lib::utils::get_memory_usage;
use reconcile_lib::utils::pipeline_config::{EmbeddingBackend, PipelineConfig};
use reconcile_lib::utils::progress_bars::progress_config::ProgressConfig;
use reconcile_lib::{
    run_reconciliation, BrandRecord, IdentityRecord, ManualVerdictRow, OfficialStoreRecord,
    ReconciliationInput,
};

#[derive(Parser)]
#[command(author, version, about = "Links scraped brands to official stores", long_about = None)]
struct Args {
    /// Scraped source rows (JSON array)
    #[arg(long)]
    sources: PathBuf,

    /// Official-store registry rows (JSON array)
    #[arg(long)]
    references: PathBuf,

    /// Persisted identity table; a missing file starts an empty registry
    #[arg(long)]
    identities: Option<PathBuf>,

    /// Reviewer verdict worksheet
    #[arg(long)]
    manual_verdicts: Option<PathBuf>,

    /// Where linked rows are written
    #[arg(long)]
    output: PathBuf,

    /// Where identities issued in this run are written
    #[arg(long)]
    identity_delta: PathBuf,

    /// Run date written as match_date (YYYY-MM-DD); defaults to today in UTC
    #[arg(long)]
    scrape_date: Option<NaiveDate>,

    /// Run everything but write nothing
    #[arg(long)]
    dry_run: bool,
}

struct Embedders {
    matching: Arc<dyn Embedder>,
    vertical: Arc<dyn Embedder>,
}

fn build_embedders(config: &PipelineConfig) -> Result<Embedders> {
    match config.embedding_backend {
        EmbeddingBackend::Precomputed => {
            let Some(path) = &config.embedding_table_path else {
                bail!("EMBEDDING_BACKEND=precomputed requires EMBEDDING_TABLE_PATH");
            };
            let table: Arc<dyn Embedder> = Arc::new(PrecomputedEmbedder::from_json_file(path)?);
            Ok(Embedders {
                matching: table.clone(),
                vertical: Arc::new(CachedEmbedder::new(table, config.embedding_cache_size)),
            })
        }
        EmbeddingBackend::Bert => {
            let Some(match_dir) = &config.match_model_dir else {
                bail!("EMBEDDING_BACKEND=bert requires MATCH_MODEL_DIR");
            };
            let matching: Arc<dyn Embedder> = Arc::new(load_bert(match_dir, config)?);
            let vertical_inner = match &config.vertical_model_dir {
                Some(dir) if dir != match_dir => Arc::new(load_bert(dir, config)?) as Arc<dyn Embedder>,
                _ => matching.clone(),
            };
            Ok(Embedders {
                matching,
                vertical: Arc::new(CachedEmbedder::new(
                    vertical_inner,
                    config.embedding_cache_size,
                )),
            })
        }
    }
}

fn load_bert(dir: &Path, config: &PipelineConfig) -> Result<BertEmbedder> {
    BertEmbedder::load(dir, config.embedding_batch_size, config.embedding_max_tokens)
        .with_context(|| format!("Failed to load embedding model from {}", dir.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("Starting brand reconciliation");
    load_env();
    let start_time = Instant::now();

    let args = Args::parse();
    let config = PipelineConfig::from_env();
    config.log_config();
    let progress = ProgressConfig::from_env();
    info!(
        "Progress tracking: enabled={}, detailed={}",
        progress.enabled, progress.detailed
    );

    let sources: Vec<BrandRecord> = load_json_rows(&args.sources).context("Failed to load source rows")?;
    let references: Vec<OfficialStoreRecord> =
        load_json_rows(&args.references).context("Failed to load reference rows")?;
    let identities: Vec<IdentityRecord> = load_optional_json_rows(args.identities.as_deref())
        .context("Failed to load identity table")?;
    let manual_verdicts: Vec<ManualVerdictRow> =
        load_optional_json_rows(args.manual_verdicts.as_deref())
            .context("Failed to load manual verdicts")?;
    info!(
        "Loaded {} source rows, {} reference rows, {} identities, {} verdict rows",
        sources.len(),
        references.len(),
        identities.len(),
        manual_verdicts.len()
    );

    let mut registry =
        IdentityRegistry::from_records(identities).context("Failed to load identity registry")?;
    let embedders = build_embedders(&config)?;
    let classifier = VerticalClassifier::new(embedders.vertical)
        .context("Failed to prepare the vertical classifier")?;

    let input = ReconciliationInput {
        sources,
        references,
        manual_verdicts,
        run_date: args.scrape_date.unwrap_or_else(|| Utc::now().date_naive()),
    };
    let output = run_reconciliation(
        input,
        &mut registry,
        embedders.matching,
        &classifier,
        &config,
        &progress,
    )
    .await?;

    if args.dry_run {
        info!(
            "Dry run: skipping {} linked rows and {} new identities",
            output.rows.len(),
            output.identity_delta.len()
        );
    } else {
        write_run_outputs(
            &args.output,
            &output.rows,
            &args.identity_delta,
            &output.identity_delta,
        )?;
        info!(
            "Wrote {} linked rows to {} and {} new identities to {}",
            output.rows.len(),
            args.output.display(),
            output.identity_delta.len(),
            args.identity_delta.display()
        );
    }

    if progress.should_show_memory() {
        info!("Memory in use: {} MB", get_memory_usage().await);
    }
    info!("Reconciliation finished in {:.2?}", start_time.elapsed());
    Ok(())
}
