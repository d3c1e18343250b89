use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use catalog::{CanonicalSchema, LayerCatalog};
use clap::{Parser, Subcommand};
use compute::{LayerSelection, Summary, filter_layers, summarize};
use ingest::{CompanionTable, DEFAULT_SIMPLIFY_TOLERANCE, Pipeline, PipelineOptions, UploadRequest};
use serde::Serialize;
use store::LayerStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Operator commands for the forestry project dashboard")]
struct Args {
    /// Directory holding the published layer artifacts
    #[arg(long, default_value = "datos_web")]
    data_dir: PathBuf,

    /// Layer catalog JSON file (default: the built-in programs)
    #[arg(long)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a zipped shapefile (plus optional companion table) as one layer
    Process {
        #[arg(long)]
        archive: PathBuf,

        /// Layer code from the catalog (e.g. PSA)
        #[arg(long)]
        layer: String,

        /// Companion CSV or spreadsheet joined by folio
        #[arg(long)]
        table: Option<PathBuf>,

        /// Simplification tolerance in degrees; 0 keeps geometries as read
        #[arg(long, default_value_t = DEFAULT_SIMPLIFY_TOLERANCE)]
        simplify: f64,

        /// Keep source columns that match no canonical field
        #[arg(long)]
        keep_extra_columns: bool,
    },

    /// Publish a zipped shapefile as the basin boundary
    Boundary {
        #[arg(long)]
        archive: PathBuf,
    },

    /// Print the dashboard aggregates as JSON
    Summary {
        /// Comma separated layer codes (default: all)
        #[arg(long)]
        layers: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct ProcessReport {
    layer: String,
    records: usize,
    artifact: PathBuf,
    merge: String,
    resolved: Vec<(String, String)>,
    defaulted: Vec<String>,
    filled_cells: Vec<(String, usize)>,
}

#[derive(Debug, Serialize)]
struct SummaryReport {
    layers: Vec<String>,
    summary: Summary,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = real_main(Args::parse()) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn real_main(args: Args) -> Result<(), String> {
    let catalog = match &args.catalog {
        Some(path) => LayerCatalog::load(path).map_err(|e| e.to_string())?,
        None => LayerCatalog::builtin(),
    };
    let catalog = Arc::new(catalog);
    let schema = Arc::new(CanonicalSchema::default());
    let store =
        LayerStore::open(&args.data_dir, catalog.clone(), schema.clone()).map_err(|e| e.to_string())?;

    match args.command {
        Command::Process {
            archive,
            layer,
            table,
            simplify,
            keep_extra_columns,
        } => {
            let options = PipelineOptions {
                simplify_tolerance: (simplify > 0.0).then_some(simplify),
                keep_extra_columns,
            };
            let pipeline = Pipeline::new(catalog, schema, options);
            cmd_process(&pipeline, &store, &archive, layer, table.as_deref())
        }
        Command::Boundary { archive } => {
            let pipeline = Pipeline::new(catalog, schema, PipelineOptions::default());
            cmd_boundary(&pipeline, &store, &archive)
        }
        Command::Summary { layers } => cmd_summary(&store, layers.as_deref()),
    }
}

fn read(path: &Path) -> Result<Vec<u8>, String> {
    fs::read(path).map_err(|e| format!("read {path:?}: {e}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let payload = serde_json::to_string_pretty(value).map_err(|e| format!("json: {e}"))?;
    println!("{payload}");
    Ok(())
}

fn cmd_process(
    pipeline: &Pipeline,
    store: &LayerStore,
    archive: &Path,
    layer: String,
    table: Option<&Path>,
) -> Result<(), String> {
    let table = match table {
        Some(path) => Some(CompanionTable {
            file_name: path
                .file_name()
                .and_then(|s| s.to_str())
                .ok_or_else(|| format!("invalid table filename: {path:?}"))?
                .to_string(),
            bytes: read(path)?,
        }),
        None => None,
    };
    let request = UploadRequest {
        layer_code: layer,
        archive: read(archive)?,
        table,
    };

    let processed = pipeline
        .process(&request)
        .map_err(|e| format!("{} stage: {e}", e.stage()))?;
    let artifact = store
        .write_layer(&processed.layer_code, &processed.table)
        .map_err(|e| e.to_string())?;
    print_json(&ProcessReport {
        records: processed.table.len(),
        merge: processed.merge.to_string(),
        layer: processed.layer_code,
        artifact,
        resolved: processed.report.resolved,
        defaulted: processed.report.defaulted,
        filled_cells: processed.report.filled_cells,
    })
}

fn cmd_boundary(pipeline: &Pipeline, store: &LayerStore, archive: &Path) -> Result<(), String> {
    let boundary = pipeline
        .process_boundary(&read(archive)?)
        .map_err(|e| format!("{} stage: {e}", e.stage()))?;
    let path = store.write_boundary(&boundary).map_err(|e| e.to_string())?;
    info!("boundary with {} features written to {}", boundary.len(), path.display());
    Ok(())
}

fn cmd_summary(store: &LayerStore, layers: Option<&str>) -> Result<(), String> {
    let selection = LayerSelection::parse(layers, store.catalog());
    let summary = store
        .load_all()
        .map_err(|e| e.to_string())?
        .map(|projects| summarize(&filter_layers(&projects, &selection), store.catalog()))
        .unwrap_or_default();
    print_json(&SummaryReport {
        layers: selection.codes().to_vec(),
        summary,
    })
}
