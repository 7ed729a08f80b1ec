use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use colbench::{measure_run, Workload};
use colbench_common::{BatchSource, Error, Format, Settings};
use colbench_connector_filesystem::{AdapterOptions, LocalSource};
use colbench_connector_remote::{FetchOptions, RemoteFetcher};
use colbench_metrics::{MetricsStore, OperationRecorder};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML settings file; defaults to `COLBENCH_CONFIG_PATH` or `config/default.toml`.
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Measure one workload over the row and column copies of a table.
    Scan(ScanArgs),
    /// Print row/column pairs from a metrics log.
    Compare {
        /// Defaults to `data.metrics_path`.
        #[arg(long)]
        metrics: Option<PathBuf>,
    },
    /// List objects in the configured bucket.
    List {
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long, default_value = "")]
        suffix: String,
    },
}

#[derive(clap::Args, Debug)]
struct ScanArgs {
    /// Table name without extension, e.g. `lineitem`.
    table: String,
    /// Encoding of the row-oriented copy.
    #[arg(long, default_value = "tbl")]
    row_format: Format,
    #[arg(long, value_enum, default_value_t = Operation::Scan)]
    op: Operation,
    /// Column for `filter` and `statistics`.
    #[arg(long)]
    column: Option<String>,
    #[arg(long, default_value_t = 0.0)]
    threshold: f64,
    #[arg(long)]
    group_by: Option<String>,
    #[arg(long)]
    value: Option<String>,
    /// Overrides `processing.chunk_size`.
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Read from the configured bucket instead of `data.root`.
    #[arg(long)]
    remote: bool,
    /// Key prefix inside the bucket.
    #[arg(long, default_value = "")]
    prefix: String,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Operation {
    Scan,
    Filter,
    Statistics,
    GroupSum,
}

impl ScanArgs {
    fn workload(&self) -> anyhow::Result<Workload> {
        let column = || self.column.clone().context("--column is required for this operation");
        Ok(match self.op {
            Operation::Scan => Workload::Scan,
            Operation::Filter => Workload::Filter { column: column()?, threshold: self.threshold },
            Operation::Statistics => Workload::Statistics { column: column()? },
            Operation::GroupSum => Workload::GroupSum {
                group_by: self.group_by.clone().context("--group-by is required for group-sum")?,
                value: self.value.clone().context("--value is required for group-sum")?,
            },
        })
    }
}

fn remote_fetcher(settings: &Settings) -> anyhow::Result<RemoteFetcher> {
    let remote = settings.remote.as_ref().context("no [remote] section configured")?;
    let options = FetchOptions {
        chunk_size: settings.processing.chunk_size,
        adapter: AdapterOptions { csv_delimiter: settings.processing.delimiter_byte()? },
        ..FetchOptions::from_settings(remote)
    };
    Ok(RemoteFetcher::new(remote, options)?)
}

async fn scan(settings: &Settings, args: ScanArgs) -> anyhow::Result<()> {
    let workload = args.workload()?;
    if args.row_format == Format::Parquet {
        bail!("--row-format must be a row-oriented format (csv or tbl)");
    }
    let chunk_size = args.chunk_size.unwrap_or(settings.processing.chunk_size);

    let source: Box<dyn BatchSource> = if args.remote {
        Box::new(remote_fetcher(settings)?)
    } else {
        Box::new(LocalSource::new(&settings.data.root).with_delimiter(settings.processing.delimiter_byte()?))
    };
    let store = MetricsStore::with_sink(&settings.data.metrics_path).await?;
    let recorder =
        OperationRecorder::with_interval(store, Duration::from_millis(settings.metrics.sample_interval_ms));

    let mut measured_any = false;
    for format in [args.row_format, Format::Parquet] {
        let name = if args.remote {
            format!("{}{}.{}", args.prefix, args.table, format.extension())
        } else {
            args.table.clone()
        };
        let dataset = match source.resolve(&name, Some(format)).await {
            Ok(dataset) => dataset,
            Err(Error::DatasetNotFound(reason)) => {
                warn!(table = %name, format = %format, %reason, "skipping missing variant");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let measured = measure_run(&recorder, source.as_ref(), &dataset, &workload, chunk_size)
            .await
            .with_context(|| format!("{} over {} ({format})", workload.name(), dataset.name()))?;
        let summary = &measured.summary;
        println!(
            "{:<8} {:<24} {:>9.3}s  cpu avg {:>5.1}% max {:>5.1}%  mem max {:>8.1} MiB  {}",
            summary.label.variant.to_string(),
            dataset.location().to_string(),
            summary.duration.as_secs_f64(),
            summary.avg_cpu,
            summary.max_cpu,
            summary.max_memory_bytes as f64 / (1024.0 * 1024.0),
            measured.value
        );
        measured_any = true;
    }

    if !measured_any {
        bail!("no row or column copy of `{}` found", args.table);
    }
    info!(metrics = %settings.data.metrics_path.display(), "metrics appended");
    Ok(())
}

async fn compare(settings: &Settings, metrics: Option<PathBuf>) -> anyhow::Result<()> {
    let path = metrics.unwrap_or_else(|| settings.data.metrics_path.clone());
    let store = MetricsStore::load(&path)
        .await
        .with_context(|| format!("reading metrics log {}", path.display()))?;
    let comparisons = store.comparisons().await;
    if comparisons.is_empty() {
        println!("no row/column pairs in {}", path.display());
        return Ok(());
    }

    println!("{:<12} {:<16} {:>10} {:>10} {:>8}", "operation", "dataset", "row (s)", "column (s)", "speedup");
    for c in comparisons {
        let speedup = c.speedup().map(|s| format!("{s:.2}x")).unwrap_or_else(|| "-".to_string());
        println!(
            "{:<12} {:<16} {:>10.3} {:>10.3} {:>8}",
            c.operation, c.dataset, c.row.duration_seconds, c.column.duration_seconds, speedup
        );
    }
    Ok(())
}

async fn list(settings: &Settings, prefix: &str, suffix: &str) -> anyhow::Result<()> {
    let fetcher = remote_fetcher(settings)?;
    for key in fetcher.list_objects(prefix, suffix).await? {
        println!("{key}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let settings = match &args.config {
        Some(path) => Settings::load(Some(path.as_str())),
        None => Settings::new(),
    }
    .context("loading settings")?;

    match args.command {
        Command::Scan(scan_args) => scan(&settings, scan_args).await,
        Command::Compare { metrics } => compare(&settings, metrics).await,
        Command::List { prefix, suffix } => list(&settings, &prefix, &suffix).await,
    }
}
