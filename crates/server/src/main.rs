//! conduit: bulk import/export job engine for Conduit users, articles and comments.
//!
//! `serve` runs the HTTP API and, unless `--no-worker` is given, the job
//! dispatcher in the same process. `worker` runs only the dispatcher.
//! `import` and `export` queue a job from the command line.

mod api;
mod db;
mod router;
mod state;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tracing::{info, warn};

use conduit_core::{Config, Resource};
use conduit_ingest::{ExportFilters, ExportFormat, Exporter, ImportSettings, Importer, PgStore};
use conduit_queue::{Dispatcher, ExportConfig, JobRunner, JobStore, NewJob, PgJobStore};
use conduit_storage::keys::import_key;
use conduit_storage::{is_external_url, BlobStore};

use crate::state::AppState;

const UPLOAD_CHUNK_BYTES: usize = 1 << 20;

// ── CLI ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "conduit", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API.
    Serve {
        /// Do not run the job dispatcher in this process.
        #[arg(long, env = "CONDUIT_NO_WORKER")]
        no_worker: bool,
    },
    /// Run only the job dispatcher.
    Worker,
    /// Queue an import from a local file or an http(s) URL.
    Import {
        resource: Resource,
        source: String,
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    /// Queue an export job.
    Export {
        resource: Resource,
        #[arg(long, default_value = "ndjson")]
        format: ExportFormat,
        /// Filter as `key=value`; repeatable.
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
        #[arg(long)]
        idempotency_key: Option<String>,
    },
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

// ── Wiring ──────────────────────────────────────────────────────────

/// Everything built from config that the subcommands share.
struct Services {
    config: Config,
    jobs: Arc<dyn JobStore>,
    blobs: Arc<BlobStore>,
    exporter: Arc<Exporter>,
    dispatcher: Arc<Dispatcher>,
}

impl Services {
    async fn init(config: Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config.postgres).await?;
        let store = Arc::new(PgStore::new(pool.clone()));
        let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool));
        let blobs = Arc::new(BlobStore::from_config(&config).context("blob storage")?);

        let importer = Importer::new(store.clone(), ImportSettings::from(&config.jobs));
        let exporter = Arc::new(Exporter::new(store));
        let runner = Arc::new(JobRunner::new(
            jobs.clone(),
            blobs.clone(),
            importer,
            exporter.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            jobs.clone(),
            runner,
            config.jobs.poll_interval(),
        ));

        Ok(Self {
            config,
            jobs,
            blobs,
            exporter,
            dispatcher,
        })
    }

    fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            jobs: self.jobs.clone(),
            blobs: self.blobs.clone(),
            exporter: self.exporter.clone(),
            jobs_config: self.config.jobs.clone(),
            max_upload_bytes: self.config.server.max_upload_mb as usize * 1024 * 1024,
        })
    }
}

/// Flip the shutdown flag on Ctrl-C.
fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            // keep the sender alive so the flag never flips
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
        let _ = tx.send(true);
    });
    rx
}

async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    // a dropped sender also ends the wait
    let _ = shutdown.wait_for(|stop| *stop).await;
}

// ── Subcommands ─────────────────────────────────────────────────────

async fn serve(services: Services, no_worker: bool) -> anyhow::Result<()> {
    let shutdown = shutdown_channel();

    let worker = if no_worker {
        info!("Job dispatcher disabled for this process");
        None
    } else {
        let dispatcher = services.dispatcher.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move { dispatcher.run(shutdown).await }))
    };

    let app = router::build_router(services.app_state());
    let addr = format!("{}:{}", services.config.server.host, services.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("Server listening on http://{}", addr);
    info!("API docs at http://{}/docs", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for(shutdown))
        .await?;

    if let Some(worker) = worker {
        worker.await.context("job dispatcher panicked")?;
    }
    info!("Server stopped");
    Ok(())
}

async fn worker(services: Services) -> anyhow::Result<()> {
    info!("Job worker started");
    services.dispatcher.run(shutdown_channel()).await;
    info!("Job worker stopped");
    Ok(())
}

/// Stream a local file into blob storage under an import key.
async fn upload_file(blobs: &BlobStore, resource: Resource, path: &Path) -> anyhow::Result<String> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    let key = import_key(resource, Utc::now().timestamp(), filename);

    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("open {}", path.display()))?;
    let mut writer = blobs.writer(&key).await?;
    let mut buf = vec![0u8; UPLOAD_CHUNK_BYTES];

    loop {
        let n = match file.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                if let Err(abort) = writer.abort().await {
                    warn!(key = %key, error = %abort, "failed to abort upload");
                }
                return Err(e).with_context(|| format!("read {}", path.display()));
            }
        };
        if let Err(e) = writer.write(&buf[..n]).await {
            if let Err(abort) = writer.abort().await {
                warn!(key = %key, error = %abort, "failed to abort upload");
            }
            return Err(e.into());
        }
    }

    let bytes = writer.finish().await?;
    info!(key = %key, bytes, "Uploaded {}", path.display());
    Ok(key)
}

async fn queue_import(
    services: Services,
    resource: Resource,
    source: String,
    idempotency_key: Option<String>,
) -> anyhow::Result<()> {
    let source_key = if is_external_url(&source) {
        source
    } else {
        upload_file(&services.blobs, resource, Path::new(&source)).await?
    };
    let job = services
        .jobs
        .create(NewJob::import(resource, source_key).with_idempotency_key(idempotency_key))
        .await?;
    info!(job_id = %job.id, resource = %resource, "Import job queued");
    println!("{}", job.id);
    Ok(())
}

async fn queue_export(
    services: Services,
    resource: Resource,
    format: ExportFormat,
    filters: Vec<(String, String)>,
    idempotency_key: Option<String>,
) -> anyhow::Result<()> {
    let filters: ExportFilters = filters.into_iter().collect();
    let config = ExportConfig::new(format, filters);
    let job = services
        .jobs
        .create(NewJob::export(resource, &config).with_idempotency_key(idempotency_key))
        .await?;
    info!(job_id = %job.id, resource = %resource, format = %format, "Export job queued");
    println!("{}", job.id);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    conduit_core::config::load_dotenv();
    let config = Config::from_env();
    config.log_summary();

    let services = Services::init(config).await?;

    match cli.command {
        Command::Serve { no_worker } => serve(services, no_worker).await,
        Command::Worker => worker(services).await,
        Command::Import {
            resource,
            source,
            idempotency_key,
        } => queue_import(services, resource, source, idempotency_key).await,
        Command::Export {
            resource,
            format,
            filters,
            idempotency_key,
        } => queue_export(services, resource, format, filters, idempotency_key).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_parse_as_pairs() {
        assert_eq!(
            parse_filter("author=alice").unwrap(),
            ("author".to_string(), "alice".to_string())
        );
        assert_eq!(
            parse_filter(" slug = a=b ").unwrap(),
            ("slug".to_string(), "a=b".to_string())
        );
        assert!(parse_filter("no-separator").is_err());
        assert!(parse_filter("=value").is_err());
    }

    #[test]
    fn cli_parses_export() {
        let cli = Cli::try_parse_from([
            "conduit", "export", "articles", "--format", "csv", "--filter", "author=alice",
        ])
        .unwrap();
        match cli.command {
            Command::Export {
                resource,
                format,
                filters,
                ..
            } => {
                assert_eq!(resource, Resource::Articles);
                assert_eq!(format, ExportFormat::Csv);
                assert_eq!(filters, vec![("author".to_string(), "alice".to_string())]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(Cli::try_parse_from(["conduit", "export", "tags"]).is_err());
    }
}
