mod args;
mod inputs;
mod metrics;
mod report;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::future::join_all;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metamorph_core::{
    build_catalog, create_event_system, load_config, validate_config, CacheManager, Config,
    ConversionEvent, ConversionProcessor, ConversionRequest, EventHandle, FormatDetector,
    FormatId, Scheduler, SqliteEventStore, StatsCollector, StrategyRegistry,
};

use args::Args;
use inputs::{expand_inputs, skip_own_outputs};
use report::RunSummary;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for the event channel
const EVENT_BUFFER_SIZE: usize = 1000;

/// Exit status for fatal startup conditions.
const EXIT_FATAL: i32 = 2;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(args).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            std::process::exit(EXIT_FATAL);
        }
    }
}

/// Runs one invocation. Errors are fatal startup conditions; per-file
/// failures only show up in the returned exit status.
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);
    validate_config(&config).context("Configuration validation failed")?;

    if args.is_maintenance() {
        maintenance(&args, &config).await?;
        return Ok(0);
    }

    let target = match args.target.as_deref() {
        Some(target) => FormatId::new(target),
        None => bail!("No target format given"),
    };

    // Discover installed tools
    let catalog = build_catalog(&config.adapters, config.scheduler.grace_period());
    let registry = StrategyRegistry::discover(catalog.clone(), config.chain.clone()).await;
    if !registry.critical_available() {
        bail!("No critical converter is installed (need pandoc or libreoffice)");
    }
    metrics::ADAPTERS_AVAILABLE.set(registry.adapters().len() as i64);

    // Event log
    let (events, writer_handle) = if config.events.enabled {
        match SqliteEventStore::new(&config.events.path) {
            Ok(store) => {
                let (handle, writer) = create_event_system(Arc::new(store), EVENT_BUFFER_SIZE);
                (Some(handle), Some(tokio::spawn(writer.run())))
            }
            Err(e) => {
                warn!(
                    "Event log {} unavailable, continuing without it: {}",
                    config.events.path.display(),
                    e
                );
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    if let Some(ref events) = events {
        for adapter in catalog
            .iter()
            .filter(|a| registry.unavailable().iter().any(|n| n == a.name()))
        {
            events
                .emit(ConversionEvent::AdapterUnavailable {
                    adapter: adapter.name().to_string(),
                    critical: adapter.is_critical(),
                })
                .await;
        }
    }

    let stats = StatsCollector::from_config(&config.stats).await;
    let detector = FormatDetector::from_config(&config.detection).await;

    let mut processor = ConversionProcessor::new(&config, Arc::new(registry), detector)
        .with_stats(stats.clone());
    if let Some(ref events) = events {
        processor = processor.with_events(events.clone());
    }

    let requests = build_requests(&args, &target);
    info!("Converting {} file(s) to {}", requests.len(), target);

    let max_concurrency = config.scheduler.max_concurrency;
    emit(
        &events,
        ConversionEvent::RunStarted {
            version: VERSION.to_string(),
            inputs: requests.len(),
            max_concurrency,
        },
    )
    .await;

    let scheduler = Scheduler::new(Arc::new(processor));
    scheduler
        .run(max_concurrency)
        .await
        .context("Failed to start scheduler")?;

    let cancel = scheduler.cancellation_token();
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Interrupted, cancelling conversions");
        cancel.cancel();
    });

    let started = Instant::now();
    let results = scheduler.convert_all(requests).await;
    scheduler.shutdown().await;
    signal_task.abort();

    let summary = RunSummary::from_results(&results);
    print!("{}", report::render_results(&results));

    emit(
        &events,
        ConversionEvent::RunFinished {
            succeeded: summary.succeeded,
            failed: summary.failed,
            duration_ms: started.elapsed().as_millis() as u64,
        },
    )
    .await;

    let lifetime = match stats.shutdown().await {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Failed to save statistics: {}", e);
            None
        }
    };
    if args.stats {
        match lifetime {
            Some(ref record) => print!("\n{}", report::render_stats(record)),
            None => warn!("Statistics are unavailable"),
        }
    }

    if let Some(ref path) = config.metrics.file {
        metrics::collect_run_metrics(&scheduler.status(), lifetime.as_ref());
        if let Err(e) = metrics::write_metrics_file(path).await {
            warn!("Failed to write metrics to {}: {:#}", path.display(), e);
        }
    }

    // Drop every holder of the EventHandle so the writer's channel closes.
    // The processor inside the scheduler holds a clone.
    drop(scheduler);
    drop(events);
    if let Some(handle) = writer_handle {
        let _ = handle.await;
    }

    Ok(summary.exit_code())
}

fn build_requests(args: &Args, target: &FormatId) -> Vec<ConversionRequest> {
    let options = args.options();
    let files = expand_inputs(&args.inputs, args.recursive);
    skip_own_outputs(files, target, args.output_dir.as_deref())
        .into_iter()
        .map(|input| {
            let mut request = ConversionRequest::new(&input.path, target.clone())
                .with_options(options.clone())
                .dry_run(args.dry_run);
            if let Some(ref base) = args.output_dir {
                request = request.with_output_dir(input.output_dir(base));
            }
            request
        })
        .collect()
}

async fn emit(events: &Option<EventHandle>, event: ConversionEvent) {
    if let Some(events) = events {
        events.emit(event).await;
    }
}

/// `--list-tools`, `--prune-cache` and `--clear-cache`.
async fn maintenance(args: &Args, config: &Config) -> Result<()> {
    if args.list_tools {
        let catalog = build_catalog(&config.adapters, config.scheduler.grace_period());
        let probes = join_all(catalog.iter().map(|a| a.probe())).await;
        let listed: Vec<_> = catalog.into_iter().zip(probes).collect();
        print!("{}", report::render_tools(&listed));
    }

    let cache = CacheManager::from_config(&config.cache);
    if args.prune_cache {
        let pruned = cache.prune().await.context("Failed to prune cache")?;
        println!(
            "Pruned {} cache entries ({} bytes), {} kept",
            pruned.removed, pruned.freed_bytes, pruned.kept
        );
    }
    if args.clear_cache {
        let removed = cache.clear().await.context("Failed to clear cache")?;
        println!("Removed {} cache entries from {}", removed, cache.dir().display());
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
