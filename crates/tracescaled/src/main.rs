//! tracescaled — the tracescale daemon.
//!
//! One binary, two roles:
//! - `sampler`: receives OTLP spans, keeps the anomalous ones, and streams
//!   them to subscribers
//! - `modeler`: subscribes to the sampler, tracks latency, and scales
//!   deployments
//!
//! # Usage
//!
//! ```text
//! tracescaled --config tracescale.toml sampler --listen 0.0.0.0:4317
//! tracescaled --config tracescale.toml modeler --enforce
//! tracescaled --config tracescale.toml config
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use tokio::sync::{RwLock, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tracescale_autoscale::{InMemoryOrchestrator, ScalingActuator};
use tracescale_backend::TempoBackend;
use tracescale_config::{ConfigStore, ConfigWatcher, YamlConfigStore};
use tracescale_core::{ModelerConfig, SamplerConfig, ScalingMode, TraceScaleConfig};
use tracescale_metrics::{LatencyTracker, PipelineStats, SharedTracker, StatsReporter};
use tracescale_modeler::{
    DecisionEngine, GrpcSampleSource, TraceConsumer, TraceProcessor, build_policy,
};
use tracescale_sampler::{PretrainSettings, SamplerService, SpanSampler, TraceHub, pretrain};

const DEFAULT_LOG_FILTER: &str = "info,tracescaled=debug,tracescale=debug";

/// Replica bounds given to deployments found in the config directory.
const DEFAULT_REPLICAS: u32 = 1;
const DEFAULT_MIN_REPLICAS: u32 = 1;
const DEFAULT_MAX_REPLICAS: u32 = 10;

#[derive(Parser)]
#[command(name = "tracescaled", about = "Trace-driven autoscaling daemon")]
struct Cli {
    /// Path to tracescale.toml. Defaults apply when omitted.
    #[arg(long, global = true, env = "TRACESCALE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the adaptive span sampler.
    Sampler {
        /// Address the gRPC server binds to.
        #[arg(long)]
        listen: Option<String>,

        /// Tracing backend used for pretraining.
        #[arg(long, env = "TRACE_BACKEND_URL")]
        backend_url: Option<String>,

        /// Bearer token for the tracing backend.
        #[arg(long, env = "TRACE_BACKEND_TOKEN", hide_env_values = true)]
        backend_token: Option<String>,

        /// Start scoring without pretraining from the backend.
        #[arg(long)]
        skip_pretraining: bool,
    },

    /// Run the modeler: consume sampled traces and make scaling decisions.
    Modeler {
        /// Sampler gRPC endpoint.
        #[arg(long, env = "TRACE_SAMPLER_CHANNEL")]
        sampler_channel: Option<String>,

        /// Tracing backend traces are fetched from.
        #[arg(long, env = "TRACE_BACKEND_URL")]
        backend_url: Option<String>,

        /// Bearer token for the tracing backend.
        #[arg(long, env = "TRACE_BACKEND_TOKEN", hide_env_values = true)]
        backend_token: Option<String>,

        /// Directory of LatencyBasedAutoScaler documents.
        #[arg(long, env = "CONFIG_SPEC_PATH")]
        config_path: Option<String>,

        /// Apply scaling decisions instead of only logging them.
        #[arg(long)]
        enforce: bool,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = match &cli.config {
        Some(path) => TraceScaleConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TraceScaleConfig::default(),
    };

    match cli.command {
        Command::Sampler {
            listen,
            backend_url,
            backend_token,
            skip_pretraining,
        } => {
            if let Some(listen) = listen {
                config.sampler.listen_address = listen;
            }
            if let Some(url) = backend_url {
                config.sampler.backend_url = url;
            }
            config.sampler.skip_pretraining |= skip_pretraining;
            run_sampler(config.sampler, backend_token).await
        }
        Command::Modeler {
            sampler_channel,
            backend_url,
            backend_token,
            config_path,
            enforce,
        } => {
            if let Some(channel) = sampler_channel {
                config.modeler.sampler_channel = channel;
            }
            if let Some(url) = backend_url {
                config.modeler.backend_url = url;
            }
            if let Some(path) = config_path {
                config.modeler.config_path = path;
            }
            if enforce {
                config.modeler.mode = ScalingMode::Enforce;
            }
            run_modeler(config.modeler, backend_token).await
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn tempo_backend(url: &str, token: Option<String>) -> TempoBackend {
    let backend = TempoBackend::new(url);
    match token {
        Some(token) => backend.with_token(token),
        None => backend,
    }
}

async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => warn!(error = %e, "could not listen for ctrl-c, shutting down"),
    }
}

async fn run_sampler(config: SamplerConfig, backend_token: Option<String>) -> anyhow::Result<()> {
    config.model.validate()?;
    info!(
        listen = %config.listen_address,
        backend = %config.backend_url,
        min_train_count = config.min_train_count,
        min_score = config.min_score,
        skip_span_count = config.skip_span_count,
        "tracescale sampler starting"
    );
    let addr: SocketAddr = config
        .listen_address
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen_address))?;

    let sampler = Arc::new(Mutex::new(SpanSampler::from_config(&config)));
    let hub = TraceHub::new(config.subscriber_buffer);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    if config.skip_pretraining {
        info!("pretraining disabled");
    } else {
        let backend = tempo_backend(&config.backend_url, backend_token);
        let settings = PretrainSettings::from_config(&config);
        if pretrain(&sampler, &backend, &settings, shutdown_rx.clone())
            .await
            .is_none()
        {
            info!("tracescale sampler stopped before serving");
            return Ok(());
        }
    }

    SamplerService::new(Arc::clone(&sampler), hub)
        .serve(addr, shutdown_rx)
        .await?;

    let stats = sampler.lock().stats();
    info!(
        scored = stats.scored_spans,
        sampled = stats.sampled_spans,
        rate_pct = stats.sample_rate(),
        "tracescale sampler stopped"
    );
    Ok(())
}

async fn run_modeler(config: ModelerConfig, backend_token: Option<String>) -> anyhow::Result<()> {
    info!(
        sampler = %config.sampler_channel,
        backend = %config.backend_url,
        config_path = %config.config_path,
        mode = %config.mode,
        policy = %config.policy,
        subscription = %config.subscription,
        "tracescale modeler starting"
    );

    // ── Collaborators ──────────────────────────────────────────

    let store: Arc<dyn ConfigStore> = Arc::new(
        YamlConfigStore::open(&config.config_path)
            .with_context(|| format!("loading scaler specs from {}", config.config_path))?,
    );

    let orchestrator = Arc::new(InMemoryOrchestrator::new());
    for deployment in store.all_resources() {
        orchestrator
            .register(&deployment, DEFAULT_REPLICAS, DEFAULT_MIN_REPLICAS, DEFAULT_MAX_REPLICAS)
            .await;
        info!(%deployment, "registered deployment");
    }

    let backend = Arc::new(
        tempo_backend(&config.backend_url, backend_token).with_timeout(config.fetch_timeout()),
    );

    // ── Pipeline ───────────────────────────────────────────────

    let tracker: SharedTracker = Arc::new(RwLock::new(LatencyTracker::new(config.window_size)));
    let stats = Arc::new(PipelineStats::new());
    let actuator = ScalingActuator::new(config.mode, orchestrator)
        .with_config(Arc::clone(&store))
        .with_cooldowns(config.scale_up_cooldown(), config.scale_down_cooldown());
    let engine = DecisionEngine::new(
        Arc::clone(&tracker),
        build_policy(&config, Arc::clone(&store)),
        actuator,
        Arc::clone(&stats),
    );
    info!(policy = engine.policy_name(), "decision engine ready");

    let processor = Arc::new(
        TraceProcessor::new(backend, tracker, Arc::clone(&stats), Arc::new(engine))
            .with_fetch_timeout(config.fetch_timeout())
            .with_drain_policy(config.drain),
    );
    let source = Arc::new(GrpcSampleSource::new(&config.sampler_channel, config.subscription));
    let consumer = TraceConsumer::new(
        source,
        Arc::clone(&processor),
        config.reconnect_delay(),
        config.error_policy,
    );

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let watcher = ConfigWatcher::new(
        Arc::clone(&store),
        &config.config_path,
        config.config_poll_interval(),
    );
    let watcher_handle = tokio::spawn(watcher.run(shutdown_rx.clone()));

    let reporter = Arc::new(StatsReporter::new(Arc::clone(&stats), config.report_interval()));
    let reporter_handle = {
        let reporter = Arc::clone(&reporter);
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { reporter.run(rx).await })
    };

    let mut consumer_handle = {
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { consumer.run(rx).await })
    };

    // ── Run until signal or consumer failure ───────────────────

    let finished = tokio::select! {
        res = &mut consumer_handle => Some(res),
        _ = wait_for_signal() => None,
    };
    let _ = shutdown_tx.send(true);
    let consumer_result = match finished {
        Some(res) => res,
        None => consumer_handle.await,
    };

    processor.shutdown().await;
    let _ = watcher_handle.await;
    let _ = reporter_handle.await;
    reporter.report_once().await;

    match consumer_result {
        Ok(Ok(())) => {
            info!("tracescale modeler stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "tracescale modeler stopped on consumer failure");
            Err(e.into())
        }
        Err(e) => Err(anyhow::anyhow!("consumer task failed: {e}")),
    }
}
