//! I2V Worker CLI
//!
//! Runs the lease-based generation worker (polling the queue for tasks) or a
//! one-shot generation against the Runway API for smoke-testing credentials.

use anyhow::Result;
use clap::{Parser, Subcommand};
use i2v_worker::monitor::{IpWatcher, LivenessPinger, MonitorHandle};
use i2v_worker::provider::Provider;
use i2v_worker::queue::{LeaseClient, QueueClient};
use i2v_worker::runway::{GenerationRequest, GenerationService, RunwayClient};
use i2v_worker::transfer::PresignedTransfer;
use i2v_worker::worker::{setup_signal_handler, TaskProcessor, TaskRunner, WorkerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "i2v-worker")]
#[command(about = "Lease-based worker for image-to-video generation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as worker, polling the queue for leased tasks
    Worker {
        /// Override the slow poll interval in seconds
        #[arg(short, long)]
        poll_interval: Option<u64>,

        /// Run once and exit (for testing)
        #[arg(long)]
        once: bool,

        /// Keep temp artifacts after each task
        #[arg(long)]
        no_cleanup: bool,
    },

    /// Generate a single clip directly (credential smoke test)
    Generate {
        /// Readable URL of the source image
        #[arg(short, long)]
        image_url: String,

        /// Text prompt
        #[arg(long, default_value = "")]
        prompt: String,

        /// Clip duration in seconds (2-10)
        #[arg(short, long, default_value = "5.0")]
        duration: f64,

        /// Aspect ratio
        #[arg(short, long, default_value = "1280:720")]
        ratio: String,

        /// Model hint
        #[arg(short, long, default_value = "gen4_turbo")]
        model: String,

        /// Output file
        #[arg(short, long, default_value = "./output.mp4")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load .env file if present
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Worker {
            poll_interval,
            once,
            no_cleanup,
        } => {
            info!("Initializing worker...");

            let mut config = WorkerConfig::from_env()?;
            if let Some(secs) = poll_interval {
                config.poll_interval_slow = Duration::from_secs(secs);
            }
            if no_cleanup {
                config.auto_cleanup = false;
            }

            std::fs::create_dir_all(&config.temp_dir)?;

            let queue: Arc<dyn LeaseClient> = Arc::new(QueueClient::new(
                &config.queue_api_url,
                &config.worker_token,
                &config.worker_id,
                &config.worker_type,
                config.api_timeout,
            )?);
            let transfer = Arc::new(PresignedTransfer::new(
                &config.queue_api_url,
                &config.worker_token,
                config.api_timeout,
            )?);
            let generation = Arc::new(RunwayClient::new(
                &config.runway_api_key,
                config.generation_timeout,
            )?);

            let processor = TaskProcessor::new(
                config.clone(),
                Arc::clone(&queue),
                transfer,
                generation,
            );
            let mut runner = TaskRunner::new(config.clone(), queue, processor);

            if once {
                info!("Running in single-task mode...");
                match runner.run_once().await {
                    Ok(true) => println!("Task processed"),
                    Ok(false) => println!("No pending tasks found"),
                    Err(e) => {
                        eprintln!("Error processing task: {e}");
                        return Err(e.into());
                    }
                }
            } else {
                let monitors = start_monitors(&config)?;

                // Setup graceful shutdown
                let shutdown = runner.shutdown_handle();
                setup_signal_handler(shutdown);

                let result = runner.run().await;
                stop_monitors(monitors).await;
                result?;
            }
        }

        Commands::Generate {
            image_url,
            prompt,
            duration,
            ratio,
            model,
            output,
        } => {
            let provider = Provider::from_hint(&model);
            if provider == Provider::Foreign {
                anyhow::bail!("model '{model}' is not served by this worker");
            }

            let api_key = std::env::var("RUNWAY_API_KEY")
                .map_err(|_| anyhow::anyhow!("RUNWAY_API_KEY is not set"))?;
            let client = RunwayClient::new(&api_key, Duration::from_secs(600))?;

            info!("Generating {:.2}s clip with {}...", duration, provider);
            let request = GenerationRequest {
                input_image_url: image_url,
                prompt,
                duration,
                ratio,
                provider,
            };
            client.generate(&request, &output).await?;

            println!("Clip written to {}", output.display());
        }
    }

    Ok(())
}

/// Start whichever side monitors are configured.
fn start_monitors(config: &WorkerConfig) -> Result<Vec<MonitorHandle>> {
    let mut handles = Vec::new();

    if let Some(ping_url) = &config.healthcheck_ping_url {
        handles.push(LivenessPinger::new(ping_url, config.liveness_interval)?.spawn());
    } else {
        info!("HEALTHCHECK_PING_URL not set, liveness pings disabled");
    }

    if let Some(webhook_url) = &config.ip_webhook_url {
        handles.push(IpWatcher::new(webhook_url, config.ip_check_interval)?.spawn());
    } else {
        info!("IP_WEBHOOK_URL not set, IP change notifications disabled");
    }

    Ok(handles)
}

async fn stop_monitors(handles: Vec<MonitorHandle>) {
    futures::future::join_all(handles.into_iter().map(MonitorHandle::stop)).await;
}
