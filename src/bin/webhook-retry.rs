use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "webhook-retry")]
#[command(about = "Webhook delivery with retries, backoff and a dead letter queue", long_about = None)]
struct Cli {
    /// Path to config.toml (default: ./config.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deliver one webhook and wait until it completes or gives up
    Send {
        /// Endpoint URL to POST to
        endpoint: String,
        /// JSON payload (default: {})
        #[arg(short, long, default_value = "{}")]
        payload: String,
        /// Provider whose retry policy applies
        #[arg(long, default_value = "DEFAULT")]
        provider: String,
        /// Extra header as `Name: value`, repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
    /// List provider retry policies
    Providers,
    /// Show the backoff schedule for a provider
    Backoff {
        #[arg(default_value = "DEFAULT")]
        provider: String,
    },
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = webhook_retry_rs::Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Send {
            endpoint,
            payload,
            provider,
            headers,
        } => send::run(config, endpoint, payload, provider, headers),
        Commands::Providers => policies::list(&config),
        Commands::Backoff { provider } => policies::backoff(&config, &provider),
    }
}

mod send {
    use anyhow::{bail, Context, Result};
    use std::collections::HashMap;
    use std::time::Duration;
    use tracing::info;
    use tracing_subscriber::EnvFilter;
    use webhook_retry_rs::{Config, Dispatcher, JobStatus};

    pub fn run(
        config: Config,
        endpoint: String,
        payload: String,
        provider: String,
        headers: Vec<String>,
    ) -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();

        let payload: serde_json::Value =
            serde_json::from_str(&payload).context("Payload is not valid JSON")?;
        let headers = parse_headers(&headers)?;

        tokio::runtime::Runtime::new()?.block_on(async_run(config, endpoint, payload, provider, headers))
    }

    async fn async_run(
        config: Config,
        endpoint: String,
        payload: serde_json::Value,
        provider: String,
        headers: HashMap<String, String>,
    ) -> Result<()> {
        let dispatcher = Dispatcher::from_config(&config)?;
        let job_id = dispatcher.schedule(&endpoint, payload, headers, &provider)?;
        info!("Waiting for job {} to finish (press Ctrl+C to abort)...", job_id);

        let job = dispatcher
            .wait_for_terminal(&job_id, Duration::from_millis(200))
            .await
            .with_context(|| format!("Job {} disappeared", job_id))?;
        dispatcher.shutdown().await;

        println!("{}", serde_json::to_string_pretty(&job)?);
        if job.status != JobStatus::Completed {
            bail!(
                "Webhook {} ended as {} after {} attempt(s)",
                job.id,
                job.status,
                job.attempts.len()
            );
        }
        Ok(())
    }

    fn parse_headers(raw: &[String]) -> Result<HashMap<String, String>> {
        raw.iter()
            .map(|header| {
                let (name, value) = header
                    .split_once(':')
                    .with_context(|| format!("Header {:?} is not in `Name: value` form", header))?;
                Ok((name.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }
}

mod policies {
    use anyhow::Result;
    use webhook_retry_rs::retry::calculate_retry_delay_with;
    use webhook_retry_rs::Config;

    pub fn list(config: &Config) -> Result<()> {
        let registry = config.provider_registry()?;

        println!(
            "{:<12} {:>8} {:>8} {:>8} {:>6} {:>7} {:>8}  Retryable",
            "Provider", "Attempts", "Base", "Max", "Mult", "Jitter", "Timeout"
        );
        println!("{}", "-".repeat(90));
        for (name, retry) in registry.entries() {
            let codes: Vec<String> = retry
                .retryable_status_codes
                .iter()
                .map(|c| c.to_string())
                .collect();
            println!(
                "{:<12} {:>8} {:>8} {:>8} {:>6.1} {:>7.2} {:>8}  {}",
                name,
                retry.max_attempts,
                retry.base_delay_ms,
                retry.max_delay_ms,
                retry.backoff_multiplier,
                retry.jitter,
                retry.timeout_ms,
                codes.join(",")
            );
        }
        Ok(())
    }

    pub fn backoff(config: &Config, provider: &str) -> Result<()> {
        let registry = config.provider_registry()?;
        let (name, retry) = registry.resolve(provider);

        println!("Backoff schedule for {} ({} attempts)", name, retry.max_attempts);
        println!("{:<8} {:>10} {:>10} {:>10}", "After", "Min ms", "Nominal ms", "Max ms");
        println!("{}", "-".repeat(41));
        for attempt in 1..retry.max_attempts {
            let low = calculate_retry_delay_with(attempt, &retry, 0.0);
            let nominal = calculate_retry_delay_with(attempt, &retry, 0.5);
            let high = calculate_retry_delay_with(attempt, &retry, 1.0);
            println!(
                "#{:<7} {:>10} {:>10} {:>10}",
                attempt,
                low.as_millis(),
                nominal.as_millis(),
                high.as_millis()
            );
        }
        Ok(())
    }
}
