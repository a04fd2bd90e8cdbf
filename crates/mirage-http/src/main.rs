use anyhow::Context;
use clap::Parser;
use mirage_http::config::{
    EngineSettings, ListenSettings, LoadedConfig, SchedulingMode, ScriptPoolSettings,
};
use mirage_http::pipeline::Pipeline;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Mirage - configurable HTTP mock engine
#[derive(Parser, Debug)]
#[command(name = "mirage")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory containing *-config.yaml / *-config.yml / *-config.json files
    #[arg(short, long, env = "MIRAGE_CONFIG_DIR")]
    config_dir: PathBuf,

    /// Listen port
    #[arg(short, long, default_value = "8080", env = "MIRAGE_PORT")]
    port: u16,

    /// Listen address
    #[arg(long, default_value = "0.0.0.0", env = "MIRAGE_HOST")]
    host: IpAddr,

    /// Where script evaluation runs
    #[arg(short, long, value_enum, default_value_t = SchedulingMode::Sync)]
    mode: SchedulingMode,

    /// Script pool worker threads (0 = auto-detect)
    #[arg(long, default_value = "0")]
    script_workers: usize,

    /// Script pool queue size
    #[arg(long, default_value = "1000")]
    script_queue_size: usize,

    /// Script timeout in milliseconds (offload mode)
    #[arg(long, default_value = "5000")]
    script_timeout_ms: u64,

    /// Load and validate configuration, then exit
    #[arg(long)]
    validate_only: bool,
}

impl Args {
    fn settings(&self) -> EngineSettings {
        EngineSettings {
            listen: ListenSettings {
                host: self.host,
                port: self.port,
            },
            mode: self.mode,
            script_pool: ScriptPoolSettings {
                workers: self.script_workers,
                queue_size: self.script_queue_size,
                timeout_ms: self.script_timeout_ms,
            },
            ..Default::default()
        }
        .with_process_environment()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = args.settings();

    let config = LoadedConfig::from_dir(&args.config_dir).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            args.config_dir.display()
        )
    })?;
    let pipeline = Pipeline::builder(config)
        .settings(settings.clone())
        .build()
        .context("Invalid configuration")?;

    if args.validate_only {
        info!(
            "Configuration in {} is valid",
            args.config_dir.display()
        );
        return Ok(());
    }

    let addr = settings.listen.socket_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    mirage_http::server::serve(listener, Arc::new(pipeline), async {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;

    info!("Mirage stopped");
    Ok(())
}
