use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use mastro_core::{load_mastro_config, MasteringPipeline};

#[derive(Parser, Debug)]
#[command(author, version, about = "mastro mastering service daemon", long_about = None)]
struct Cli {
    /// Path to mastro.toml
    #[arg(long, default_value = "configs/mastro.toml")]
    config: PathBuf,
    /// Override [server].bind_addr from the config
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_mastro_config(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.server.bind_addr = bind;
    }
    let bind_addr = config.server.bind_addr.clone();

    info!(
        "starting mastrod v{} on {} (presets: builtin, default {})",
        env!("CARGO_PKG_VERSION"),
        bind_addr,
        config.mastering.default_preset
    );

    let pipeline = MasteringPipeline::new(config)?;
    let app = mastrod::build_router(pipeline);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
