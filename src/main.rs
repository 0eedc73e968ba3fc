//! `msgswitch` - run a message switch.
//!
//! # Usage
//!
//! ```bash
//! msgswitch --listen 0.0.0.0:6380 --admin-code secret
//! msgswitch --config switch.json --log debug
//! ```
//!
//! Flags override values from the configuration file. `RELOAD` re-reads the
//! same file.

use std::path::PathBuf;

use clap::Parser;
use msgswitch::{Mode, SwitchConfig, SwitchContext, SwitchServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "msgswitch")]
#[command(about = "TCP message switch with endpoint registry and fan-out routing", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:6380
    #[arg(short, long)]
    listen: Option<String>,

    /// Secret for the admin role
    #[arg(long)]
    admin_code: Option<String>,

    /// Secret for every other role
    #[arg(long)]
    access_code: Option<String>,

    /// Serving mode: switch or proxy
    #[arg(long)]
    mode: Option<Mode>,

    /// Count the length field itself in the wire payload length
    #[arg(long)]
    length_includes_self: bool,

    /// Log filter; falls back to RUST_LOG, then "info,msgswitch=debug"
    #[arg(long)]
    log: Option<String>,
}

impl Args {
    fn into_config(self) -> msgswitch::Result<(SwitchConfig, Option<PathBuf>)> {
        let mut config = match &self.config {
            Some(path) => SwitchConfig::load(path)?,
            None => SwitchConfig::default(),
        };
        if let Some(listen) = self.listen {
            config = config.listen(listen);
        }
        if let Some(code) = self.admin_code {
            config = config.admin_code(code);
        }
        if let Some(code) = self.access_code {
            config = config.access_code(code);
        }
        if let Some(mode) = self.mode {
            config = config.mode(mode);
        }
        if self.length_includes_self {
            config = config.length_includes_self(true);
        }
        config.validate()?;
        Ok((config, self.config))
    }
}

fn log_filter(flag: Option<&str>) -> EnvFilter {
    match flag {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,msgswitch=debug".into()),
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(log_filter(args.log.as_deref()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let (config, config_path) = args.into_config()?;
    if config.admin_code.is_empty() {
        tracing::warn!("admin code is empty; any client can register as admin");
    }

    let switch = SwitchContext::new(&config, config_path);
    let server = SwitchServer::bind(&config, switch).await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await?;

    tracing::info!("switch stopped");
    Ok(())
}
