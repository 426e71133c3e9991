//! gocqd - Process supervisor for go-cqhttp bot gateways
//!
//! This is the binary entry point. All logic lives in the library.

use std::path::PathBuf;

use clap::Parser;
use gocq_app::config::init_config_file;
use gocq_core::logging;

/// gocqd - Process supervisor for go-cqhttp bot gateways
#[derive(Parser, Debug)]
#[command(name = "gocqd")]
#[command(about = "Supervise go-cqhttp gateways and stream their logs as NDJSON", long_about = None)]
struct Args {
    /// Path to gocqd.toml (defaults to ./gocqd.toml when present)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Register configured accounts without starting any of them
    #[arg(long)]
    no_auto_start: bool,

    /// Write a commented default config to PATH and exit
    #[arg(long, value_name = "PATH")]
    init: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    if let Some(path) = args.init {
        init_config_file(&path)?;
        eprintln!("Wrote {}", path.display());
        return Ok(());
    }

    logging::init()?;

    if let Err(e) = gocq_supervisor::run(args.config.as_deref(), !args.no_auto_start).await {
        tracing::error!("gocqd failed: {}", e);
        if e.is_fatal() {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["gocqd", "--config", "bots.toml", "--no-auto-start"]);
        assert_eq!(args.config, Some(PathBuf::from("bots.toml")));
        assert!(args.no_auto_start);
        assert!(args.init.is_none());
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["gocqd"]);
        assert!(args.config.is_none());
        assert!(!args.no_auto_start);
    }
}
