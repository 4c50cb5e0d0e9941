//! sqx-feed: streams exchange trades onto the bus and into broker streams
//!
//! Exit codes: 0 clean shutdown, 1 configuration error, 2 runtime error.

mod app;
mod error;
mod logging;
mod shutdown;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use sqx_metadata::Environment;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::EXIT_CONFIG;

#[derive(Parser, Debug)]
#[command(name = "sqx-feed")]
#[command(about = "Crypto trade feed runtime")]
struct Args {
    /// Path to the environment YAML document
    #[arg(short, long, env = "SQX_FEED_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let env = match Environment::load(&args.config) {
        Ok(env) => env,
        Err(e) => {
            eprintln!("sqx-feed: {}: {}", args.config.display(), e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if let Err(e) = logging::init(&env.logger) {
        eprintln!("sqx-feed: {}", e);
        return ExitCode::from(e.exit_code());
    }
    info!(config = %args.config.display(), "Loaded environment");

    let root = CancellationToken::new();
    tokio::spawn(shutdown::cancel_on_signal(root.clone()));

    match app::run(env, root).await {
        Ok(()) => {
            info!("sqx-feed stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, exit_code = e.exit_code(), "sqx-feed failed");
            ExitCode::from(e.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_flag() {
        let args = Args::try_parse_from(["sqx-feed", "-c", "/etc/sqx/feed.yaml"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/sqx/feed.yaml"));

        let args = Args::try_parse_from(["sqx-feed", "--config", "feed.yaml"]).unwrap();
        assert_eq!(args.config, PathBuf::from("feed.yaml"));
    }
}
