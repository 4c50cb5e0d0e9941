//! sqx-replay: print trades recovered from a raw capture

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sqx_marshal::ReplaySummary;
use sqx_schema::TradeStreamParser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sqx-replay", about = "Replay trades from a raw capture file")]
struct Args {
    /// Raw capture file
    #[arg(short, long)]
    input: PathBuf,

    /// Trades to print; 0 prints none
    #[arg(short, long, default_value_t = 100)]
    limit: usize,

    /// Print recovery statistics after the trades
    #[arg(long)]
    summary: bool,

    /// Print full records instead of one-line summaries
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let raw = fs::read(&args.input).with_context(|| format!("reading {}", args.input.display()))?;
    debug!(bytes = raw.len(), input = %args.input.display(), "Loaded capture");

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut summary = ReplaySummary::default();
    let mut parser = TradeStreamParser::new(&raw);

    for trade in parser.by_ref() {
        if summary.recovered < args.limit {
            if args.verbose {
                writeln!(out, "{:#?}", trade)?;
            } else {
                writeln!(
                    out,
                    "{} {} {} @ {} ts={}",
                    trade.id_str(),
                    trade.side,
                    trade.quantity,
                    trade.price,
                    trade.timestamp
                )?;
            }
        }
        summary.record(&trade);
    }
    summary.finish(&parser);

    if args.summary {
        writeln!(out)?;
        write!(out, "{}", summary)?;
    }
    out.flush()?;
    Ok(())
}
