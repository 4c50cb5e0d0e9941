//! sqx-marshal: convert between JSON-lines trades and raw capture streams

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sqx-marshal", about = "Convert trades between JSON lines and raw stream bytes")]
struct Args {
    /// JSON lines in, raw stream out
    #[arg(short = 's', long, conflicts_with = "deserialize")]
    serialize: bool,

    /// Raw stream in, JSON lines out
    #[arg(short = 'd', long)]
    deserialize: bool,

    /// Output file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Input file, `-` for stdin
    #[arg(default_value = "-")]
    input: PathBuf,
}

fn open_input(path: &PathBuf) -> Result<Box<dyn Read>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(io::stdin()));
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Box::new(file))
}

fn open_output(path: Option<&PathBuf>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("creating {}", path.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.serialize == args.deserialize {
        bail!("exactly one of -s/--serialize or -d/--deserialize is required");
    }

    let mut input = open_input(&args.input)?;
    let output = open_output(args.output.as_ref())?;

    if args.serialize {
        let written = sqx_marshal::serialize(BufReader::new(input), output)?;
        info!(records = written, "Serialized trades");
    } else {
        let mut raw = Vec::new();
        input.read_to_end(&mut raw).context("reading raw stream")?;
        let summary = sqx_marshal::deserialize(&raw, output)?;
        info!(
            records = summary.recovered,
            skipped_bytes = summary.skipped_bytes,
            "Deserialized trades"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args() {
        let args = Args::try_parse_from(["sqx-marshal", "-d", "-o", "out.jsonl", "capture.bin"]).unwrap();
        assert!(args.deserialize);
        assert_eq!(args.output, Some(PathBuf::from("out.jsonl")));
        assert_eq!(args.input, PathBuf::from("capture.bin"));

        let args = Args::try_parse_from(["sqx-marshal", "-s"]).unwrap();
        assert_eq!(args.input, PathBuf::from("-"));
        assert!(Args::try_parse_from(["sqx-marshal", "-s", "-d"]).is_err());
    }
}
