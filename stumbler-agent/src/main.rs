//! stumbler: decode beacon advertisements and replay observation logs.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, BufReader};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stumbler_agent::inspect::{beacon_table, decode_lines};
use stumbler_agent::replay::Replayer;
use stumbler_agent::sink::{JsonLinesSink, ReportSink};
use stumbler_agent::AgentError;
use stumbler_core::config::{self, Config};
use stumbler_core::{parse_layouts, BeaconLayout};

#[derive(Parser)]
#[command(name = "stumbler", version, about = "Wireless stumbler: beacon decoding and report assembly")]
struct Cli {
    /// Config file (defaults to ~/.stumbler/config.yaml)
    #[arg(long, global = true, env = "STUMBLER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode hex advertisements (one per line, optionally `mac;hex`) and print a beacon table
    Decode {
        /// Path to advertisement file, or `-` for stdin
        file: PathBuf,

        /// Beacon layout to try; repeatable. Overrides the configured layouts.
        #[arg(short, long = "layout")]
        layouts: Vec<String>,

        /// Show every decoded advertisement instead of the summary table
        #[arg(short, long)]
        raw: bool,
    },

    /// Replay an NDJSON observation log and write reports as NDJSON
    Replay {
        /// Path to the log, or `-` for stdin
        file: PathBuf,

        /// Write reports here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also report the final, partial window
        #[arg(long)]
        flush_remaining: bool,
    },

    /// Print the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    let result = match load_config(cli.config.as_ref()) {
        Ok(config) => match cli.command {
            Commands::Decode {
                file,
                layouts,
                raw,
            } => cmd_decode(&config, file, &layouts, raw),
            Commands::Replay {
                file,
                output,
                flush_remaining,
            } => cmd_replay(&config, file, output, flush_remaining).await,
            Commands::Config { write } => cmd_config(&config, cli.config.as_ref(), write),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, AgentError> {
    let config = match path {
        Some(p) => config::load_config_from(p)?,
        None => config::load_config()?,
    };
    Ok(config)
}

fn layouts_for(config: &Config, overrides: &[String]) -> Result<Vec<BeaconLayout>, AgentError> {
    let layouts = if overrides.is_empty() {
        config.beacon_layouts()?
    } else {
        parse_layouts(overrides)?
    };
    Ok(layouts)
}

fn cmd_decode(
    config: &Config,
    file: PathBuf,
    overrides: &[String],
    raw: bool,
) -> Result<(), AgentError> {
    let layouts = layouts_for(config, overrides)?;

    let reader: Box<dyn BufRead> = if file.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        Box::new(io::BufReader::new(std::fs::File::open(&file)?))
    };

    let summary = decode_lines(reader, &layouts);

    if raw {
        for d in &summary.decoded {
            let mac = d.mac.map(|m| m.to_string()).unwrap_or("-".into());
            println!("{}\t{mac}\t{:?}", d.line, d.data);
        }
        return Ok(());
    }

    let rows = summary.beacons();
    println!();
    println!(
        "Advertisements: {} parsed, {} decoded, {} invalid, {} beacons",
        summary.total_lines,
        summary.decoded.len(),
        summary.invalid_lines,
        rows.len()
    );
    println!();
    if !rows.is_empty() {
        println!("{}", beacon_table(&rows));
    }
    Ok(())
}

async fn cmd_replay(
    config: &Config,
    file: PathBuf,
    output: Option<PathBuf>,
    flush_remaining: bool,
) -> Result<(), AgentError> {
    let layouts = config.beacon_layouts()?;

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if file.to_str() == Some("-") {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        Box::new(BufReader::new(tokio::fs::File::open(&file).await?))
    };

    let sink: Arc<dyn ReportSink> = match output {
        Some(path) => Arc::new(JsonLinesSink::new(tokio::fs::File::create(path).await?)),
        None => Arc::new(JsonLinesSink::new(tokio::io::stdout())),
    };

    let summary = Replayer::new(config.aggregator_config(), layouts)
        .flush_remaining(flush_remaining)
        .run(reader, sink.as_ref())
        .await?;

    eprintln!(
        "Replay complete: {} events, {} skipped, {} ignored while idle, {} reports",
        summary.events, summary.skipped_lines, summary.ignored_events, summary.reports
    );
    eprintln!(
        "Dropped: {} hidden networks, {} unidentifiable cells",
        summary.hidden_networks_dropped, summary.unidentifiable_cells_dropped
    );
    Ok(())
}

fn cmd_config(config: &Config, path: Option<&PathBuf>, write: bool) -> Result<(), AgentError> {
    // Fail early on layouts that would break decoding.
    config.beacon_layouts()?;
    if write {
        let written = match path {
            Some(p) => {
                config::save_config_to(config, p)?;
                p.clone()
            }
            None => config::save_config(config)?,
        };
        eprintln!("Config written to {}", written.display());
    } else {
        print!("{}", config::serialize_config(config));
    }
    Ok(())
}
