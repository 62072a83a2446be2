use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use timeline_core::{
    load_timeline_config_from_env, ComputePool, SystemClock, TimelineConfig,
    TimelineConfigMetadata, TimelineController,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{info, warn};

mod commands;
mod driver;
mod source;

use commands::{parse_command_line, CommandParseError, InspectorCommand};
use source::DirectorySource;

#[derive(Parser, Debug)]
#[command(author, version, about = "Telemetry timeline inspector", long_about = None)]
struct Cli {
    /// Export directory holding manifest.json and the frame documents.
    #[arg(long, default_value = ".")]
    dir: PathBuf,
    /// Timeline config file; falls back to TIMELINE_CONFIG_PATH, then builtin defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Run union and flow jobs on the calling thread.
    #[arg(long)]
    inline_compute: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let (config, metadata) = match &cli.config {
        Some(path) => (
            Arc::new(TimelineConfig::from_file(path)?),
            TimelineConfigMetadata::new(Some(path.clone())),
        ),
        None => load_timeline_config_from_env(),
    };
    info!("Timeline config: {}", config_source(&metadata));
    let compute = if cli.inline_compute {
        ComputePool::in_process()
    } else {
        ComputePool::from_config(config.compute())
    };
    let controller = TimelineController::new(config, Arc::new(SystemClock::new()), compute);
    let source = Arc::new(DirectorySource::new(cli.dir));
    info!("Reading timeline export from {}", source.root().display());

    let (command_tx, command_rx) = unbounded_channel::<InspectorCommand>();
    tokio::spawn(read_commands(command_tx));

    driver::run(controller, source, command_rx).await
}

async fn read_commands(sender: UnboundedSender<InspectorCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_command_line(&line) {
                Ok(command) => {
                    if sender.send(command).is_err() {
                        break;
                    }
                }
                Err(CommandParseError::Empty) => {}
                Err(err) => warn!("Invalid command: {}", err),
            },
            Ok(None) => break,
            Err(err) => {
                warn!("Command read error: {}", err);
                break;
            }
        }
    }
}

fn config_source(metadata: &TimelineConfigMetadata) -> String {
    match metadata.path() {
        Some(path) => path.display().to_string(),
        None => "builtin defaults".to_string(),
    }
}
