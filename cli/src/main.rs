//! `treewatch`: print every change under a directory tree.

mod printer;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use treewatch_directory_watcher::error::ReadError;
use treewatch_directory_watcher::{DirectoryWatcher, WatcherConfig, WatcherError};

const EXIT_INIT: u8 = 1;
const EXIT_SEED: u8 = 2;
const EXIT_READ: u8 = 3;
const EXIT_EOF: u8 = 4;
const EXIT_USAGE: u8 = 5;
const EXIT_CONFIG: u8 = 6;

/// Watch a directory and everything beneath it.
#[derive(Debug, Parser)]
#[command(name = "treewatch")]
struct Cli {
    /// Directory to watch.
    #[arg(required_unless_present = "config")]
    root: Option<PathBuf>,

    /// TOML file with watcher settings; ROOT overrides its `root`.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print one JSON object per event.
    #[arg(long)]
    json: bool,

    /// How long a MOVED_FROM waits for its MOVED_TO.
    #[arg(long, value_name = "MS")]
    pairing_window_ms: Option<u64>,

    /// Do not watch directories deeper than this below ROOT.
    #[arg(long, value_name = "N")]
    max_depth: Option<usize>,

    /// Follow the tree into other mounted filesystems.
    #[arg(long)]
    cross_mounts: bool,

    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn watcher_config(&self) -> Result<WatcherConfig, WatcherError> {
        let mut config = match &self.config {
            Some(path) => WatcherConfig::load(path).map_err(|e| match e {
                WatcherError::Config(_) => e,
                other => WatcherError::Config(format!("{}: {other}", path.display())),
            })?,
            None => WatcherConfig::default(),
        };
        if let Some(root) = &self.root {
            config = config.with_root(root);
        }
        if let Some(ms) = self.pairing_window_ms {
            config = config.with_pairing_window(Duration::from_millis(ms));
        }
        if let Some(depth) = self.max_depth {
            config = config.with_max_depth(depth);
        }
        if self.cross_mounts {
            config = config.cross_file_systems();
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn exit_code(err: &WatcherError) -> u8 {
    match err {
        WatcherError::Init(_) => EXIT_INIT,
        WatcherError::Traversal(_) | WatcherError::Registration(_) => EXIT_SEED,
        WatcherError::Read(ReadError::EndOfStream) => EXIT_EOF,
        WatcherError::Read(_) => EXIT_READ,
        WatcherError::Config(_) => EXIT_CONFIG,
        WatcherError::ChannelSend | WatcherError::Io(_) => EXIT_INIT,
    }
}

#[cfg(target_os = "linux")]
fn spawn(config: WatcherConfig) -> Result<DirectoryWatcher, WatcherError> {
    DirectoryWatcher::spawn(config)
}

#[cfg(not(target_os = "linux"))]
fn spawn(_config: WatcherConfig) -> Result<DirectoryWatcher, WatcherError> {
    Err(WatcherError::Init(io::Error::new(
        io::ErrorKind::Unsupported,
        "inotify is only available on Linux",
    )))
}

fn fail(err: &WatcherError) -> ExitCode {
    error!("{err}");
    eprintln!("treewatch: {err}");
    ExitCode::from(exit_code(err))
}

/// Print clap's help or usage error where clap would, then exit.
fn usage_exit(err: &clap::Error) -> ExitCode {
    init_logging(false);
    let printed = if err.use_stderr() {
        write_usage(&mut io::stderr(), err)
    } else {
        write_usage(&mut io::stdout(), err)
    };
    if let Err(e) = printed {
        debug!("Failed to print usage: {e}");
    }
    ExitCode::from(EXIT_USAGE)
}

fn write_usage<W: Write>(out: &mut W, err: &clap::Error) -> io::Result<()> {
    write!(out, "{}", err.render())?;
    out.flush()
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => return usage_exit(&e),
    };
    init_logging(cli.verbose);

    let config = match cli.watcher_config() {
        Ok(config) => config,
        Err(e) => return fail(&e),
    };

    let mut watcher = match spawn(config) {
        Ok(watcher) => watcher,
        Err(e) => return fail(&e),
    };
    info!(
        "Watching {} directories under {}",
        watcher.watched(),
        watcher.root().display()
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stdout = io::stdout().lock();
    loop {
        tokio::select! {
            event = watcher.recv() => {
                let Some(event) = event else { break };
                if let Err(e) = printer::write_event(&mut stdout, &event, cli.json) {
                    info!("Output closed: {e}");
                    break;
                }
            }
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
        }
    }
    drop(stdout);

    match tokio::task::spawn_blocking(move || watcher.join()).await {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => fail(&e),
        Err(e) => {
            eprintln!("treewatch: {e}");
            ExitCode::from(EXIT_INIT)
        }
    }
}
