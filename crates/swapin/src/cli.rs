//! Exposes the command line application.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bytes::BytesMut;
use clap::{Args, Parser, Subcommand};
use swapin_service::backend::ufs::UfsDir;
use swapin_service::backend::{DISK_OK, UfsBackend};
use swapin_service::client::ReadCursor;
use swapin_service::config::Config;
use swapin_service::entry::{StoreEntry, SwapLocation, SwapStatus};
use swapin_service::key::StoreKey;
use swapin_service::metrics;
use swapin_service::swapin::{BeginOutcome, SwapInCoordinator};
use tokio::sync::oneshot;

use crate::logging;

/// Identifies a stored object.
#[derive(Args, Debug)]
struct ObjectArgs {
    /// The index of the cache directory in the configuration.
    #[arg(long)]
    dir: i32,

    /// The file number, in hex.
    #[arg(long, value_parser = parse_file_number)]
    file: i32,
}

impl ObjectArgs {
    fn location(&self) -> SwapLocation {
        SwapLocation::new(self.dir, self.file)
    }
}

fn parse_file_number(s: &str) -> Result<i32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    i32::from_str_radix(digits, 16).map_err(|e| e.to_string())
}

/// Swapin commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Swap a stored object in and print what was read.
    Read {
        #[command(flatten)]
        object: ObjectArgs,

        /// The URL the object was cached for.
        #[arg(long, default_value = "http://localhost/")]
        url: String,

        /// Write the body to this file instead of printing a summary.
        #[arg(long, short, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Print where a stored object lives on disk.
    Path {
        #[command(flatten)]
        object: ObjectArgs,
    },
}

/// Command line interface parser.
#[derive(Parser, Debug)]
#[command(bin_name = "swapin", version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: This happens before any threads are spawned.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();
        if let Some(hostname_tag) = config.metrics.hostname_tag.clone() {
            if tags.contains_key(&hostname_tag) {
                tracing::warn!(
                    "tag {} defined both as hostname tag and as a custom tag",
                    hostname_tag
                );
            }
            if let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok()) {
                tags.insert(hostname_tag, hostname);
            } else {
                tracing::error!("could not read host name");
            }
        }
        metrics::configure_statsd(&config.metrics.prefix, statsd, tags)
            .context("failed to configure metrics")?;
    }

    match cli.command {
        Command::Read {
            object,
            url,
            output,
        } => read(&config, object.location(), &url, output.as_deref())
            .context("failed to read stored object")?,
        Command::Path { object } => {
            let path = object_path(&config, object.location())?;
            println!("{}", path.display());
        }
    }

    Ok(())
}

fn object_path(config: &Config, location: SwapLocation) -> Result<PathBuf> {
    let Some(dir) = usize::try_from(location.dirn)
        .ok()
        .and_then(|dirn| config.cache_dirs.get(dirn))
    else {
        bail!("unknown cache directory {}", location.dirn);
    };
    let Ok(filen) = u32::try_from(location.filen) else {
        bail!("invalid file number {}", location.filen);
    };
    Ok(UfsDir::new(dir).file_path(filen))
}

fn read(config: &Config, location: SwapLocation, url: &str, output: Option<&Path>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("swapin-io")
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async {
        let backend = UfsBackend::from_current(&config.cache_dirs);
        let coordinator = SwapInCoordinator::new(Arc::new(backend));

        let mut entry =
            StoreEntry::on_disk(StoreKey::public("GET", url), location, SwapStatus::Done);
        // nothing else is rebuilding this entry
        entry.set_validated(true);
        entry.create_mem_object(url);
        let entry = entry.into_shared();

        let cursor = ReadCursor::new(&entry);
        let (sender, receiver) = oneshot::channel();
        cursor.set_pending(BytesMut::new(), move |buffer, errflag| {
            sender.send((buffer, errflag)).ok();
        });

        match coordinator.begin(&cursor, &entry)? {
            BeginOutcome::Submitted => {}
            BeginOutcome::NotReady(reason) => bail!("object cannot be swapped in: {reason}"),
        }

        let (buffer, errflag) = receiver.await.context("swap-in was abandoned")?;
        if errflag != DISK_OK {
            bail!("swap-in failed with status {errflag}");
        }

        let confirmed = match entry.lock() {
            Ok(entry) => entry.location(),
            Err(_) => bail!("entry lock poisoned"),
        };

        match output {
            Some(path) => {
                tokio::fs::write(path, &buffer)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                tracing::info!(path = %path.display(), bytes = buffer.len(), "Wrote stored object");
            }
            None => println!(
                "{} {} ({} bytes)",
                console::style(confirmed).bold(),
                url,
                buffer.len()
            ),
        }

        Ok(())
    })
}
