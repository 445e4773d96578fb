//! vmhost CLI - module tooling for a hosted VM
//!
//! All host configuration comes from an optional host.json

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

mod config;
mod logging;

use crate::config::LogConfig;
use crate::logging::{LogFormat, TracingSink};
use vmhost_api::{BootError, HostError};
use vmhost_config::HostConfig;
use vmhost_core::{
    resolve_closure, scan_imports, FileTransport, FilesystemWriter, LoadScheduler, ModuleIndex,
    Transport,
};
use vmhost_log::{info, Level, Logger};
use vmhost_vfs::NativeFileSystem;

#[derive(Parser)]
#[command(
    name = "vmhost",
    about = "Scan, resolve and install the library modules a guest program needs",
    version
)]
struct Cli {
    /// Configuration file path (default: ./host.json when present)
    #[arg(long, short, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// 日志级别: error, warn, info, debug, trace
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: Level,

    /// Log level of the host crates (registry, loader, transport); defaults to --log-level
    #[arg(long, value_name = "LEVEL", global = true)]
    host_log_level: Option<Level>,

    #[arg(long, value_enum, default_value = "compact", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the module names a source file imports
    Scan { file: PathBuf },
    /// Print the dependency closure of a source file
    Resolve { file: PathBuf },
    /// Fetch the dependency closure of a source file and install it under DIR
    Install {
        file: PathBuf,
        #[arg(long, value_name = "DIR")]
        out: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    logging::init(&LogConfig::new(cli.log_level, cli.host_log_level), cli.log_format);
    let logger = Logger::new(cli.host_log_level.unwrap_or(cli.log_level)).with_sink(TracingSink);

    match run(cli, &logger).await {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

/// Execute one command; the returned lines go to stdout
async fn run(cli: Cli, logger: &Arc<Logger>) -> Result<Vec<String>, String> {
    match cli.command {
        Command::Scan { file } => {
            let source = read_source(&file)?;
            Ok(scan_imports(&source))
        }
        Command::Resolve { file } => {
            let config = config::load_host_config(cli.config.as_deref())?;
            let source = read_source(&file)?;
            let transport = FileTransport::new(&config.root);
            let index = fetch_index(&config, &transport, logger).await?;

            let closure = resolve_closure(&index, scan_imports(&source));
            Ok(closure.into_iter().collect())
        }
        Command::Install { file, out } => {
            let config = Arc::new(config::load_host_config(cli.config.as_deref())?);
            let source = read_source(&file)?;
            let transport = FileTransport::new(&config.root);
            let index = fetch_index(&config, &transport, logger).await?;
            install(&config, &index, &transport, &source, &out, logger).await
        }
    }
}

fn read_source(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("无法读取 '{}': {}", path.display(), e))
}

async fn fetch_index(
    config: &HostConfig,
    transport: &FileTransport,
    logger: &Arc<Logger>,
) -> Result<ModuleIndex, String> {
    info!(logger, "fetching module index {}", config.index_file);
    let bytes = transport
        .fetch(&config.index_file)
        .await
        .map_err(|e| BootError::IndexFetch(e).to_string())?;
    ModuleIndex::from_json(&bytes).map_err(|e| BootError::Index(e).to_string())
}

/// Lay out eager modules and the closure of `source` the way the VM sees them,
/// beneath `out`
async fn install(
    config: &Arc<HostConfig>,
    index: &ModuleIndex,
    transport: &FileTransport,
    source: &str,
    out: &Path,
    logger: &Arc<Logger>,
) -> Result<Vec<String>, String> {
    std::fs::create_dir_all(out).map_err(|e| format!("无法创建 '{}': {}", out.display(), e))?;
    let fs = NativeFileSystem::with_base(out);
    let writer = FilesystemWriter::new(config.lib_root.clone(), Arc::clone(logger));
    let scheduler = LoadScheduler::new(Arc::clone(config), Arc::clone(logger));

    for (descriptor, contents) in index.eager() {
        writer
            .write(&fs, descriptor, contents.as_bytes())
            .map_err(|e| {
                BootError::Eager {
                    module: descriptor.name.clone(),
                    source: e,
                }
                .to_string()
            })?;
        scheduler.mark_installed(&descriptor.name);
    }

    let closure = resolve_closure(index, scan_imports(source));
    scheduler
        .ensure_loaded(index, &closure, transport, &writer.target(&fs))
        .await
        .map_err(|e| HostError::from(e).to_report().to_string())?;

    info!(
        logger,
        "installed {} modules into {}",
        scheduler.loaded_modules().len(),
        out.display()
    );
    Ok(scheduler.loaded_modules())
}
