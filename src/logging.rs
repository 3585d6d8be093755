use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

pub const LOGS_DIR: &str = "logs";

const LOG_BASENAME: &str = "portald";
const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;
const KEEP_LOG_FILES: usize = 5;

static LOGGER: OnceCell<ActiveLogger> = OnceCell::new();

struct ActiveLogger {
    dir: PathBuf,
    _handle: LoggerHandle,
}

/// Starts file logging under `<workspace>/logs`. stdout carries the protocol,
/// so nothing may ever log there. The first selected workspace keeps the log
/// file for the rest of the process; switching workspaces does not move it.
pub fn init_workspace_logging(workspace: &Path) -> anyhow::Result<()> {
    let log_dir = workspace.join(LOGS_DIR);
    if let Some(active) = LOGGER.get() {
        if active.dir != log_dir {
            log::info!(
                "logging stays in {}; not moving to {}",
                active.dir.display(),
                log_dir.display()
            );
        }
        return Ok(());
    }

    std::fs::create_dir_all(&log_dir)?;
    let handle = Logger::try_with_env_or_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory(&log_dir)
                .basename(LOG_BASENAME),
        )
        .rotate(
            Criterion::Size(MAX_LOG_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(KEEP_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()?;

    let _ = LOGGER.set(ActiveLogger {
        dir: log_dir,
        _handle: handle,
    });
    log::info!("portald {} logging started", env!("CARGO_PKG_VERSION"));
    Ok(())
}
