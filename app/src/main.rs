use std::error::Error;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sqlgrid_core::config::{default_config_dir, FileGridConfigStore, GridConfig};
use sqlgrid_tui::{TuiError, TuiOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_ROWS: usize = 100_000;
const LOG_FILE_NAME: &str = "sqlgrid.log";
const LOG_FILTER_ENV: &str = "SQLGRID_LOG";

fn run_app(
    config: &GridConfig,
    options: TuiOptions,
    run_tui: impl FnOnce(&GridConfig, TuiOptions) -> Result<(), TuiError>,
) -> Result<(), Box<dyn Error>> {
    info!(
        rows = options.rows,
        chunk_size = config.chunk_size,
        overscan = config.overscan,
        "starting {}",
        sqlgrid_tui::ui_name()
    );
    run_tui(config, options)?;
    Ok(())
}

fn parse_rows<I>(args: I) -> Result<usize, String>
where
    I: IntoIterator<Item = String>,
{
    let mut rows = DEFAULT_ROWS;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--rows" => {
                let raw = args
                    .next()
                    .ok_or_else(|| "--rows requires a value".to_string())?;
                rows = raw
                    .parse()
                    .map_err(|_| format!("invalid row count `{raw}`"))?;
            }
            other => return Err(format!("unknown argument `{other}`")),
        }
    }
    Ok(rows)
}

fn open_log_file(config_dir: &Path) -> io::Result<File> {
    fs::create_dir_all(config_dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(config_dir.join(LOG_FILE_NAME))
}

// The terminal belongs to the grid, so logs go to a file.
fn init_tracing(config_dir: &Path) -> Result<(), Box<dyn Error>> {
    let log_file = open_log_file(config_dir)?;
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(log_file))
        .try_init()
        .map_err(|error| io::Error::other(error.to_string()))?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let rows = parse_rows(std::env::args().skip(1))?;
    let config_dir: PathBuf = default_config_dir()?;
    init_tracing(&config_dir)?;

    let store = FileGridConfigStore::load_default()?;
    let options = TuiOptions {
        rows,
        export_dir: std::env::current_dir()?,
    };
    run_app(store.config(), options, sqlgrid_tui::run)
}
