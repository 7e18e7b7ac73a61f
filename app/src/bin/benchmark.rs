use std::io;
use std::time::{Duration, Instant};

use sqlgrid_adapters::memory::MemoryRowStore;
use sqlgrid_core::config::GridConfig;
use sqlgrid_core::controller::GridController;
use sqlgrid_core::keyboard::{GridKey, KeyStroke};
use sqlgrid_core::range_cache::ResultId;
use sqlgrid_core::row::{Column, ColumnKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseOutcome {
    Config,
    HelpRequested,
}

#[derive(Debug, Clone)]
struct BenchmarkConfig {
    rows: usize,
    chunk_size: usize,
    viewport_px: f64,
    steps: usize,
    assert_max_fetches: Option<usize>,
    assert_max_window_us: Option<f64>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            rows: 1_000_000,
            chunk_size: GridConfig::default().chunk_size,
            viewport_px: 800.0,
            steps: 2_000,
            assert_max_fetches: None,
            assert_max_window_us: None,
        }
    }
}

#[derive(Debug, Clone)]
struct SweepMetrics {
    fetches: usize,
    rows_loaded: usize,
    windows: usize,
    max_window: Duration,
    total_window: Duration,
    elapsed: Duration,
}

impl SweepMetrics {
    fn mean_window_us(&self) -> f64 {
        if self.windows == 0 {
            return 0.0;
        }
        self.total_window.as_secs_f64() * 1_000_000.0 / self.windows as f64
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = parse_args()?;
    let metrics = run_scroll_sweep(&config).await;
    let keyboard_fetches = run_keyboard_jump(&config).await;

    println!("metric.rows={}", config.rows);
    println!("metric.steps={}", config.steps);
    println!("metric.fetches={}", metrics.fetches);
    println!("metric.rows_loaded={}", metrics.rows_loaded);
    println!("metric.window_mean_us={:.3}", metrics.mean_window_us());
    println!(
        "metric.window_max_us={:.3}",
        metrics.max_window.as_secs_f64() * 1_000_000.0
    );
    println!(
        "metric.sweep_elapsed_ms={:.3}",
        metrics.elapsed.as_secs_f64() * 1_000.0
    );
    println!("metric.ctrl_end_fetches={keyboard_fetches}");
    if let Some(bytes) = peak_memory_bytes_best_effort() {
        println!("metric.peak_memory_bytes={bytes}");
    } else {
        println!("metric.peak_memory_bytes=n/a");
    }

    enforce_assertions(&config, &metrics)?;
    Ok(())
}

fn columns() -> Vec<Column> {
    vec![
        Column::new("id", ColumnKind::Number).primary_key(),
        Column::new("user_id", ColumnKind::Number).editable(),
        Column::new("category", ColumnKind::Text).editable(),
        Column::new("created_at", ColumnKind::Date).editable(),
    ]
}

fn controller(config: &BenchmarkConfig) -> GridController<MemoryRowStore, MemoryRowStore> {
    let columns = columns();
    let store = MemoryRowStore::synthetic(config.rows, &columns);
    let grid_config = GridConfig {
        chunk_size: config.chunk_size,
        ..GridConfig::default()
    };
    let mut controller = GridController::new(store.clone(), store, &grid_config, 1);
    controller.open_result(ResultId::new("bench"), config.rows, columns);
    controller.set_viewport_height(config.viewport_px);
    controller
}

/// Scrolls top to bottom in even steps, timing window computation and
/// loading whatever each window misses.
async fn run_scroll_sweep(config: &BenchmarkConfig) -> SweepMetrics {
    let mut controller = controller(config);
    let total_size = controller.virtualizer().total_size();
    let steps = config.steps.max(1);
    let started_at = Instant::now();
    let mut max_window = Duration::ZERO;
    let mut total_window = Duration::ZERO;

    for step in 0..=steps {
        let offset = total_size * step as f64 / steps as f64;
        controller.scroll_to_offset(offset);

        let window_started = Instant::now();
        let frame = controller.frame();
        let window_time = window_started.elapsed();
        max_window = max_window.max(window_time);
        total_window += window_time;
        debug_assert!(!frame.rows.is_empty() || config.rows == 0);

        controller.sync_window().await;
    }

    SweepMetrics {
        fetches: controller.source().fetch_count(),
        rows_loaded: controller.engine().known_row_count(),
        windows: steps + 1,
        max_window,
        total_window,
        elapsed: started_at.elapsed(),
    }
}

/// Ctrl+End from the top must load only the first and the last window.
async fn run_keyboard_jump(config: &BenchmarkConfig) -> usize {
    let mut controller = controller(config);
    controller.sync_window().await;
    controller.handle_key(KeyStroke::ctrl(GridKey::End)).await;
    controller.sync_window().await;
    controller.source().fetch_count()
}

fn enforce_assertions(config: &BenchmarkConfig, metrics: &SweepMetrics) -> io::Result<()> {
    if let Some(max_fetches) = config.assert_max_fetches {
        if metrics.fetches > max_fetches {
            return Err(io_other(format!(
                "sweep issued {} fetches, above threshold {max_fetches}",
                metrics.fetches
            )));
        }
    }

    if let Some(max_window_us) = config.assert_max_window_us {
        let mean = metrics.mean_window_us();
        if mean > max_window_us {
            return Err(io_other(format!(
                "mean window time {mean:.3}us exceeded threshold {max_window_us:.3}us"
            )));
        }
    }

    Ok(())
}

#[cfg(target_os = "linux")]
fn peak_memory_bytes_best_effort() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/self/status").ok()?;
    let vm_hwm_line = contents.lines().find(|line| line.starts_with("VmHWM:"))?;
    let kb = vm_hwm_line.split_whitespace().nth(1)?.parse::<u64>().ok()?;
    Some(kb * 1_024)
}

#[cfg(not(target_os = "linux"))]
fn peak_memory_bytes_best_effort() -> Option<u64> {
    None
}

fn parse_args() -> io::Result<BenchmarkConfig> {
    let mut config = BenchmarkConfig::default();
    let outcome = parse_args_from(std::env::args().skip(1), &mut config)?;
    if outcome == ParseOutcome::HelpRequested {
        print_help();
        std::process::exit(0);
    }
    Ok(config)
}

fn parse_args_from(
    args: impl IntoIterator<Item = String>,
    config: &mut BenchmarkConfig,
) -> io::Result<ParseOutcome> {
    let mut args = args.into_iter();

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "-h" | "--help" => return Ok(ParseOutcome::HelpRequested),
            "--rows" => config.rows = parse_value(&mut args, "--rows")?,
            "--chunk-size" => config.chunk_size = parse_value(&mut args, "--chunk-size")?,
            "--viewport-px" => config.viewport_px = parse_value(&mut args, "--viewport-px")?,
            "--steps" => config.steps = parse_value(&mut args, "--steps")?,
            "--assert-max-fetches" => {
                config.assert_max_fetches = Some(parse_value(&mut args, "--assert-max-fetches")?);
            }
            "--assert-max-window-us" => {
                config.assert_max_window_us =
                    Some(parse_value(&mut args, "--assert-max-window-us")?);
            }
            _ => {
                return Err(io_other(format!("unknown argument `{flag}`")));
            }
        }
    }

    Ok(ParseOutcome::Config)
}

fn parse_value<T>(args: &mut impl Iterator<Item = String>, flag: &str) -> io::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    next_value(args, flag)?
        .parse::<T>()
        .map_err(|error| io_other(format!("invalid {flag} value: {error}")))
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> io::Result<String> {
    args.next()
        .ok_or_else(|| io_other(format!("missing value for `{flag}`")))
}

fn print_help() {
    println!(
        "sqlgrid scroll benchmark\n\n\
Usage:\n  cargo run -p sqlgrid-app --bin benchmark -- [OPTIONS]\n\n\
Options:\n  --rows <count>                  Rows in the synthetic result (default: 1000000)\n  --chunk-size <rows>             Rows per remote page (default: 500)\n  --viewport-px <px>              Viewport height (default: 800)\n  --steps <count>                 Scroll positions in the sweep (default: 2000)\n  --assert-max-fetches <count>    Fail if the sweep issues more fetches\n  --assert-max-window-us <us>     Fail if mean window time exceeds threshold\n"
    );
}

fn io_other(error: impl std::fmt::Display) -> io::Error {
    io::Error::other(error.to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        enforce_assertions, io_other, next_value, parse_args_from, run_keyboard_jump,
        run_scroll_sweep, BenchmarkConfig, ParseOutcome, SweepMetrics,
    };

    fn metrics(fetches: usize, total_window: Duration) -> SweepMetrics {
        SweepMetrics {
            fetches,
            rows_loaded: 0,
            windows: 10,
            max_window: total_window,
            total_window,
            elapsed: total_window,
        }
    }

    #[test]
    fn parse_args_from_applies_overrides() {
        let mut config = BenchmarkConfig::default();
        let outcome = parse_args_from(
            vec![
                "--rows".to_string(),
                "5000".to_string(),
                "--chunk-size".to_string(),
                "250".to_string(),
                "--viewport-px".to_string(),
                "560".to_string(),
                "--steps".to_string(),
                "40".to_string(),
                "--assert-max-fetches".to_string(),
                "20".to_string(),
                "--assert-max-window-us".to_string(),
                "150.5".to_string(),
            ],
            &mut config,
        )
        .expect("parse should succeed");

        assert_eq!(outcome, ParseOutcome::Config);
        assert_eq!(config.rows, 5_000);
        assert_eq!(config.chunk_size, 250);
        assert_eq!(config.viewport_px, 560.0);
        assert_eq!(config.steps, 40);
        assert_eq!(config.assert_max_fetches, Some(20));
        assert_eq!(config.assert_max_window_us, Some(150.5));
    }

    #[test]
    fn parse_args_from_detects_help() {
        let mut config = BenchmarkConfig::default();
        let outcome = parse_args_from(vec!["--help".to_string()], &mut config).expect("help parse");
        assert_eq!(outcome, ParseOutcome::HelpRequested);
    }

    #[test]
    fn parse_args_from_fails_for_unknown_flag_and_bad_values() {
        let mut config = BenchmarkConfig::default();
        let err = parse_args_from(vec!["--bogus".to_string()], &mut config)
            .expect_err("unknown flags should fail");
        assert!(err.to_string().contains("unknown argument"));

        let err = parse_args_from(vec!["--rows".to_string(), "many".to_string()], &mut config)
            .expect_err("non-numeric rows should fail");
        assert!(err.to_string().contains("invalid --rows value"));
    }

    #[test]
    fn next_value_reports_missing_flag_values() {
        let mut args = std::iter::empty::<String>();
        let err = next_value(&mut args, "--rows").expect_err("missing value should fail");
        assert!(err.to_string().contains("missing value for `--rows`"));
    }

    #[test]
    fn enforce_assertions_validates_thresholds() {
        let config = BenchmarkConfig {
            assert_max_fetches: Some(5),
            assert_max_window_us: Some(100.0),
            ..BenchmarkConfig::default()
        };

        let fetch_err = enforce_assertions(&config, &metrics(6, Duration::ZERO))
            .expect_err("fetch threshold");
        assert!(fetch_err.to_string().contains("fetches"));

        let window_err = enforce_assertions(&config, &metrics(1, Duration::from_millis(2)))
            .expect_err("window threshold");
        assert!(window_err.to_string().contains("mean window time"));

        assert!(enforce_assertions(&config, &metrics(5, Duration::from_micros(500))).is_ok());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sweep_fetches_each_chunk_at_most_once() {
        let config = BenchmarkConfig {
            rows: 10_000,
            chunk_size: 500,
            steps: 200,
            ..BenchmarkConfig::default()
        };

        let metrics = run_scroll_sweep(&config).await;

        assert_eq!(metrics.fetches, 20);
        assert_eq!(metrics.rows_loaded, 10_000);
        assert_eq!(metrics.windows, 201);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn keyboard_jump_loads_two_chunks() {
        let config = BenchmarkConfig {
            rows: 100_000,
            ..BenchmarkConfig::default()
        };

        assert_eq!(run_keyboard_jump(&config).await, 2);
    }

    #[test]
    fn io_other_uses_display_text() {
        let err = io_other("boom");
        assert_eq!(err.to_string(), "boom");
    }
}
