//! Terminal output: a progress bar fed by engine events, coloured logging,
//! and the final run summary.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use log::{Level, LevelFilter, Log, Metadata, Record};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use cellsmith::RunResult;
use cellsmith::events::ProgressEvent;
use cellsmith::job::ItemStatus;

/// Follows a job's [`ProgressEvent`]s and draws a bar until the job finishes.
pub struct RunProgress {
    pb: ProgressBar,
    handle: JoinHandle<()>,
}

impl RunProgress {
    pub fn follow(mut rx: broadcast::Receiver<ProgressEvent>, label: &str) -> Self {
        let pb = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {msg} [{bar:30.cyan/blue}] {pos}/{len} ({elapsed})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        pb.set_style(style);
        pb.set_message(label.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        let bar = pb.clone();
        let yellow = Style::new().yellow();
        let red = Style::new().red();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ProgressEvent::JobStarted { total, workers, .. }) => {
                        bar.set_length(total as u64);
                        log::debug!("{total} cells across {workers} workers");
                    }
                    Ok(ProgressEvent::ItemRetrying {
                        address,
                        attempt,
                        delay,
                        reason,
                    }) => {
                        bar.println(format!(
                            "  {} {address} attempt {attempt} failed, retrying in {:.1}s: {reason}",
                            yellow.apply_to("↻"),
                            delay.as_secs_f64()
                        ));
                    }
                    Ok(ProgressEvent::ItemFinished {
                        address,
                        status,
                        completed,
                        ..
                    }) => {
                        if status != ItemStatus::Succeeded {
                            bar.println(format!("  {} {address} {status}", red.apply_to("✗")));
                        }
                        bar.set_position(completed as u64);
                    }
                    Ok(ProgressEvent::JobFinished { .. }) | Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(skipped)) => {
                        log::debug!("progress display skipped {skipped} events");
                    }
                }
            }
        });

        Self { pb, handle }
    }

    /// Waits for the job-finished event, then clears the bar.
    pub async fn finish(self) {
        let _ = self.handle.await;
        self.pb.finish_and_clear();
    }

    /// Stops following a job that never started.
    pub fn abandon(self) {
        self.handle.abort();
        self.pb.finish_and_clear();
    }
}

/// Prints the coloured summary line followed by the result as JSON.
pub fn print_result(result: &RunResult) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    let yellow = Style::new().yellow().bold();

    if result.is_complete_success() {
        println!(
            "  {} {} cells transformed in {:.1}s",
            green.apply_to("✓"),
            result.succeeded,
            result.elapsed.as_secs_f64()
        );
    } else {
        let style = if result.cancelled > 0 { &yellow } else { &red };
        println!(
            "  {} {} succeeded, {} failed, {} cancelled",
            style.apply_to("!"),
            result.succeeded,
            result.failed,
            result.cancelled
        );
    }
    println!();
    println!("{}", Style::new().dim().apply_to("─── Run Result ───"));
    println!(
        "{}",
        serde_json::to_string_pretty(result).unwrap_or_default()
    );
}

/// `log` backend writing coloured lines to stderr.
pub struct TerminalLogger {
    level: LevelFilter,
}

static INFO_LOGGER: TerminalLogger = TerminalLogger {
    level: LevelFilter::Info,
};
static DEBUG_LOGGER: TerminalLogger = TerminalLogger {
    level: LevelFilter::Debug,
};

impl TerminalLogger {
    pub fn init(verbose: bool) -> Result<(), log::SetLoggerError> {
        let logger = if verbose { &DEBUG_LOGGER } else { &INFO_LOGGER };
        log::set_logger(logger)?;
        log::set_max_level(logger.level);
        Ok(())
    }
}

impl Log for TerminalLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level && metadata.target().starts_with("cellsmith")
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error => Style::new().red().bold().apply_to("error"),
            Level::Warn => Style::new().yellow().bold().apply_to("warn"),
            Level::Info => Style::new().cyan().apply_to("info"),
            Level::Debug | Level::Trace => Style::new().dim().apply_to("debug"),
        };
        eprintln!("{tag}: {}", record.args());
    }

    fn flush(&self) {}
}
