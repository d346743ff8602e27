//! Byte/breakage accounting and the single-line status display
//!
//! Stages record into a shared [`ProgressTracker`]; [`ProgressTracker::run`]
//! redraws one overwritten line per second until the pass completes:
//!
//! ```text
//! ↳ 146.92KB/396.86KB 13.36KB/s 37.0% ↦ 19s
//! ✔ 396.86KB/396.86KB 30.53KB/s 100% ↯ 32s
//! ```

use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Prefix of the status line during the primary pass
pub const PRIMARY_GLYPH: &str = "↳";
/// Prefix of the status line during the repair-data pass
pub const REPAIR_GLYPH: &str = "⚕";
const DONE_GLYPH: &str = "✔";
const BROKEN_GLYPH: &str = "✘";
const SEPARATOR_GLYPH: &str = "↦";
const DONE_SEPARATOR_GLYPH: &str = "↯";
const INFINITY: &str = "∞";
const DEFAULT_COLUMNS: usize = 80;
const REDRAW_INTERVAL: Duration = Duration::from_secs(1);

/// Byte quantity rendered with a 1024-based unit scale
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct ByteSize(pub f64);

impl std::fmt::Display for ByteSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const UNITS: [&str; 8] = ["KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];
        let mut scaled = self.0;
        let mut unit = "B";
        for next in UNITS {
            if scaled < 1024.0 {
                break;
            }
            scaled /= 1024.0;
            unit = next;
        }
        write!(f, "{:.2}{}", scaled, unit)
    }
}

impl From<u64> for ByteSize {
    fn from(bytes: u64) -> Self {
        ByteSize(bytes as f64)
    }
}

/// Format a duration as `1h 2m 3s`, `2m 3s` or `3s`
pub fn seconds_to_human(interval: u64) -> String {
    let seconds = interval % 60;
    let minutes = interval / 60;
    if minutes >= 60 {
        format!("{}h {}m {}s", minutes / 60, minutes % 60, seconds)
    } else if minutes >= 1 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Counters shared by the pipeline stages
#[derive(Debug, Clone)]
struct ProgressState {
    current_bytes: u64,
    total_bytes: u64,
    broken_bytes: u64,
    broken_count: u64,
    total_count: u64,
    started: Instant,
    prefix: &'static str,
}

impl ProgressState {
    fn new(prefix: &'static str) -> Self {
        Self {
            current_bytes: 0,
            total_bytes: 0,
            broken_bytes: 0,
            broken_count: 0,
            total_count: 0,
            started: Instant::now(),
            prefix,
        }
    }
}

/// Point-in-time copy of the counters with derived rates
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Bytes of fragments fetched so far
    pub current_bytes: u64,
    /// Bytes expected for the pass
    pub total_bytes: u64,
    /// Bytes of fragments recorded as broken
    pub broken_bytes: u64,
    /// Fragments recorded as broken
    pub broken_count: u64,
    /// Fragments in the pass
    pub total_count: u64,
    /// Whole seconds since the pass started, never below 1
    pub elapsed_secs: u64,
    /// Status line prefix
    pub prefix: &'static str,
}

impl ProgressSnapshot {
    /// Bytes per second since the pass started
    pub fn speed(&self) -> f64 {
        self.current_bytes as f64 / self.elapsed_secs as f64
    }

    /// Seconds until `total_bytes` at the current speed; `None` while nothing has arrived
    pub fn eta_secs(&self) -> Option<u64> {
        let speed = self.speed();
        if speed > 0.0 {
            let remaining = self.total_bytes.saturating_sub(self.current_bytes) as f64;
            Some((remaining / speed).ceil() as u64)
        } else {
            None
        }
    }

    /// Completion percentage with one decimal
    pub fn percent(&self) -> String {
        if self.total_bytes == 0 {
            return "0.0%".to_string();
        }
        format!(
            "{:.1}%",
            self.current_bytes as f64 / self.total_bytes as f64 * 100.0
        )
    }

    /// The live status line, padded or truncated to `width` columns
    pub fn status_line(&self, width: usize) -> String {
        let eta = self
            .eta_secs()
            .map(seconds_to_human)
            .unwrap_or_else(|| INFINITY.to_string());
        let line = format!(
            "{} {}/{} {}/s {} {} {}",
            self.prefix,
            ByteSize::from(self.current_bytes),
            ByteSize::from(self.total_bytes),
            ByteSize(self.speed()),
            self.percent(),
            SEPARATOR_GLYPH,
            eta
        );
        fit_to_width(&line, width)
    }

    /// Final line(s) once the pass has drained
    pub fn summary_lines(&self, width: usize) -> Vec<String> {
        let elapsed = seconds_to_human(self.elapsed_secs);
        let speed = ByteSize(self.speed());
        let mut lines = Vec::with_capacity(2);
        if self.broken_count == 0 {
            let total = ByteSize::from(self.total_bytes);
            lines.push(fit_to_width(
                &format!(
                    "{} {}/{} {}/s 100% {} {}",
                    DONE_GLYPH, total, total, speed, DONE_SEPARATOR_GLYPH, elapsed
                ),
                width,
            ));
        } else {
            lines.push(fit_to_width(
                &format!(
                    "{} {}/{} {}/s {} {} {}",
                    BROKEN_GLYPH,
                    ByteSize::from(self.current_bytes),
                    ByteSize::from(self.total_bytes),
                    speed,
                    self.percent(),
                    DONE_SEPARATOR_GLYPH,
                    elapsed
                ),
                width,
            ));
            lines.push(format!(
                "{}/{} segment(s) broken!",
                self.broken_count, self.total_count
            ));
        }
        lines
    }
}

fn fit_to_width(line: &str, width: usize) -> String {
    let len = line.chars().count();
    if len >= width {
        line.chars().take(width).collect()
    } else {
        format!("{}{}", line, " ".repeat(width - len))
    }
}

fn terminal_columns() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|c| c.trim().parse().ok())
        .filter(|&c: &usize| c > 0)
        .unwrap_or(DEFAULT_COLUMNS)
}

/// Shared progress counters, safe to update from any stage
#[derive(Debug)]
pub struct ProgressTracker {
    state: Mutex<ProgressState>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    /// Create a tracker for a primary pass
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProgressState::new(PRIMARY_GLYPH)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count fetched bytes
    pub fn record_bytes(&self, bytes: u64) {
        self.lock().current_bytes += bytes;
    }

    /// Count one broken fragment of `bytes` declared size
    pub fn record_broken(&self, bytes: u64) {
        let mut state = self.lock();
        state.broken_bytes += bytes;
        state.broken_count += 1;
    }

    /// Set the pass totals
    pub fn set_total(&self, bytes: u64, count: u64) {
        let mut state = self.lock();
        state.total_bytes = bytes;
        state.total_count = count;
    }

    /// Change the status line prefix
    pub fn set_prefix(&self, prefix: &'static str) {
        self.lock().prefix = prefix;
    }

    /// Zero every counter and restart the clock, keeping the prefix
    pub fn reset(&self) {
        let mut state = self.lock();
        *state = ProgressState::new(state.prefix);
    }

    /// Whether any breakage was recorded
    pub fn is_broken(&self) -> bool {
        self.lock().broken_count > 0
    }

    /// Copy the counters out
    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.lock();
        ProgressSnapshot {
            current_bytes: state.current_bytes,
            total_bytes: state.total_bytes,
            broken_bytes: state.broken_bytes,
            broken_count: state.broken_count,
            total_count: state.total_count,
            elapsed_secs: state.started.elapsed().as_secs().max(1),
            prefix: state.prefix,
        }
    }

    /// Redraw the status line every second until `done` fires, then print the summary
    pub async fn run(&self, done: CancellationToken) {
        let mut interval = tokio::time::interval(REDRAW_INTERVAL);
        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                _ = interval.tick() => {
                    let line = self.snapshot().status_line(terminal_columns());
                    let mut out = std::io::stdout().lock();
                    let _ = write!(out, "\r{}", line);
                    let _ = out.flush();
                }
            }
        }

        let width = terminal_columns();
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "\r");
        for line in self.snapshot().summary_lines(width) {
            let _ = writeln!(out, "{}", line);
        }
        let _ = out.flush();
    }
}
