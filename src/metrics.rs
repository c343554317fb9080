use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Once;
use std::time::{Duration, Instant};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Completed input lines by how the interpreter finished them
    pub static ref MONITOR_LINES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("monitor_lines_total", "Input lines interpreted by the monitor"),
        &["outcome"]
    ).expect("Failed to create monitor lines counter");

    /// Lines thrown away before or during interpretation
    pub static ref MONITOR_LINE_RESTARTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("monitor_line_restarts_total", "Input lines abandoned and re-prompted"),
        &["reason"]
    ).expect("Failed to create line restarts counter");

    pub static ref MONITOR_BYTES_STORED_TOTAL: Counter = Counter::new(
        "monitor_bytes_stored_total", "Bytes deposited into memory by store commands"
    ).expect("Failed to create bytes stored counter");

    pub static ref MONITOR_EXAMINES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("monitor_examines_total", "Examine commands by mode"),
        &["mode"]
    ).expect("Failed to create examines counter");

    pub static ref MONITOR_RUNS_TOTAL: Counter = Counter::new(
        "monitor_runs_total", "Control transfers to resident code"
    ).expect("Failed to create runs counter");

    /// Instructions executed by resident code, by mnemonic
    pub static ref RESIDENT_INSTRUCTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("resident_instructions_total", "Instructions executed by resident code"),
        &["instruction"]
    ).expect("Failed to create resident instructions counter");

    pub static ref RESIDENT_CYCLES_TOTAL: Counter = Counter::new(
        "resident_cycles_total", "CPU cycles spent in resident code"
    ).expect("Failed to create resident cycles counter");

    /// How resident code gave control back
    pub static ref RESIDENT_EXITS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("resident_exits_total", "Returns from resident code to the monitor"),
        &["reason"]
    ).expect("Failed to create resident exits counter");

    /// Gauge for open monitor sessions
    pub static ref ACTIVE_SESSIONS: Gauge = Gauge::new(
        "active_sessions_total", "Number of open monitor sessions"
    ).expect("Failed to create active sessions gauge");

    /// Counter for API requests by endpoint and method
    pub static ref API_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("api_requests_total", "Total number of API requests"),
        &["method", "endpoint", "status"]
    ).expect("Failed to create API requests counter");

    /// Histogram for API request duration
    pub static ref API_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("api_request_duration_seconds", "API request duration")
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["method", "endpoint"]
    ).expect("Failed to create API request duration histogram");
}

static INIT: Once = Once::new();

/// Register every metric with the global registry. Safe to call more than once.
pub fn init_metrics() {
    INIT.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(MONITOR_LINES_TOTAL.clone()),
            Box::new(MONITOR_LINE_RESTARTS_TOTAL.clone()),
            Box::new(MONITOR_BYTES_STORED_TOTAL.clone()),
            Box::new(MONITOR_EXAMINES_TOTAL.clone()),
            Box::new(MONITOR_RUNS_TOTAL.clone()),
            Box::new(RESIDENT_INSTRUCTIONS_TOTAL.clone()),
            Box::new(RESIDENT_CYCLES_TOTAL.clone()),
            Box::new(RESIDENT_EXITS_TOTAL.clone()),
            Box::new(ACTIVE_SESSIONS.clone()),
            Box::new(API_REQUESTS_TOTAL.clone()),
            Box::new(API_REQUEST_DURATION.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                log::warn!("metric registration failed: {}", e);
            }
        }
    });
}

pub fn record_line(outcome: &str) {
    MONITOR_LINES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_line_restart(reason: &str) {
    MONITOR_LINE_RESTARTS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_store() {
    MONITOR_BYTES_STORED_TOTAL.inc();
}

pub fn record_examine(mode: &str) {
    MONITOR_EXAMINES_TOTAL.with_label_values(&[mode]).inc();
}

pub fn record_run() {
    MONITOR_RUNS_TOTAL.inc();
}

/// Record one resident instruction and the cycles it took
pub fn record_instruction(instruction_name: &str, cycles: u8) {
    RESIDENT_INSTRUCTIONS_TOTAL
        .with_label_values(&[instruction_name])
        .inc();
    RESIDENT_CYCLES_TOTAL.inc_by(cycles as f64);
}

pub fn record_resident_exit(reason: &str) {
    RESIDENT_EXITS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn set_active_sessions(count: usize) {
    ACTIVE_SESSIONS.set(count as f64);
}

/// Record an API request
pub fn record_api_request(method: &str, endpoint: &str, status: u16, duration: Duration) {
    API_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status.to_string()])
        .inc();

    API_REQUEST_DURATION
        .with_label_values(&[method, endpoint])
        .observe(duration.as_secs_f64());
}

/// Helper struct for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_metrics();
        init_metrics();
        record_store();
        let families = REGISTRY.gather();
        assert!(families.iter().any(|f| f.get_name() == "monitor_bytes_stored_total"));
    }

    #[test]
    fn test_counters_move() {
        let before = MONITOR_RUNS_TOTAL.get();
        record_run();
        assert!(MONITOR_RUNS_TOTAL.get() >= before + 1.0);
    }
}
