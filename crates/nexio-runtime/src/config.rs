//! I/O system configuration

use std::time::Duration;

use nexio_core::constants::{
    DEFAULT_IDLE_CHECK_FREQUENCY, DEFAULT_MAILBOX_BATCH, DEFAULT_OUTPUT_BUFFER_SIZE,
    DEFAULT_READ_BUFFER_SIZE, DEFAULT_SELECT_TIMEOUT, MAX_WORKERS,
};

/// Configuration for the I/O system and its workers
#[derive(Debug, Clone)]
pub struct IoConfig {
    /// Number of worker threads (defaults to CPU count)
    pub num_workers: usize,

    /// Selector poll ceiling per loop iteration (default: 1ms)
    pub select_timeout: Duration,

    /// Period between idle sweeps (default: 100ms)
    pub idle_check_frequency: Duration,

    /// Default per-connection idle ceiling; `None` means never time out
    pub max_idle_time: Option<Duration>,

    /// Per-worker shared read buffer size (default: 128 KiB)
    pub read_buffer_size: usize,

    /// Per-worker dynamic output buffer ceiling (default: 4 MiB)
    pub output_buffer_size: usize,

    /// Commands drained from the mailbox per loop iteration (default: 256)
    pub mailbox_batch: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        let num_cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            num_workers: num_cpus.min(MAX_WORKERS),
            select_timeout: DEFAULT_SELECT_TIMEOUT,
            idle_check_frequency: DEFAULT_IDLE_CHECK_FREQUENCY,
            max_idle_time: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
            mailbox_batch: DEFAULT_MAILBOX_BATCH,
        }
    }
}

impl IoConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads
    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n.min(MAX_WORKERS);
        self
    }

    /// Set the selector poll ceiling
    pub fn select_timeout(mut self, d: Duration) -> Self {
        self.select_timeout = d;
        self
    }

    /// Set the period between idle sweeps
    pub fn idle_check_frequency(mut self, d: Duration) -> Self {
        self.idle_check_frequency = d;
        self
    }

    /// Set the default idle ceiling; `None` disables idle closure
    pub fn max_idle_time(mut self, d: Option<Duration>) -> Self {
        self.max_idle_time = d;
        self
    }

    /// Set the per-worker read buffer size
    pub fn read_buffer_size(mut self, n: usize) -> Self {
        self.read_buffer_size = n;
        self
    }

    /// Set the per-worker output buffer ceiling
    pub fn output_buffer_size(mut self, n: usize) -> Self {
        self.output_buffer_size = n;
        self
    }

    /// Set the mailbox drain batch cap
    pub fn mailbox_batch(mut self, n: usize) -> Self {
        self.mailbox_batch = n;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.num_workers == 0 {
            return Err("num_workers must be at least 1");
        }
        if self.num_workers > MAX_WORKERS {
            return Err("num_workers exceeds maximum");
        }
        if self.select_timeout.is_zero() {
            return Err("select_timeout must be non-zero");
        }
        if self.idle_check_frequency.is_zero() {
            return Err("idle_check_frequency must be non-zero");
        }
        if self.read_buffer_size == 0 {
            return Err("read_buffer_size must be non-zero");
        }
        if self.output_buffer_size == 0 {
            return Err("output_buffer_size must be non-zero");
        }
        if self.mailbox_batch == 0 {
            return Err("mailbox_batch must be at least 1");
        }
        Ok(())
    }
}
