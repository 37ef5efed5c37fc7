//! Runtime Configuration

/// Environment variable overriding the worker count
pub const WORKERS_ENV: &str = "STRAND_WORKERS";

/// Environment variable overriding the worker stack size (bytes)
pub const STACK_SIZE_ENV: &str = "STRAND_STACK_SIZE";

/// Get the number of available CPU cores
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

/// Runtime configuration options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of workers used by pools and fork-join primitives
    pub workers: usize,

    /// Prefix for spawned thread names
    pub thread_name: String,

    /// Stack size for spawned threads (None = platform default)
    pub stack_size: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: available_parallelism(),
            thread_name: "strand-worker".to_string(),
            stack_size: None,
        }
    }
}

impl RuntimeConfig {
    /// Configuration with an explicit worker count
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            ..Self::default()
        }
    }

    /// Defaults overridden by `STRAND_WORKERS` / `STRAND_STACK_SIZE`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the known keys.
    ///
    /// Unparseable or zero values are ignored with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(WORKERS_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.workers = n,
                _ => tracing::warn!("Ignoring invalid {}={:?}", WORKERS_ENV, raw),
            }
        }

        if let Some(raw) = lookup(STACK_SIZE_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.stack_size = Some(n),
                _ => tracing::warn!("Ignoring invalid {}={:?}", STACK_SIZE_ENV, raw),
            }
        }

        config
    }

    /// Builder-style thread name prefix
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Builder-style stack size
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub(crate) fn thread_builder(&self, index: usize) -> std::thread::Builder {
        let builder = std::thread::Builder::new().name(format!("{}-{}", self.thread_name, index));
        match self.stack_size {
            Some(bytes) => builder.stack_size(bytes),
            None => builder,
        }
    }
}
