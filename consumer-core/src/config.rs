use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::error::{ConsumerError, Result};

/// Which rings the discovery walker and hot-plug watcher admit into the registry.
///
/// Mirrors the `-f`/`-n` CLI flags one-to-one: the default `All` takes both
/// flight-recorder and normal channels, the other two variants narrow the
/// file filter in [`crate::discovery`] to one prefix class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Admit both flight-recorder (`flight-*`) and normal channels.
    All,
    /// Admit only `flight-*` channels.
    FlightOnly,
    /// Admit only channels without the `flight-` prefix.
    NormalOnly,
}

impl ChannelMode {
    /// Whether a channel base name passes this mode's filter.
    pub fn admits(self, file_name: &str) -> bool {
        let is_flight = file_name.starts_with("flight-");
        match self {
            ChannelMode::All => true,
            ChannelMode::FlightOnly => is_flight,
            ChannelMode::NormalOnly => !is_flight,
        }
    }
}

/// Validated configuration for a [`crate::TraceInstance`].
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub trace_root: PathBuf,
    pub worker_count: NonZeroUsize,
    pub mode: ChannelMode,
    pub verbose: bool,
}

impl ConsumerConfig {
    /// Starts building a configuration for the given trace root.
    pub fn builder(trace_root: impl Into<PathBuf>) -> ConsumerConfigBuilder {
        ConsumerConfigBuilder::new(trace_root)
    }
}

/// Builder mirroring the CLI flags of the thin driver crate.
///
/// # Example
///
/// ```
/// use consumer_core::{ConsumerConfig, ChannelMode};
///
/// let config = ConsumerConfig::builder("/sys/kernel/debug/tracing/channels")
///     .worker_count(4)
///     .mode(ChannelMode::FlightOnly)
///     .build()
///     .unwrap();
/// assert_eq!(config.worker_count.get(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct ConsumerConfigBuilder {
    trace_root: PathBuf,
    worker_count: usize,
    mode: ChannelMode,
    verbose: bool,
}

impl ConsumerConfigBuilder {
    pub fn new(trace_root: impl Into<PathBuf>) -> Self {
        Self {
            trace_root: trace_root.into(),
            worker_count: 1,
            mode: ChannelMode::All,
            verbose: false,
        }
    }

    pub fn worker_count(mut self, n: usize) -> Self {
        self.worker_count = n;
        self
    }

    pub fn mode(mut self, mode: ChannelMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::InvalidConfig`] if the worker count is zero
    /// or the trace root is not an existing directory.
    pub fn build(self) -> Result<ConsumerConfig> {
        let worker_count = NonZeroUsize::new(self.worker_count).ok_or_else(|| {
            ConsumerError::InvalidConfig {
                reason: "worker_count must be at least 1".to_string(),
            }
        })?;

        validate_root(&self.trace_root)?;

        Ok(ConsumerConfig {
            trace_root: self.trace_root,
            worker_count,
            mode: self.mode,
            verbose: self.verbose,
        })
    }
}

fn validate_root(root: &Path) -> Result<()> {
    let metadata = std::fs::metadata(root).map_err(|source| ConsumerError::NoEntry {
        path: root.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(ConsumerError::InvalidConfig {
            reason: format!("trace root {} is not a directory", root.display()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_workers() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConsumerConfig::builder(dir.path())
            .worker_count(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConsumerError::InvalidConfig { .. }));
    }

    #[test]
    fn rejects_missing_root() {
        let err = ConsumerConfig::builder("/no/such/path/for/this/test")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConsumerError::NoEntry { .. }));
    }

    #[test]
    fn mode_admits_filters_by_prefix() {
        assert!(ChannelMode::All.admits("flight-cpu0"));
        assert!(ChannelMode::All.admits("cpu0"));
        assert!(ChannelMode::FlightOnly.admits("flight-cpu0"));
        assert!(!ChannelMode::FlightOnly.admits("cpu0"));
        assert!(ChannelMode::NormalOnly.admits("cpu0"));
        assert!(!ChannelMode::NormalOnly.admits("flight-cpu0"));
    }
}
