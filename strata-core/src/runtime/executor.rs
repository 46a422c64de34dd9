//! Tokio runtime for network I/O
//!
//! Dataset construction is synchronous; downloads run on a dedicated
//! multi-thread runtime and callers block on the result.

use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::{Result, StrataError};

/// Configuration for the I/O runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads
    pub io_threads: usize,
    /// Thread name prefix
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            io_threads: num_cpus::get().clamp(2, 8),
            thread_name: "strata-io".to_string(),
        }
    }
}

/// Runtime driving HTTP transfers
pub struct IoRuntime {
    runtime: Runtime,
    config: RuntimeConfig,
}

impl IoRuntime {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.io_threads.max(1))
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()
            .map_err(|e| StrataError::Internal {
                message: format!("Failed to create I/O runtime: {}", e),
            })?;

        Ok(Self { runtime, config })
    }

    /// Run a future to completion on this runtime
    ///
    /// Must not be called from inside another tokio runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Stop the runtime, giving in-flight transfers a grace period
    pub fn shutdown(self, grace: Duration) {
        self.runtime.shutdown_timeout(grace);
    }
}

impl std::fmt::Debug for IoRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoRuntime").field("config", &self.config).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_creation() {
        let runtime = IoRuntime::new(RuntimeConfig::default()).unwrap();
        let result = runtime.block_on(async { 42 });
        assert_eq!(result, 42);
    }

    #[test]
    fn test_spawn_on_handle() {
        let runtime = IoRuntime::new(RuntimeConfig {
            io_threads: 1,
            ..Default::default()
        })
        .unwrap();
        let handle = runtime.handle().spawn(async { 7 });
        assert_eq!(runtime.block_on(handle).unwrap(), 7);
        runtime.shutdown(Duration::from_secs(1));
    }
}
