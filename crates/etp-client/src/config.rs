//! Client configuration.

use std::time::Duration;

use etp_core::{DialOptions, pool::DEFAULT_BUFFER_CAPACITY};

/// Default number of dispatch workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Default dispatch queue slots per worker.
pub const DEFAULT_QUEUE_MULTIPLIER: usize = 10;

/// Default upper bound on the opening handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Number of dispatch workers (0 selects the default)
    pub workers: usize,
    /// Queue slots per worker; capacity is `workers * queue_multiplier`
    /// (0 selects the default)
    pub queue_multiplier: usize,
    /// Largest inbound message accepted, in bytes (0 keeps the transport's
    /// own limit)
    pub read_limit: usize,
    /// Initial capacity of pooled encode buffers
    pub buffer_capacity: usize,
    /// Handshake options passed to the transport
    pub dial: DialOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_multiplier: DEFAULT_QUEUE_MULTIPLIER,
            read_limit: 0,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            dial: DialOptions {
                headers: Vec::new(),
                connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
                read_limit: 0,
            },
        }
    }
}

impl ClientConfig {
    /// Replace zero worker and queue settings with their defaults and hand
    /// the read limit to the transport's handshake options.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.dial.read_limit = self.read_limit;
        if self.workers == 0 {
            self.workers = DEFAULT_WORKERS;
        }
        if self.queue_multiplier == 0 {
            self.queue_multiplier = DEFAULT_QUEUE_MULTIPLIER;
        }
        if self.buffer_capacity == 0 {
            self.buffer_capacity = DEFAULT_BUFFER_CAPACITY;
        }
        self
    }

    /// Dispatch queue capacity.
    pub fn queue_capacity(&self) -> usize {
        self.workers.saturating_mul(self.queue_multiplier)
    }

    /// Set the worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the queue multiplier.
    #[must_use]
    pub fn with_queue_multiplier(mut self, multiplier: usize) -> Self {
        self.queue_multiplier = multiplier;
        self
    }

    /// Set the inbound message size limit.
    #[must_use]
    pub fn with_read_limit(mut self, limit: usize) -> Self {
        self.read_limit = limit;
        self
    }

    /// Add a handshake header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.dial.headers.push((name.into(), value.into()));
        self
    }

    /// Set the handshake timeout (`None` waits indefinitely).
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dial.connect_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_run_several_workers() {
        let config = ClientConfig::default();
        assert!(config.workers > 1);
        assert!(config.queue_multiplier > 1);
        assert_eq!(config.queue_capacity(), 40);
    }

    #[test]
    fn normalized_replaces_zeroes() {
        let config = ClientConfig::default().with_workers(0).with_queue_multiplier(0).normalized();
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.queue_multiplier, DEFAULT_QUEUE_MULTIPLIER);
    }

    #[test]
    fn normalized_passes_read_limit_to_transport() {
        let config = ClientConfig::default().with_read_limit(512).normalized();
        assert_eq!(config.dial.read_limit, 512);
    }

    #[test]
    fn builder_collects_headers() {
        let config = ClientConfig::default()
            .with_header("Authorization", "Bearer t")
            .with_header("X-Instance", "7")
            .with_read_limit(1024)
            .with_connect_timeout(None);

        assert_eq!(config.dial.headers.len(), 2);
        assert_eq!(config.dial.headers[0], ("Authorization".to_owned(), "Bearer t".to_owned()));
        assert_eq!(config.read_limit, 1024);
        assert_eq!(config.dial.connect_timeout, None);
    }
}
