//! Server configuration.

/// Settings a [`Server`](crate::Server) is built with.
///
/// ```
/// use chanrpc::ServerConfig;
///
/// let config = ServerConfig::new(256).with_trace_len(4096);
/// assert_eq!(config.queue_capacity, 256);
/// assert!(config.captures_traces());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Capacity of the inbound call queue. 0 makes every push a rendezvous
    /// with the owner loop.
    pub queue_capacity: usize,
    /// Maximum number of backtrace bytes attached to a caught operation
    /// panic. 0 keeps only the panic message.
    pub trace_len: usize,
}

impl ServerConfig {
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue_capacity,
            trace_len: 0,
        }
    }

    pub fn with_trace_len(mut self, trace_len: usize) -> Self {
        self.trace_len = trace_len;
        self
    }

    pub fn captures_traces(&self) -> bool {
        self.trace_len > 0
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_QUEUE_CAPACITY)
    }
}
