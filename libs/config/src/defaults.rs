//! Runtime defaults
//!
//! Default values used when neither a config file nor the environment
//! overrides a setting.

/// Method call defaults
pub mod calls {
    /// Timeout applied when a call passes none (milliseconds)
    pub const METHOD_CALL_TIMEOUT_MS: u64 = 25_000;

    /// How long an asynchronous handler may take to reply (milliseconds)
    pub const ASYNC_REPLY_GRACE_MS: u64 = 25_000;
}

/// Dispatch loop defaults
pub mod dispatch {
    /// How long one receive waits before the loop re-checks its state (milliseconds)
    pub const POLL_INTERVAL_MS: u64 = 10;

    /// Threads running blocking calls for asynchronous callers
    pub const WORKER_THREADS: usize = 4;

    /// Jobs that may wait for a worker before submission fails
    pub const WORKER_QUEUE_CAPACITY: usize = 1024;
}

/// Logging defaults
pub mod logging {
    pub const LEVEL: &str = "info";
}

/// Environment variable prefix for overrides (`BUSRPC_LOGGING__LEVEL=debug`)
pub const ENV_PREFIX: &str = "BUSRPC";

/// Separator between nested keys in environment variable names
pub const ENV_SEPARATOR: &str = "__";

/// Config file consulted by [`crate::load_config`] when present
pub const DEFAULT_CONFIG_PATH: &str = "config/bus-rpc.toml";

/// Machine id file read by the Peer interface
pub const MACHINE_ID_PATH: &str = "/etc/machine-id";
