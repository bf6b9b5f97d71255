//! # Bus Runtime Configuration
//!
//! Configuration loading and logging bootstrap shared by the RPC runtime and
//! the binaries built on it.
//!
//! ## Features
//!
//! - **Layered settings**: defaults, TOML file, `BUSRPC_*` environment
//! - **Validation**: zero timeouts and empty worker pools are rejected
//! - **Logging**: `tracing-subscriber` with `EnvFilter`, pretty or JSON output
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bus_config::{init_logging, load_config};
//!
//! let config = load_config()?;
//! init_logging(&config.logging)?;
//! let timeout = config.method_call_timeout();
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod defaults;
pub mod logging;
pub mod rpc_config;

pub use logging::{env_filter, init_logging};
pub use rpc_config::{load_config, LogFormat, LoggingConfig, RpcConfig};
