//! # Actor Runtime Configuration
//!
//! Typed configuration and defaults shared by the actor runtime and the
//! binaries built on top of it.
//!
//! ## Features
//!
//! - **Defaults**: Slot counts, mailbox sizes, worker counts, trace buffers
//! - **Recovery policy**: What the system does when an actor fails
//! - **Loading**: TOML files with `ACTOR_` environment overrides
//!
//! ## Usage
//!
//! ```rust
//! use actor_config::{RecoveryPolicy, RuntimeConfig};
//!
//! let config = RuntimeConfig::from_toml_str(
//!     r#"
//! [system]
//! max_actors = 8
//! default_recovery = "stop"
//! "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.system.max_actors, 8);
//! assert_eq!(config.system.default_recovery, RecoveryPolicy::Stop);
//! ```

pub mod defaults;
pub mod policy;
pub mod runtime_config;

// Re-export commonly used types
pub use policy::RecoveryPolicy;
pub use runtime_config::{
    load_config, LoggingSettings, PoolSettings, RuntimeConfig, SystemSettings, TraceFormat,
    TraceSettings,
};
