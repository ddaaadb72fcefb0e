//! Configuration management for fanmap
//!
//! Settings are layered with figment, lowest priority first:
//! built-in defaults, a `fanmap.{toml,json,yaml}` file, then `FANMAP_*`
//! environment variables.

mod core;

pub use self::core::{ENV_PREFIX, ParallelConfig};
