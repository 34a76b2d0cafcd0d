//! Environment variable utilities
//!
//! Every lookup is keyed by suffix; the `NETPOLL_` prefix is added here so
//! callers never spell it out.
//!
//! ```ignore
//! use netpoll_core::env::{env_get, env_get_bool};
//!
//! let shards: usize = env_get("SHARDS", 4);    // NETPOLL_SHARDS
//! let flush = env_get_bool("LOG_FLUSH", false); // NETPOLL_LOG_FLUSH
//! ```

use std::str::FromStr;

use crate::constants::ENV_PREFIX;

/// Full variable name for `suffix`.
#[inline]
pub fn env_key(suffix: &str) -> String {
    format!("{}{}", ENV_PREFIX, suffix)
}

/// Parse `NETPOLL_<suffix>` as `T`, falling back to `default` when unset
/// or unparsable.
#[inline]
pub fn env_get<T>(suffix: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(suffix).unwrap_or(default)
}

/// Boolean lookup; "1", "true", "yes", "on" (any case) are true.
#[inline]
pub fn env_get_bool(suffix: &str, default: bool) -> bool {
    match std::env::var(env_key(suffix)) {
        Ok(val) => matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[inline]
pub fn env_get_opt<T>(suffix: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(env_key(suffix)).ok().and_then(|v| v.trim().parse().ok())
}

#[inline]
pub fn env_get_str(suffix: &str, default: &str) -> String {
    std::env::var(env_key(suffix)).unwrap_or_else(|_| default.to_string())
}
