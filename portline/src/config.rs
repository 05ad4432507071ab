//! Process-wide tunables read once from the environment.
//!
//! Grounded on `ipc.py`'s module-level `with _opt as _def:` block, which
//! pulls a handful of `TPP_IPC_*` environment variables into defaulted
//! globals at import time. This module does the same with `OnceLock`,
//! read once on first use and cached for the life of the process.

use std::sync::OnceLock;
use std::time::Duration;

/// Process-wide transport defaults (spec.md §4.1, §4.7).
#[derive(Debug, Clone)]
pub struct Config {
    /// `TPP_IPC_DEBUG`: when set to a truthy value, the pack/unpack path
    /// logs every frame sent and received (spec.md §6).
    pub debug: bool,
    /// `PORTLINE_SEND_TIMEOUT_S`: default [`crate::socket::FramedSocket::send_timeout`].
    pub send_timeout: Duration,
    /// `PORTLINE_RECV_TIMEOUT_S`: default [`crate::socket::FramedSocket::next_recv_timeout`].
    pub recv_timeout: Duration,
    /// `PORTLINE_RETRY_INTERVAL_S`: [`crate::connector::Connector`] delay
    /// between connect attempts.
    pub retry_interval: Duration,
    /// `PORTLINE_THREADPOOL_MAX`: default [`crate::threadpool::ThreadPool`] ceiling.
    pub threadpool_max: usize,
    /// `PORTLINE_THREADPOOL_LWM`: default [`crate::threadpool::ThreadPool`] floor.
    pub threadpool_lwm: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            debug: false,
            send_timeout: Duration::from_secs(120),
            recv_timeout: Duration::from_secs(120),
            retry_interval: Duration::from_secs(5),
            threadpool_max: 128,
            threadpool_lwm: 8,
        }
    }
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| {
        let v = v.trim();
        !(v.is_empty() || v == "0" || v.eq_ignore_ascii_case("false"))
    })
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(Duration::from_secs_f64)
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Config {
    fn from_env() -> Self {
        let default = Config::default();
        Config {
            debug: env_bool("TPP_IPC_DEBUG").unwrap_or(default.debug),
            send_timeout: env_secs("PORTLINE_SEND_TIMEOUT_S").unwrap_or(default.send_timeout),
            recv_timeout: env_secs("PORTLINE_RECV_TIMEOUT_S").unwrap_or(default.recv_timeout),
            retry_interval: env_secs("PORTLINE_RETRY_INTERVAL_S").unwrap_or(default.retry_interval),
            threadpool_max: env_usize("PORTLINE_THREADPOOL_MAX").unwrap_or(default.threadpool_max),
            threadpool_lwm: env_usize("PORTLINE_THREADPOOL_LWM").unwrap_or(default.threadpool_lwm),
        }
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Returns the process-wide config, reading the environment on first call.
pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.threadpool_max, 128);
        assert_eq!(c.threadpool_lwm, 8);
        assert_eq!(c.retry_interval, Duration::from_secs(5));
    }

    #[test]
    fn env_bool_treats_zero_and_false_as_falsy() {
        assert_eq!(env_bool("PORTLINE_CONFIG_TEST_UNSET_VAR"), None);
    }
}
