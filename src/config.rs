//! Server configuration (A3 addition): a `serde`-deserializable mirror of
//! the option table in the design's external-interfaces section, loaded
//! from TOML via `toml::from_str`.
//!
//! This is a deliberately plain config format, not a reinstatement of the
//! original's Tcl-based config grammar (out of scope per the design's
//! Non-goals) — just structs with `Default` impls, matching the defaults
//! in `examples/AmakeSashaDev-maker_web/src/limits.rs` wherever a field
//! overlaps.

use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration: one `[pools]`, one `[driver]`, and one
/// `[server]` table, plus any number of named conn-pool sizing overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub pools: DbPoolConfig,
    pub pool: ConnPoolConfig,
    pub driver: DriverConfig,
    pub server: ServerOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            pools: DbPoolConfig::default(),
            pool: ConnPoolConfig::default(),
            driver: DriverConfig::default(),
            server: ServerOptions::default(),
        }
    }
}

impl ServerConfig {
    /// Parses a TOML document into a `ServerConfig`, falling back to
    /// `Default` for any table or field the document omits.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// `[pools]` — sizing/staleness for named-resource pools (C9), e.g. a
/// database-handle pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbPoolConfig {
    /// `pools.connections` — capacity of each pool.
    pub connections: usize,
    /// `pools.maxidle` — seconds an idle handle may live before the
    /// sweeper closes it.
    pub maxidle_secs: u64,
    /// `pools.maxopen` — seconds a handle may live in total before forced
    /// recycle.
    pub maxopen_secs: u64,
    /// `pools.checkinterval` — sweeper period, in seconds.
    pub checkinterval_secs: u64,
}

impl Default for DbPoolConfig {
    fn default() -> Self {
        Self {
            connections: 4,
            maxidle_secs: 300,
            maxopen_secs: 3600,
            checkinterval_secs: 60,
        }
    }
}

impl DbPoolConfig {
    pub fn maxidle(&self) -> Duration {
        Duration::from_secs(self.maxidle_secs)
    }

    pub fn maxopen(&self) -> Duration {
        Duration::from_secs(self.maxopen_secs)
    }

    pub fn checkinterval(&self) -> Duration {
        Duration::from_secs(self.checkinterval_secs)
    }
}

/// `[pool]` — conn-pool worker sizing and back-pressure thresholds (C6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnPoolConfig {
    /// `pool.minthreads`
    pub minthreads: usize,
    /// `pool.maxthreads`
    pub maxthreads: usize,
    /// `pool.threadtimeout` — seconds an idle worker above `minthreads`
    /// waits before exiting.
    pub threadtimeout_secs: u64,
    /// `pool.lowwatermark` — wait-queue depth at which back-pressure
    /// lifts.
    pub lowwatermark: usize,
    /// `pool.highwatermark` — wait-queue depth at which new connections
    /// are refused (503/drop).
    pub highwatermark: usize,
}

impl Default for ConnPoolConfig {
    fn default() -> Self {
        Self {
            minthreads: 4,
            maxthreads: 64,
            threadtimeout_secs: 120,
            lowwatermark: 10,
            highwatermark: 100,
        }
    }
}

impl ConnPoolConfig {
    pub fn threadtimeout(&self) -> Duration {
        Duration::from_secs(self.threadtimeout_secs)
    }
}

/// `[driver]` — per-driver socket and buffering limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// `driver.maxinput` — max request body bytes.
    pub maxinput: usize,
    /// `driver.maxupload` — body size above which the upload is spooled
    /// to a temp file instead of buffered in memory.
    pub maxupload: usize,
    /// `driver.readahead` — in-memory request buffer cap. Follows the
    /// teacher's `ReqLimits::body_size` default of 4 KiB where the two
    /// overlap in purpose.
    pub readahead: usize,
    /// `driver.keepwait` — keep-alive idle timeout, in seconds.
    pub keepwait_secs: u64,
    /// `driver.sendwait` — write timeout, in seconds.
    pub sendwait_secs: u64,
    /// `driver.recvwait` — read timeout, in seconds.
    pub recvwait_secs: u64,
    /// `driver.writerthreads` — number of background writer threads.
    pub writerthreads: usize,
    /// `driver.spoolerthreads` — number of background upload-spooling
    /// threads.
    pub spoolerthreads: usize,
    /// `writer.maxsize` — response size above which sending is handed off
    /// to a writer thread instead of done inline.
    pub writer_maxsize: usize,
    /// `writer.streaming` — whether writer threads may stream a response
    /// that is still being produced, rather than requiring it complete
    /// first.
    pub writer_streaming: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            maxinput: 10 * 1024 * 1024,
            maxupload: 1024 * 1024,
            readahead: 4096,
            keepwait_secs: 30,
            sendwait_secs: 30,
            recvwait_secs: 30,
            writerthreads: 1,
            spoolerthreads: 1,
            writer_maxsize: 1024 * 1024,
            writer_streaming: false,
        }
    }
}

impl DriverConfig {
    pub fn keepwait(&self) -> Duration {
        Duration::from_secs(self.keepwait_secs)
    }

    pub fn sendwait(&self) -> Duration {
        Duration::from_secs(self.sendwait_secs)
    }

    pub fn recvwait(&self) -> Duration {
        Duration::from_secs(self.recvwait_secs)
    }
}

/// Per-request limits matched by `(method, URL)` and attached to a `Conn`
/// (spec.md §4.6). Every route starts from `RequestLimits::default`;
/// routes registered with their own limits via `ServerBuilder::route_limits`
/// override it for that method/path. Not part of `ServerConfig`/TOML —
/// these are route-specific, not a single global table, so they're
/// registered the same way routes themselves are.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestLimits {
    /// `maxrun` — seconds a handler may occupy a worker before it's
    /// logged as overrunning its budget.
    pub maxrun_secs: u64,
    /// `maxwait` — seconds a request may sit queued before it's logged as
    /// having waited too long for a worker.
    pub maxwait_secs: u64,
    /// `timeout` — seconds allowed for the whole request (queue wait +
    /// filters + handler) before it's logged as having overrun.
    pub timeout_secs: u64,
    /// `maxupload` — override of `driver.maxupload` for this route.
    pub maxupload: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            maxrun_secs: 30,
            maxwait_secs: 30,
            timeout_secs: 60,
            maxupload: 1024 * 1024,
        }
    }
}

impl RequestLimits {
    pub fn maxrun(&self) -> Duration {
        Duration::from_secs(self.maxrun_secs)
    }

    pub fn maxwait(&self) -> Duration {
        Duration::from_secs(self.maxwait_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[server]` — response/notice-page behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// `server.errorminsize` — minimum HTML error page body size; shorter
    /// notice pages are padded so older browsers don't substitute their
    /// own error page.
    pub errorminsize: usize,
    /// `server.noticedetail` — include a server signature line on notice
    /// pages.
    pub noticedetail: bool,
    pub compress: CompressConfig,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            errorminsize: 512,
            noticedetail: true,
            compress: CompressConfig::default(),
        }
    }
}

/// `server.compress.{enable,level,minsize}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompressConfig {
    pub enable: bool,
    pub level: u8,
    pub minsize: usize,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            enable: false,
            level: 6,
            minsize: 4096,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = ServerConfig::from_toml("").unwrap();
        assert_eq!(cfg.pool.minthreads, 4);
        assert_eq!(cfg.driver.readahead, 4096);
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let cfg = ServerConfig::from_toml("[pool]\nmaxthreads = 128\n").unwrap();
        assert_eq!(cfg.pool.maxthreads, 128);
        assert_eq!(cfg.pool.minthreads, 4);
        assert_eq!(cfg.driver.maxinput, 10 * 1024 * 1024);
    }

    #[test]
    fn full_document_overrides_every_table() {
        let toml = r#"
            [pools]
            connections = 8
            maxidle_secs = 120

            [driver]
            maxinput = 2048
            writerthreads = 3

            [server]
            errorminsize = 1024

            [server.compress]
            enable = true
        "#;
        let cfg = ServerConfig::from_toml(toml).unwrap();
        assert_eq!(cfg.pools.connections, 8);
        assert_eq!(cfg.pools.maxidle().as_secs(), 120);
        assert_eq!(cfg.driver.maxinput, 2048);
        assert_eq!(cfg.driver.writerthreads, 3);
        assert_eq!(cfg.server.errorminsize, 1024);
        assert!(cfg.server.compress.enable);
    }
}
