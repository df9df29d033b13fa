use std::path::PathBuf;
use std::time::Duration;

use crate::model::*;

/// Business rules for attendance and occupancy. These were hard-coded in the
/// old dashboard; here they are settings with the same defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttendancePolicy {
    /// Check-ins more than this long after exam start are `late`.
    pub grace_ms: Ms,
    /// Opening of the occupancy day, as an offset from local midnight.
    pub day_open_ms: Ms,
    /// Close of the occupancy day, as an offset from local midnight.
    pub day_close_ms: Ms,
    /// Local time minus UTC.
    pub utc_offset_ms: Ms,
}

pub const DEFAULT_GRACE_MS: Ms = 7 * MINUTE_MS;
pub const DEFAULT_DAY_OPEN_MS: Ms = 7 * HOUR_MS + 30 * MINUTE_MS;
pub const DEFAULT_DAY_CLOSE_MS: Ms = 21 * HOUR_MS;

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            grace_ms: DEFAULT_GRACE_MS,
            day_open_ms: DEFAULT_DAY_OPEN_MS,
            day_close_ms: DEFAULT_DAY_CLOSE_MS,
            utc_offset_ms: 0,
        }
    }
}

impl AttendancePolicy {
    /// Local calendar day number containing `t`.
    pub fn local_day(&self, t: Ms) -> i64 {
        (t + self.utc_offset_ms).div_euclid(DAY_MS)
    }

    pub fn same_day(&self, a: Ms, b: Ms) -> bool {
        self.local_day(a) == self.local_day(b)
    }

    /// Occupancy window `[open, close)` of the local day containing `t`.
    pub fn day_window(&self, t: Ms) -> Span {
        let midnight = self.local_day(t) * DAY_MS - self.utc_offset_ms;
        Span::new(midnight + self.day_open_ms, midnight + self.day_close_ms)
    }

    pub fn is_late(&self, window: &Span, now: Ms) -> bool {
        now - window.start > self.grace_ms
    }
}

/// Everything the daemon reads from the environment at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub sweep_interval: Duration,
    pub policy: AttendancePolicy,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let day_open_ms = match env("PROCTORD_DAY_OPEN") {
            Some(s) => parse_clock(&s).ok_or(ConfigError::Invalid("PROCTORD_DAY_OPEN", s))?,
            None => DEFAULT_DAY_OPEN_MS,
        };
        let day_close_ms = match env("PROCTORD_DAY_CLOSE") {
            Some(s) => parse_clock(&s).ok_or(ConfigError::Invalid("PROCTORD_DAY_CLOSE", s))?,
            None => DEFAULT_DAY_CLOSE_MS,
        };
        if day_open_ms >= day_close_ms {
            return Err(ConfigError::EmptyDay);
        }

        let policy = AttendancePolicy {
            grace_ms: env_parse::<i64>("PROCTORD_GRACE_SECS")?
                .map_or(DEFAULT_GRACE_MS, |s| s * SECOND_MS),
            day_open_ms,
            day_close_ms,
            utc_offset_ms: env_parse::<i64>("PROCTORD_UTC_OFFSET_MINUTES")?
                .map_or(0, |m| m * MINUTE_MS),
        };

        Ok(Self {
            bind: env("PROCTORD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: env_parse("PROCTORD_PORT")?.unwrap_or(5434),
            data_dir: PathBuf::from(env("PROCTORD_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: env("PROCTORD_PASSWORD").unwrap_or_else(|| "proctord".into()),
            max_connections: env_parse("PROCTORD_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: env_parse("PROCTORD_COMPACT_THRESHOLD")?.unwrap_or(1000),
            metrics_port: env_parse("PROCTORD_METRICS_PORT")?,
            tls_cert: env("PROCTORD_TLS_CERT"),
            tls_key: env("PROCTORD_TLS_KEY"),
            sweep_interval: Duration::from_secs(
                env_parse("PROCTORD_SWEEP_INTERVAL_SECS")?.unwrap_or(30),
            ),
            policy,
        })
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env(key) {
        Some(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key, s)),
        None => Ok(None),
    }
}

/// Parse `HH:MM` into an offset from midnight.
pub fn parse_clock(s: &str) -> Option<Ms> {
    let (h, m) = s.trim().split_once(':')?;
    let h: i64 = h.parse().ok()?;
    let m: i64 = m.parse().ok()?;
    if !(0..=24).contains(&h) || !(0..60).contains(&m) || (h == 24 && m != 0) {
        return None;
    }
    Some(h * HOUR_MS + m * MINUTE_MS)
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid(&'static str, String),
    EmptyDay,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid(key, value) => write!(f, "invalid value for {key}: {value:?}"),
            ConfigError::EmptyDay => write!(f, "PROCTORD_DAY_OPEN must be before PROCTORD_DAY_CLOSE"),
        }
    }
}

impl std::error::Error for ConfigError {}
