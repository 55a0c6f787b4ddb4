//! Data rates — how fast a sender may put bytes on the link.
//!
//! Written the way link rates usually are: `"100Mbps"`, `"500kbps"`,
//! `"1.5Gbps"`, `"8000bps"`, or in bytes as `"2MB/s"`. Decimal prefixes
//! (k = 1000). A rate of zero means "do not pace".

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataRate {
    bits_per_sec: u64,
}

impl DataRate {
    pub const fn from_bps(bits_per_sec: u64) -> Self {
        Self { bits_per_sec }
    }

    pub const fn bps(self) -> u64 {
        self.bits_per_sec
    }

    pub const fn is_zero(self) -> bool {
        self.bits_per_sec == 0
    }

    /// Time to serialize `bytes` onto a link of this rate.
    /// Zero for a zero rate.
    pub fn tx_time(self, bytes: usize) -> Duration {
        if self.bits_per_sec == 0 {
            return Duration::ZERO;
        }
        let nanos = (bytes as u128 * 8 * 1_000_000_000) / self.bits_per_sec as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}

// (suffix, bits per unit). Longest suffixes first so "kbps" wins over "bps".
const UNITS: &[(&str, f64)] = &[
    ("Gbps", 1e9),
    ("Mbps", 1e6),
    ("kbps", 1e3),
    ("Kbps", 1e3),
    ("Gb/s", 1e9),
    ("Mb/s", 1e6),
    ("kb/s", 1e3),
    ("GB/s", 8e9),
    ("MB/s", 8e6),
    ("kB/s", 8e3),
    ("KB/s", 8e3),
    ("bps", 1.0),
    ("b/s", 1.0),
    ("B/s", 8.0),
];

impl FromStr for DataRate {
    type Err = RateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (number, scale) = UNITS
            .iter()
            .find_map(|(suffix, scale)| s.strip_suffix(suffix).map(|n| (n.trim(), *scale)))
            .ok_or_else(|| RateError::UnknownUnit(s.to_string()))?;

        let value: f64 = number
            .parse()
            .map_err(|_| RateError::InvalidNumber(s.to_string()))?;
        if !value.is_finite() || value < 0.0 {
            return Err(RateError::InvalidNumber(s.to_string()));
        }

        Ok(Self::from_bps((value * scale).round() as u64))
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bps = self.bits_per_sec;
        match bps {
            0 => write!(f, "0bps"),
            b if b % 1_000_000_000 == 0 => write!(f, "{}Gbps", b / 1_000_000_000),
            b if b % 1_000_000 == 0 => write!(f, "{}Mbps", b / 1_000_000),
            b if b % 1_000 == 0 => write!(f, "{}kbps", b / 1_000),
            b => write!(f, "{b}bps"),
        }
    }
}

impl TryFrom<String> for DataRate {
    type Error = RateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataRate> for String {
    fn from(rate: DataRate) -> String {
        rate.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateError {
    #[error("unknown data rate unit in {0:?} (expected e.g. bps, kbps, Mbps, Gbps, MB/s)")]
    UnknownUnit(String),

    #[error("invalid data rate value in {0:?}")]
    InvalidNumber(String),
}
