//! Resource ceiling
//!
//! The hard memory limit is enforced outside the process by a Linux
//! memory control group. This module creates that group, binds the
//! current process to it, watches its pressure counters, and tears it
//! down again on a normal exit.
//!
//! ```text
//! /sys/fs/cgroup/                     (v2)
//!   └─→ trampoline/
//!         ├─→ memory.max        = ceiling
//!         ├─→ memory.swap.max   = 0
//!         └─→ cgroup.procs      = pid
//!
//! /sys/fs/cgroup/memory/              (v1)
//!   └─→ trampoline/
//!         ├─→ memory.limit_in_bytes       = ceiling
//!         ├─→ memory.memsw.limit_in_bytes = ceiling
//!         └─→ cgroup.procs                = pid
//! ```
//!
//! Breaching the ceiling kills the process. Nothing here tries to
//! prevent or intercept that.

pub mod cgroup;
pub mod pressure;

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub use cgroup::{CeilingGuard, Hierarchy};
pub use pressure::{PressureCounters, PressureEvent, PressureSource};

const KIB: u64 = 1 << 10;
const MIB: u64 = 1 << 20;
const GIB: u64 = 1 << 30;

/// Enforced memory limit in bytes, fixed for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Ceiling(u64);

impl Ceiling {
    /// 32 MiB
    pub const DEFAULT: Ceiling = Ceiling(32 * MIB);

    pub fn new(bytes: u64) -> Result<Self> {
        if bytes == 0 {
            return Err(Error::Config("ceiling must be greater than zero".to_string()));
        }
        Ok(Self(bytes))
    }

    pub fn bytes(self) -> u64 {
        self.0
    }
}

impl Default for Ceiling {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Ceiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parses `33554432`, `32MiB`, `32MB`, `32M`, `512kib`, `1G`.
///
/// Suffixes containing `i` are binary, the rest decimal.
impl FromStr for Ceiling {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (digits, suffix) = s.split_at(split);

        let value: u64 = digits
            .parse()
            .map_err(|_| Error::Config(format!("invalid ceiling '{}'", s)))?;

        let multiplier = match suffix.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kb" => 1_000,
            "m" | "mb" => 1_000_000,
            "g" | "gb" => 1_000_000_000,
            "ki" | "kib" => KIB,
            "mi" | "mib" => MIB,
            "gi" | "gib" => GIB,
            other => {
                return Err(Error::Config(format!(
                    "unknown size suffix '{}' in ceiling '{}'",
                    other, s
                )))
            }
        };

        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| Error::Config(format!("ceiling '{}' overflows", s)))?;
        Self::new(bytes)
    }
}

/// Where and how the enforcing control group is created
#[derive(Debug, Clone)]
pub struct CeilingConfig {
    /// cgroup filesystem mount point
    pub root: PathBuf,
    /// Control group name
    pub name: String,
    pub ceiling: Ceiling,
}

impl Default for CeilingConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/sys/fs/cgroup"),
            name: "trampoline".to_string(),
            ceiling: Ceiling::DEFAULT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_bytes() {
        let ceiling: Ceiling = "33554432".parse().unwrap();
        assert_eq!(ceiling, Ceiling::DEFAULT);
    }

    #[test]
    fn test_parse_suffixes() {
        let cases = [
            ("32MiB", 32 * MIB),
            ("32mi", 32 * MIB),
            ("32M", 32_000_000),
            ("32 mb", 32_000_000),
            ("512KiB", 512 * KIB),
            ("1G", 1_000_000_000),
            ("2gib", 2 * GIB),
            ("100b", 100),
        ];
        for (input, expected) in cases {
            let ceiling: Ceiling = input.parse().unwrap();
            assert_eq!(ceiling.bytes(), expected, "{input}");
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for input in ["", "abc", "12XB", "-5", "0", "0MiB"] {
            assert!(input.parse::<Ceiling>().is_err(), "{input}");
        }
    }

    #[test]
    fn test_parse_rejects_overflow() {
        assert!("18446744073709551615GiB".parse::<Ceiling>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = CeilingConfig::default();
        assert_eq!(config.name, "trampoline");
        assert_eq!(config.ceiling.bytes(), 32 << 20);
    }
}
