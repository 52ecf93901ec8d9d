//! Step sizing relative to the ceiling

use crate::ceiling::Ceiling;
use crate::error::{Error, Result};
use serde::Serialize;

/// Allocation sizes for one scripted run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub ceiling: u64,
    /// Allocated bytes before the spike
    pub baseline: u64,
    /// `ceiling - baseline`
    pub available: u64,
    /// 10% of the ceiling, rounded down, kept back for the reallocation
    pub reserved: u64,
    /// `available - reserved`, the size of the spike
    pub fill: u64,
}

impl Plan {
    /// Size the spike and the reallocation.
    ///
    /// Fails instead of wrapping when the baseline already exceeds the
    /// ceiling, or when the reserve does not fit in what is left.
    pub fn compute(ceiling: Ceiling, baseline: u64) -> Result<Self> {
        let limit = ceiling.bytes();
        let reserved = limit / 10;

        let available = limit.checked_sub(baseline).ok_or_else(|| {
            Error::Plan(format!(
                "baseline allocation {} already exceeds ceiling {}",
                baseline, limit
            ))
        })?;

        let fill = available.checked_sub(reserved).ok_or_else(|| {
            Error::Plan(format!(
                "reserve {} does not fit in the {} bytes available under ceiling {}",
                reserved, available, limit
            ))
        })?;

        Ok(Self {
            ceiling: limit,
            baseline,
            available,
            reserved,
            fill,
        })
    }

    /// Spike size as a host allocation length
    pub fn fill_len(&self) -> Result<usize> {
        to_len(self.fill)
    }

    /// Reallocation size as a host allocation length
    pub fn reserved_len(&self) -> Result<usize> {
        to_len(self.reserved)
    }
}

fn to_len(bytes: u64) -> Result<usize> {
    usize::try_from(bytes)
        .map_err(|_| Error::Plan(format!("{} bytes exceeds the address space", bytes)))
}
