//! Memory pressure notifications
//!
//! Polls the enforcing group's event counters and reports every increase.
//! Observation only: a notification never triggers a collection.

use super::cgroup::Hierarchy;
use crate::error::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Cumulative enforcement counters of a control group.
///
/// cgroup v1 only exposes a failure count, reported as `max`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PressureCounters {
    /// Usage went above the soft limit
    pub high: u64,
    /// Usage hit the hard limit and reclaim was attempted
    pub max: u64,
    /// The group ran out of memory
    pub oom: u64,
    /// Processes killed by the OOM killer
    pub oom_kill: u64,
}

impl PressureCounters {
    /// Parse a cgroup v2 `memory.events` file
    pub fn parse_events(content: &str) -> Self {
        let mut counters = Self::default();
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Ok(value) = value.parse::<u64>() else {
                continue;
            };
            match key {
                "high" => counters.high = value,
                "max" => counters.max = value,
                "oom" => counters.oom = value,
                "oom_kill" => counters.oom_kill = value,
                _ => {}
            }
        }
        counters
    }

    /// Per-counter increase since `earlier`, or `None` when nothing grew
    pub fn increase_since(&self, earlier: &Self) -> Option<Self> {
        let delta = Self {
            high: self.high.saturating_sub(earlier.high),
            max: self.max.saturating_sub(earlier.max),
            oom: self.oom.saturating_sub(earlier.oom),
            oom_kill: self.oom_kill.saturating_sub(earlier.oom_kill),
        };
        (delta != Self::default()).then_some(delta)
    }
}

/// One observed increase of the pressure counters
#[derive(Debug, Clone, Serialize)]
pub struct PressureEvent {
    pub delta: PressureCounters,
    pub total: PressureCounters,
    /// Group memory usage at the time of the observation
    pub usage: Option<u64>,
}

/// Reads counters and usage of one control group
#[derive(Debug, Clone)]
pub struct PressureSource {
    hierarchy: Hierarchy,
    dir: PathBuf,
}

impl PressureSource {
    pub fn new(hierarchy: Hierarchy, dir: PathBuf) -> Self {
        Self { hierarchy, dir }
    }

    pub fn counters(&self) -> Result<PressureCounters> {
        match self.hierarchy {
            Hierarchy::V2 => Ok(PressureCounters::parse_events(&read_control(
                &self.dir.join("memory.events"),
            )?)),
            Hierarchy::V1 => Ok(PressureCounters {
                max: parse_number(&self.dir.join("memory.failcnt"))?,
                ..PressureCounters::default()
            }),
        }
    }

    /// Current memory usage of the group in bytes
    pub fn usage(&self) -> Result<u64> {
        let file = match self.hierarchy {
            Hierarchy::V2 => "memory.current",
            Hierarchy::V1 => "memory.usage_in_bytes",
        };
        parse_number(&self.dir.join(file))
    }

    /// Poll every `interval` and send one event per counter increase.
    ///
    /// The task ends when the receiver is dropped or the counters become
    /// unreadable.
    pub fn spawn_monitor(
        self,
        interval: Duration,
    ) -> (JoinHandle<()>, mpsc::Receiver<PressureEvent>) {
        let (tx, rx) = mpsc::channel(64);

        let handle = tokio::spawn(async move {
            let mut last = match self.counters() {
                Ok(counters) => counters,
                Err(e) => {
                    warn!(error = %e, "Memory pressure monitor disabled");
                    return;
                }
            };

            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;

                let current = match self.counters() {
                    Ok(counters) => counters,
                    Err(e) => {
                        debug!(error = %e, "Memory pressure monitor stopped");
                        return;
                    }
                };

                if let Some(delta) = current.increase_since(&last) {
                    let event = PressureEvent {
                        delta,
                        total: current,
                        usage: self.usage().ok(),
                    };
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                last = current;
            }
        });

        (handle, rx)
    }
}

/// Log every pressure event until the monitor stops
pub fn log_pressure_events(mut rx: mpsc::Receiver<PressureEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            warn!(
                high = event.delta.high,
                max = event.delta.max,
                oom = event.delta.oom,
                oom_kill = event.delta.oom_kill,
                usage = event.usage,
                "Received memory pressure notification"
            );
        }
    })
}

fn read_control(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::Ceiling(format!("failed to read {}: {}", path.display(), e)))
}

fn parse_number(path: &Path) -> Result<u64> {
    let content = read_control(path)?;
    content.trim().parse().map_err(|_| {
        Error::Ceiling(format!(
            "unexpected content in {}: {:?}",
            path.display(),
            content.trim()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tokio::time::timeout;

    fn temp_group(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "trampoline_pressure_{}_{}",
            tag,
            std::process::id()
        ));
        fs::remove_dir_all(&dir).ok();
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_parse_events() {
        let counters = PressureCounters::parse_events(
            "low 0\nhigh 3\nmax 12\noom 1\noom_kill 1\noom_group_kill 0\n",
        );
        assert_eq!(
            counters,
            PressureCounters {
                high: 3,
                max: 12,
                oom: 1,
                oom_kill: 1
            }
        );
    }

    #[test]
    fn test_parse_events_skips_malformed_lines() {
        let counters = PressureCounters::parse_events("max\nhigh x\nmax 2");
        assert_eq!(counters.max, 2);
        assert_eq!(counters.high, 0);
    }

    #[test]
    fn test_increase_since() {
        let before = PressureCounters {
            max: 2,
            ..Default::default()
        };
        assert!(before.increase_since(&before).is_none());

        let after = PressureCounters {
            max: 5,
            oom: 1,
            ..Default::default()
        };
        let delta = after.increase_since(&before).unwrap();
        assert_eq!(delta.max, 3);
        assert_eq!(delta.oom, 1);
        assert_eq!(delta.high, 0);
    }

    #[test]
    fn test_v1_counters_and_usage() -> Result<()> {
        let dir = temp_group("v1");
        fs::write(dir.join("memory.failcnt"), "9\n").unwrap();
        fs::write(dir.join("memory.usage_in_bytes"), "1048576\n").unwrap();

        let source = PressureSource::new(Hierarchy::V1, dir.clone());
        assert_eq!(source.counters()?.max, 9);
        assert_eq!(source.usage()?, 1 << 20);

        fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[tokio::test]
    async fn test_monitor_reports_increase() {
        let dir = temp_group("monitor");
        fs::write(dir.join("memory.events"), "high 0\nmax 0\noom 0\noom_kill 0\n").unwrap();
        fs::write(dir.join("memory.current"), "4096\n").unwrap();

        let source = PressureSource::new(Hierarchy::V2, dir.clone());
        let (handle, mut rx) = source.spawn_monitor(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(30)).await;
        fs::write(dir.join("memory.events"), "high 0\nmax 4\noom 0\noom_kill 0\n").unwrap();

        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("pressure event")
            .expect("monitor alive");
        assert_eq!(event.delta.max, 4);
        assert_eq!(event.usage, Some(4096));

        handle.abort();
        fs::remove_dir_all(dir).ok();
    }
}
