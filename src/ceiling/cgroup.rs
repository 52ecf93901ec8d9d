//! Control group creation, binding and teardown

use super::pressure::PressureSource;
use super::{Ceiling, CeilingConfig};
use crate::error::{Error, Result};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// cgroup filesystem layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Hierarchy {
    V1,
    V2,
}

impl Hierarchy {
    /// Inspect the mount point to find out which layout is in use
    pub fn detect(root: &Path) -> Result<Self> {
        if root.join("cgroup.controllers").exists() {
            Ok(Hierarchy::V2)
        } else if root.join("memory").is_dir() {
            Ok(Hierarchy::V1)
        } else {
            Err(Error::Ceiling(format!(
                "no cgroup memory controller found under {}",
                root.display()
            )))
        }
    }

    /// Directory holding the groups of the memory controller
    fn controller_dir(self, root: &Path) -> PathBuf {
        match self {
            Hierarchy::V2 => root.to_path_buf(),
            Hierarchy::V1 => root.join("memory"),
        }
    }
}

/// Live binding of this process to an enforcing control group.
///
/// Dropping the guard moves the process back to the parent group and
/// removes the group.
#[derive(Debug)]
pub struct CeilingGuard {
    hierarchy: Hierarchy,
    dir: PathBuf,
    parent_procs: PathBuf,
    ceiling: Ceiling,
    pid: u32,
    torn_down: bool,
}

impl CeilingGuard {
    /// Create the group, apply the ceiling and bind the current process
    pub fn install(config: &CeilingConfig) -> Result<Self> {
        Self::install_for(config, std::process::id())
    }

    /// Same as [`CeilingGuard::install`] for an arbitrary pid
    pub fn install_for(config: &CeilingConfig, pid: u32) -> Result<Self> {
        let hierarchy = Hierarchy::detect(&config.root)?;
        let controller = hierarchy.controller_dir(&config.root);
        let dir = controller.join(&config.name);

        if dir.exists() {
            if std::fs::remove_dir(&dir).is_ok() {
                info!(cgroup = %config.name, "Preexisting cgroup deleted");
            } else {
                warn!(cgroup = %config.name, "Preexisting cgroup could not be deleted, reusing it");
            }
        }

        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::Ceiling(format!("failed to create cgroup {}: {}", dir.display(), e))
        })?;
        info!(cgroup = %config.name, ?hierarchy, "Cgroup created");

        let guard = Self {
            hierarchy,
            dir,
            parent_procs: controller.join("cgroup.procs"),
            ceiling: config.ceiling,
            pid,
            torn_down: false,
        };

        if let Err(e) = guard.apply_limits(&controller) {
            error!(error = %e, "Failed to apply memory ceiling");
            return Err(e);
        }

        write_control(&guard.dir.join("cgroup.procs"), &pid.to_string()).map_err(|e| {
            Error::Ceiling(format!("failed to add process {} to group: {}", pid, e))
        })?;
        info!(pid, ceiling = guard.ceiling.bytes(), "Process added to cgroup");

        Ok(guard)
    }

    fn apply_limits(&self, controller: &Path) -> Result<()> {
        let limit = self.ceiling.bytes().to_string();

        match self.hierarchy {
            Hierarchy::V2 => {
                let max = self.dir.join("memory.max");
                if !max.exists() {
                    // The memory controller must be delegated to children
                    write_control(&controller.join("cgroup.subtree_control"), "+memory")?;
                }
                write_control(&max, &limit)?;
                // v2 limits swap on its own; zero matches a combined
                // memory+swap limit equal to the memory limit
                write_control(&self.dir.join("memory.swap.max"), "0")?;
            }
            Hierarchy::V1 => {
                // memsw may never be below the plain limit, so set it second
                write_control(&self.dir.join("memory.limit_in_bytes"), &limit)?;
                write_control(&self.dir.join("memory.memsw.limit_in_bytes"), &limit)?;
            }
        }
        Ok(())
    }

    pub fn hierarchy(&self) -> Hierarchy {
        self.hierarchy
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn ceiling(&self) -> Ceiling {
        self.ceiling
    }

    /// Reader for the group's enforcement counters
    pub fn pressure_source(&self) -> PressureSource {
        PressureSource::new(self.hierarchy, self.dir.clone())
    }

    /// Unbind and remove the group now instead of on drop
    pub fn teardown(mut self) -> Result<()> {
        self.torn_down = true;
        self.remove()
    }

    fn remove(&self) -> Result<()> {
        write_control(&self.parent_procs, &self.pid.to_string())?;
        std::fs::remove_dir(&self.dir).map_err(|e| {
            Error::Ceiling(format!("failed to delete cgroup {}: {}", self.dir.display(), e))
        })?;
        info!(cgroup = %self.dir.display(), "Cgroup deleted");
        Ok(())
    }
}

impl Drop for CeilingGuard {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        if let Err(e) = self.remove() {
            warn!(error = %e, "Cgroup teardown incomplete");
        }
    }
}

/// Write a cgroup interface file. Interface files are never created.
fn write_control(path: &Path, value: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| Error::Ceiling(format!("failed to open {}: {}", path.display(), e)))?;

    file.write_all(value.as_bytes())
        .map_err(|e| Error::Ceiling(format!("failed to write {}: {}", path.display(), e)))
}
