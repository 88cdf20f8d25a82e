/// Cgroup v2 run scopes
///
/// A scope is one cgroup directory per isolation context, created under a
/// delegated parent, joined by the guest from inside its pre-exec chain and
/// removed when the scope is dropped.
use crate::config::types::{GradeError, Result};
use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Detect a usable cgroup v2 parent: mounted unified hierarchy and a
/// writable `cgroup.procs` under `parent`.
pub fn is_delegated(parent: &Path) -> bool {
    Path::new("/sys/fs/cgroup/cgroup.controllers").exists()
        && parent.join("cgroup.subtree_control").exists()
        && fs::metadata(parent.join("cgroup.procs"))
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false)
}

/// Per-run cgroup v2 scope
#[derive(Debug)]
pub struct CgroupScope {
    path: PathBuf,
    procs_path: CString,
}

impl CgroupScope {
    /// Create `parent/<name>` and apply memory/pid limits.
    pub fn create(
        parent: &Path,
        name: &str,
        memory_limit_bytes: u64,
        pids_limit: Option<u32>,
        strict_mode: bool,
    ) -> Result<Self> {
        let path = parent.join(name);
        fs::create_dir(&path).map_err(|e| {
            GradeError::Infrastructure(format!(
                "Failed to create cgroup {}: {}",
                path.display(),
                e
            ))
        })?;

        let procs_path = CString::new(path.join("cgroup.procs").as_os_str().as_bytes())
            .map_err(|_| GradeError::Config("cgroup path contains NUL byte".to_string()))?;
        let scope = CgroupScope { path, procs_path };

        scope.write_control("memory.max", &memory_limit_bytes.to_string())?;
        // No swap headroom: the ceiling is the ceiling.
        scope.write_optional("memory.swap.max", "0", strict_mode)?;
        // Kill the whole group on OOM rather than one victim thread.
        scope.write_optional("memory.oom.group", "1", strict_mode)?;
        if let Some(limit) = pids_limit {
            scope.write_optional("pids.max", &limit.to_string(), strict_mode)?;
        }

        log::debug!("Created cgroup scope {}", scope.path.display());
        Ok(scope)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path the child writes "0" into to join this scope before exec
    pub fn procs_path(&self) -> &CString {
        &self.procs_path
    }

    /// `oom_kill` counter from memory.events
    pub fn oom_kill_count(&self) -> u64 {
        let Ok(content) = fs::read_to_string(self.path.join("memory.events")) else {
            return 0;
        };
        content
            .lines()
            .filter_map(|line| line.split_once(' '))
            .find(|(key, _)| *key == "oom_kill")
            .and_then(|(_, value)| value.trim().parse().ok())
            .unwrap_or(0)
    }

    /// memory.peak (kernel 5.19+) with fallback to memory.current
    pub fn memory_peak(&self) -> Option<u64> {
        ["memory.peak", "memory.current"].iter().find_map(|file| {
            fs::read_to_string(self.path.join(file))
                .ok()
                .and_then(|c| c.trim().parse().ok())
        })
    }

    /// Kill every process left in the scope (kernel 5.14+ `cgroup.kill`).
    pub fn kill_all(&self) {
        let kill_path = self.path.join("cgroup.kill");
        if kill_path.exists() {
            if let Err(e) = fs::write(&kill_path, "1") {
                log::warn!("Failed to write {}: {}", kill_path.display(), e);
            }
        }
    }

    fn write_control(&self, file: &str, value: &str) -> Result<()> {
        fs::write(self.path.join(file), value).map_err(|e| {
            GradeError::Infrastructure(format!("Failed to set {file}={value}: {e}"))
        })
    }

    fn write_optional(&self, file: &str, value: &str, strict_mode: bool) -> Result<()> {
        let target = self.path.join(file);
        if !target.exists() {
            return Ok(());
        }
        match fs::write(&target, value) {
            Ok(()) => Ok(()),
            Err(e) if strict_mode => Err(GradeError::Infrastructure(format!(
                "Failed to set {file}={value}: {e}"
            ))),
            Err(e) => {
                log::warn!("Failed to set {}={} (permissive mode): {}", file, value, e);
                Ok(())
            }
        }
    }
}

impl Drop for CgroupScope {
    fn drop(&mut self) {
        self.kill_all();
        // rmdir fails with EBUSY until the last member is reaped.
        let started = Instant::now();
        loop {
            match fs::remove_dir(&self.path) {
                Ok(()) => return,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
                Err(e) => {
                    if started.elapsed() > Duration::from_millis(500) {
                        log::warn!("Failed to remove cgroup {}: {}", self.path.display(), e);
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
    }
}
