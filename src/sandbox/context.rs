/// Per-call isolation contexts
///
/// One context per sandbox call: a fresh directory named by a new UUID
/// holding the harness and guest source, plus an optional cgroup scope.
/// Dropping the context kills anything left in the scope and removes the
/// directory, on every exit path.
use crate::config::types::{GradeError, Result};
use crate::kernel::cgroup::{self, CgroupScope};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Pids a scope may hold: the interpreter plus a few runtime helper threads
/// (V8 and CPython both spawn some).
const SCOPE_PIDS_LIMIT: u32 = 32;

/// Cgroup parameters for a context
#[derive(Debug, Clone)]
pub struct ScopeRequest<'a> {
    pub parent: &'a Path,
    pub memory_limit_bytes: u64,
}

pub struct IsolationContext {
    id: Uuid,
    root: PathBuf,
    cgroup: Option<CgroupScope>,
}

impl IsolationContext {
    /// Create the context directory under `workspace_root` and, when a
    /// delegated cgroup parent is configured, a matching scope.
    pub fn create(
        workspace_root: &Path,
        scope: Option<ScopeRequest<'_>>,
        strict_mode: bool,
    ) -> Result<Self> {
        fs::create_dir_all(workspace_root).map_err(|e| {
            GradeError::Infrastructure(format!(
                "Failed to create workspace root {}: {}",
                workspace_root.display(),
                e
            ))
        })?;

        let id = Uuid::new_v4();
        let root = workspace_root.join(format!("ctx-{id}"));
        fs::create_dir(&root).map_err(|e| {
            GradeError::Infrastructure(format!(
                "Failed to create isolation context {}: {}",
                root.display(),
                e
            ))
        })?;
        // Owned from here on: any later failure drops and removes it.
        let mut context = IsolationContext {
            id,
            root,
            cgroup: None,
        };
        // Readable by a dropped sandbox uid, writable only by the engine.
        fs::set_permissions(&context.root, fs::Permissions::from_mode(0o755))?;

        if let Some(request) = scope {
            if cgroup::is_delegated(request.parent) {
                context.cgroup = Some(CgroupScope::create(
                    request.parent,
                    &format!("gradebox-{id}"),
                    request.memory_limit_bytes,
                    Some(SCOPE_PIDS_LIMIT),
                    strict_mode,
                )?);
            } else if strict_mode {
                return Err(GradeError::Infrastructure(format!(
                    "cgroup parent {} is not a delegated cgroup v2 directory",
                    request.parent.display()
                )));
            } else {
                log::warn!(
                    "cgroup parent {} not usable; memory enforced by rlimits only",
                    request.parent.display()
                );
            }
        }

        log::debug!("Created isolation context {}", context.id);
        Ok(context)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cgroup(&self) -> Option<&CgroupScope> {
        self.cgroup.as_ref()
    }

    /// Write a read-only file into the context.
    pub fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf> {
        if name.contains('/') || name.starts_with('.') {
            return Err(GradeError::Config(format!(
                "invalid context file name: {name}"
            )));
        }
        let path = self.root.join(name);
        fs::write(&path, contents).map_err(|e| {
            GradeError::Infrastructure(format!("Failed to write {}: {}", path.display(), e))
        })?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444))?;
        Ok(path)
    }

    /// True when the scope recorded an OOM kill during this context's run
    pub fn oom_killed(&self) -> bool {
        self.cgroup
            .as_ref()
            .map(|scope| scope.oom_kill_count() > 0)
            .unwrap_or(false)
    }
}

impl Drop for IsolationContext {
    fn drop(&mut self) {
        // Scope first: no process may still be writing into the directory.
        drop(self.cgroup.take());
        if let Err(e) = fs::remove_dir_all(&self.root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "Failed to remove isolation context {}: {}",
                    self.root.display(),
                    e
                );
            }
        }
    }
}

/// Remove context directories left behind by a crashed engine.
pub fn sweep_stale_contexts(workspace_root: &Path, max_age: Duration) -> usize {
    let Ok(entries) = fs::read_dir(workspace_root) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with("ctx-") {
            continue;
        }
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > max_age);
        if stale && fs::remove_dir_all(entry.path()).is_ok() {
            removed += 1;
        }
    }

    if removed > 0 {
        log::info!("Removed {} stale isolation contexts", removed);
    }
    removed
}
