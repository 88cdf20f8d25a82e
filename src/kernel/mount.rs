/// Filesystem jail for guest runs
///
/// The context directory becomes the guest's root. The interpreter's
/// runtime (`/usr`, the library dirs, the interpreter's own prefix when it
/// lives elsewhere) is bind-mounted read-only at the same paths, a few
/// character devices are bound in, and top-level symlinks such as
/// `/bin -> usr/bin` are recreated. Everything else on the host is out of
/// reach once the old root is detached.
///
/// The layout is created in the parent. `enter_in_child` runs in the
/// guest's private mount namespace between fork and exec.
use crate::config::types::{GradeError, Result};
use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Host directories bound read-only when present
const RUNTIME_DIRS: [&str; 7] = ["/usr", "/bin", "/sbin", "/lib", "/lib32", "/lib64", "/libx32"];

/// Single files the dynamic loader reads
const RUNTIME_FILES: [&str; 1] = ["/etc/ld.so.cache"];

/// Character devices bound as-is
const DEVICES: [&str; 3] = ["/dev/null", "/dev/zero", "/dev/urandom"];

#[derive(Debug, Clone)]
struct BindMount {
    source: CString,
    target: CString,
    read_only: bool,
}

/// Mount plan for one context directory
#[derive(Debug, Clone)]
pub struct JailLayout {
    root: CString,
    binds: Vec<BindMount>,
}

impl JailLayout {
    /// Create mountpoints and symlinks under `root` for running
    /// `interpreter`, and plan the mounts that fill them.
    pub fn prepare(root: &Path, interpreter: &Path) -> Result<Self> {
        let mut layout = JailLayout {
            root: c_path(root)?,
            binds: Vec::new(),
        };
        let mut covered: Vec<PathBuf> = Vec::new();

        for dir in RUNTIME_DIRS {
            let host = Path::new(dir);
            let Ok(meta) = fs::symlink_metadata(host) else {
                continue;
            };
            let inside = jail_path(root, host);
            if meta.file_type().is_symlink() {
                let target = fs::read_link(host)?;
                std::os::unix::fs::symlink(&target, &inside)
                    .map_err(|e| jail_error(&inside, e))?;
            } else if meta.is_dir() {
                make_dir(&inside)?;
                layout.bind(host, &inside, true)?;
                covered.push(fs::canonicalize(host)?);
            }
        }

        // Interpreters installed outside the system dirs bring their prefix.
        let interpreter = fs::canonicalize(interpreter).map_err(|e| {
            GradeError::Infrastructure(format!(
                "Failed to resolve interpreter {}: {}",
                interpreter.display(),
                e
            ))
        })?;
        if !covered.iter().any(|dir| interpreter.starts_with(dir)) {
            let prefix = interpreter
                .parent()
                .and_then(Path::parent)
                .filter(|prefix| *prefix != Path::new("/"));
            match prefix {
                Some(prefix) => {
                    let inside = jail_path(root, prefix);
                    make_dir(&inside)?;
                    layout.bind(prefix, &inside, true)?;
                }
                None => {
                    let inside = jail_path(root, &interpreter);
                    make_file(&inside)?;
                    layout.bind(&interpreter, &inside, true)?;
                }
            }
        }

        for file in RUNTIME_FILES {
            let host = Path::new(file);
            if host.is_file() {
                let inside = jail_path(root, host);
                make_file(&inside)?;
                layout.bind(host, &inside, true)?;
            }
        }

        for device in DEVICES {
            let host = Path::new(device);
            if host.exists() {
                let inside = jail_path(root, host);
                make_file(&inside)?;
                layout.bind(host, &inside, false)?;
            }
        }

        Ok(layout)
    }

    /// Number of planned bind mounts
    pub fn bind_count(&self) -> usize {
        self.binds.len()
    }

    fn bind(&mut self, source: &Path, target: &Path, read_only: bool) -> Result<()> {
        self.binds.push(BindMount {
            source: c_path(source)?,
            target: c_path(target)?,
            read_only,
        });
        Ok(())
    }

    /// Build the jail and make it `/`. Must run in a fresh mount namespace.
    ///
    /// Every mount is in place before the root moves, so a failure leaves
    /// the process on the host root with its working directory unchanged.
    pub fn enter_in_child(&self) -> io::Result<()> {
        // No mount below may propagate back to the host.
        mount(None, b"/\0", libc::MS_REC | libc::MS_PRIVATE)?;

        // pivot_root needs the new root to be a mount point.
        let root = self.root.as_bytes_with_nul();
        mount(Some(root), root, libc::MS_BIND | libc::MS_REC)?;
        remount_read_only(&self.root)?;

        for bind in &self.binds {
            let target = bind.target.as_bytes_with_nul();
            let source = bind.source.as_bytes_with_nul();
            mount(Some(source), target, libc::MS_BIND | libc::MS_REC)?;
            if bind.read_only {
                remount_read_only(&bind.target)?;
            }
        }

        check(unsafe { libc::chdir(self.root.as_ptr()) })?;
        // The old root ends up stacked on "." and is detached right away.
        let dot = b".\0".as_ptr().cast::<libc::c_char>();
        if unsafe { libc::syscall(libc::SYS_pivot_root, dot, dot) } != 0 {
            return Err(io::Error::last_os_error());
        }
        check(unsafe { libc::umount2(dot, libc::MNT_DETACH) })?;
        check(unsafe { libc::chdir(b"/\0".as_ptr().cast()) })
    }
}

fn mount(source: Option<&[u8]>, target: &[u8], flags: libc::c_ulong) -> io::Result<()> {
    let source: *const libc::c_char = source.map_or(std::ptr::null(), |s| s.as_ptr().cast());
    check(unsafe {
        libc::mount(
            source,
            target.as_ptr().cast(),
            std::ptr::null(),
            flags,
            std::ptr::null(),
        )
    })
}

/// Remount a bind read-only, nosuid, nodev. Flags the kernel locks on the
/// source mount (atime policy, noexec) are read back and kept, or a remount
/// inside a user namespace is refused.
fn remount_read_only(target: &CString) -> io::Result<()> {
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    check(unsafe { libc::statvfs(target.as_ptr(), &mut stat) })?;

    let mut flags =
        libc::MS_REMOUNT | libc::MS_BIND | libc::MS_RDONLY | libc::MS_NOSUID | libc::MS_NODEV;
    let kept = [
        (libc::ST_NOEXEC, libc::MS_NOEXEC),
        (libc::ST_NOATIME, libc::MS_NOATIME),
        (libc::ST_NODIRATIME, libc::MS_NODIRATIME),
        (libc::ST_RELATIME, libc::MS_RELATIME),
    ];
    for (st, ms) in kept {
        if stat.f_flag & st != 0 {
            flags |= ms;
        }
    }
    mount(None, target.as_bytes_with_nul(), flags)
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn jail_path(root: &Path, host: &Path) -> PathBuf {
    root.join(host.strip_prefix("/").unwrap_or(host))
}

fn make_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| jail_error(path, e))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

fn make_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        make_dir(parent)?;
    }
    fs::File::create(path).map_err(|e| jail_error(path, e))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o444))?;
    Ok(())
}

fn c_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| GradeError::Config(format!("Invalid path {}: {}", path.display(), e)))
}

fn jail_error(path: &Path, err: io::Error) -> GradeError {
    GradeError::Infrastructure(format!(
        "Failed to create jail entry {}: {}",
        path.display(),
        err
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gradebox-jail-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_layout_mirrors_runtime_dirs() {
        let root = scratch();
        let layout = JailLayout::prepare(&root, Path::new("/bin/sh")).unwrap();

        for dir in ["/usr", "/bin", "/lib"] {
            let host = Path::new(dir);
            let Ok(meta) = fs::symlink_metadata(host) else {
                continue;
            };
            let inside = jail_path(&root, host);
            if meta.file_type().is_symlink() {
                assert_eq!(fs::read_link(&inside).unwrap(), fs::read_link(host).unwrap());
            } else {
                assert!(inside.is_dir(), "{}", inside.display());
            }
        }
        assert!(layout.bind_count() >= 1);
        // Nothing else from the host is planned into the jail.
        assert!(!root.join("etc/passwd").exists());
        assert!(!root.join("home").exists());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_foreign_interpreter_brings_its_prefix() {
        let root = scratch();
        let prefix = scratch();
        let bin = prefix.join("bin");
        fs::create_dir_all(&bin).unwrap();
        let interpreter = bin.join("interp");
        fs::write(&interpreter, "").unwrap();

        let layout = JailLayout::prepare(&root, &interpreter).unwrap();
        let canonical = fs::canonicalize(&prefix).unwrap();
        assert!(jail_path(&root, &canonical).is_dir());
        let expected = c_path(&canonical).unwrap();
        assert!(layout.binds.iter().any(|b| b.source == expected && b.read_only));

        let _ = fs::remove_dir_all(&root);
        let _ = fs::remove_dir_all(&prefix);
    }

    #[test]
    fn test_devices_stay_writable() {
        let root = scratch();
        let layout = JailLayout::prepare(&root, Path::new("/bin/sh")).unwrap();
        let null = c_path(Path::new("/dev/null")).unwrap();
        if let Some(bind) = layout.binds.iter().find(|b| b.source == null) {
            assert!(!bind.read_only);
            assert!(root.join("dev/null").is_file());
        }
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_missing_interpreter_is_an_error() {
        let root = scratch();
        assert!(JailLayout::prepare(&root, Path::new("/nonexistent/bin/interp")).is_err());
        let _ = fs::remove_dir_all(&root);
    }
}
