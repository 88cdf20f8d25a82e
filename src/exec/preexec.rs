/// Pre-exec hardening for guest interpreters
///
/// The sequence runs in the forked child between fork and exec and is fixed:
/// 1. setsid() so the guest owns a killable process group
/// 2. prctl(PR_SET_PDEATHSIG, SIGKILL)
/// 3. join the run's cgroup scope (write "0" to cgroup.procs)
/// 4. unshare network, IPC, PID and mount namespaces (plus a user namespace
///    and its id maps when not root)
/// 5. rlimits: address space or data segment, cpu, file size, core,
///    open files, processes
/// 6. fork into the PID namespace; the spawned process stays behind as the
///    exit-status relay and the guest continues as its PID 1
/// 7. enter the filesystem jail (pivot_root into the context directory)
/// 8. setgroups/setgid/setuid when dropping from root
/// 9. prctl(PR_SET_NO_NEW_PRIVS, 1)
///
/// Everything the child needs is computed in the parent. The child only makes
/// raw syscalls: no allocation, no locks, no logging.
use crate::config::types::{GradeError, Result};
use crate::kernel::mount::JailLayout;
use crate::kernel::namespace::{self, IdMapping, NamespaceSet};
use std::ffi::CString;
use std::io;

/// rlimits applied to the guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlimitSet {
    /// RLIMIT_AS in bytes (None for runtimes that reserve large virtual ranges)
    pub address_space: Option<u64>,
    /// RLIMIT_DATA in bytes: committed writable memory, for those runtimes
    pub data_segment: Option<u64>,
    /// RLIMIT_CPU in seconds
    pub cpu_seconds: u64,
    /// RLIMIT_FSIZE in bytes
    pub file_size: u64,
    /// RLIMIT_NOFILE
    pub open_files: u64,
    /// RLIMIT_NPROC; only meaningful for a dedicated sandbox uid
    pub processes: Option<u64>,
}

impl RlimitSet {
    /// CPU backstop: wall timeout rounded up to whole seconds, plus one.
    pub fn cpu_seconds_for(timeout_ms: u64) -> u64 {
        timeout_ms.div_ceil(1000) + 1
    }
}

/// Identity drop for root-launched engines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

/// Everything the child applies before exec
#[derive(Debug, Clone)]
pub struct HardeningPlan {
    pub strict_mode: bool,
    pub new_session: bool,
    pub namespaces: NamespaceSet,
    /// Written right after unsharing a user namespace
    pub id_mapping: Option<IdMapping>,
    /// Filesystem view; requires `namespaces.mount`
    pub jail: Option<JailLayout>,
    pub cgroup_procs: Option<CString>,
    pub rlimits: RlimitSet,
    pub credentials: Option<Credentials>,
}

impl HardeningPlan {
    /// Plan for the current host identity. Root engines drop to `credentials`
    /// and skip the user namespace; unprivileged engines keep their uid and
    /// need a user namespace to unshare anything.
    ///
    /// Every plan gets a PID namespace so no descendant outlives the run.
    pub fn for_host(
        strict_mode: bool,
        isolate_network: bool,
        rlimits: RlimitSet,
        sandbox_identity: Credentials,
        cgroup_procs: Option<CString>,
    ) -> Self {
        let is_root = nix::unistd::geteuid().is_root();
        let mut rlimits = rlimits;
        if !is_root {
            // RLIMIT_NPROC counts every process of the uid, the engine's
            // included; only set it for a dedicated sandbox identity.
            rlimits.processes = None;
        }
        HardeningPlan {
            strict_mode,
            new_session: true,
            namespaces: NamespaceSet {
                network: isolate_network,
                ipc: isolate_network,
                pid: true,
                mount: false,
                user: !is_root,
            },
            id_mapping: (!is_root).then(IdMapping::for_current_user),
            jail: None,
            cgroup_procs,
            rlimits,
            credentials: is_root.then_some(sandbox_identity),
        }
    }

    /// Confine the guest's filesystem view to `jail`.
    pub fn with_jail(mut self, jail: JailLayout) -> Self {
        self.namespaces.mount = true;
        self.jail = Some(jail);
        self
    }

    /// Run the fixed sequence. Called from `CommandExt::pre_exec`.
    ///
    /// Failures of mandatory steps abort the spawn. Best-effort steps abort
    /// only in strict mode. The memory ceiling is always mandatory.
    pub fn apply_in_child(&self) -> io::Result<()> {
        if self.new_session && unsafe { libc::setsid() } < 0 {
            return Err(io::Error::last_os_error());
        }

        if unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL as libc::c_ulong, 0, 0, 0) }
            != 0
        {
            return Err(io::Error::last_os_error());
        }

        if let Some(procs) = &self.cgroup_procs {
            self.best_effort(join_cgroup(procs))?;
        }

        let isolated = match self.namespaces.unshare_in_child() {
            Ok(()) => !self.namespaces.is_empty(),
            Err(e) => {
                self.best_effort(Err(e))?;
                false
            }
        };
        if isolated && self.namespaces.user {
            if let Some(mapping) = &self.id_mapping {
                self.best_effort(mapping.write_in_child())?;
            }
        }

        let limits = &self.rlimits;
        if let Some(bytes) = limits.address_space {
            set_rlimit(libc::RLIMIT_AS, bytes)?;
        }
        if let Some(bytes) = limits.data_segment {
            set_rlimit(libc::RLIMIT_DATA, bytes)?;
        }
        // The soft limit delivers SIGXCPU, the hard limit SIGKILL one second on.
        self.best_effort(set_rlimit_pair(
            libc::RLIMIT_CPU,
            limits.cpu_seconds,
            limits.cpu_seconds + 1,
        ))?;
        self.best_effort(set_rlimit(libc::RLIMIT_FSIZE, limits.file_size))?;
        self.best_effort(set_rlimit(libc::RLIMIT_CORE, 0))?;
        self.best_effort(set_rlimit(libc::RLIMIT_NOFILE, limits.open_files))?;
        if let Some(processes) = limits.processes {
            self.best_effort(set_rlimit(libc::RLIMIT_NPROC, processes))?;
        }

        // Past this point only the namespace's PID 1 returns.
        if isolated && self.namespaces.pid {
            namespace::enter_pid_namespace_in_child(limits.cpu_seconds)?;
        }

        if isolated && self.namespaces.mount {
            if let Some(jail) = &self.jail {
                self.best_effort(jail.enter_in_child())?;
            }
        }

        // Identity drop is mandatory once requested: continuing as root
        // would hand the guest the host.
        if let Some(creds) = self.credentials {
            check(unsafe { libc::setgroups(0, std::ptr::null()) })?;
            check(unsafe { libc::setresgid(creds.gid, creds.gid, creds.gid) })?;
            check(unsafe { libc::setresuid(creds.uid, creds.uid, creds.uid) })?;
        }

        check(unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) })?;
        Ok(())
    }

    fn best_effort(&self, result: io::Result<()>) -> io::Result<()> {
        match result {
            Err(e) if self.strict_mode => Err(e),
            _ => Ok(()),
        }
    }
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn set_rlimit(resource: libc::__rlimit_resource_t, value: u64) -> io::Result<()> {
    set_rlimit_pair(resource, value, value)
}

fn set_rlimit_pair(resource: libc::__rlimit_resource_t, soft: u64, hard: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    check(unsafe { libc::setrlimit(resource, &limit) })
}

fn join_cgroup(procs: &CString) -> io::Result<()> {
    let fd = unsafe { libc::open(procs.as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // "0" means the writing process.
    let written = unsafe { libc::write(fd, b"0".as_ptr().cast(), 1) };
    let err = io::Error::last_os_error();
    unsafe { libc::close(fd) };
    if written == 1 {
        Ok(())
    } else {
        Err(err)
    }
}

/// Parent-side check that a plan can be honored at all.
pub fn validate_plan(plan: &HardeningPlan) -> Result<()> {
    if let Some(creds) = plan.credentials {
        if creds.uid == 0 || creds.gid == 0 {
            return Err(GradeError::Config(
                "refusing to run guest code as root".to_string(),
            ));
        }
    }
    if plan.rlimits.address_space.is_none()
        && plan.rlimits.data_segment.is_none()
        && plan.cgroup_procs.is_none()
    {
        return Err(GradeError::Infrastructure(
            "no memory ceiling can be enforced for this run".to_string(),
        ));
    }
    if plan.jail.is_some() && !plan.namespaces.mount {
        return Err(GradeError::Config(
            "a filesystem jail needs a mount namespace".to_string(),
        ));
    }
    if plan.rlimits.open_files < 3 {
        return Err(GradeError::Config(
            "open file limit must leave room for stdio".to_string(),
        ));
    }
    Ok(())
}
