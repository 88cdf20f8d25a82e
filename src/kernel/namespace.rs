/// Namespace isolation for guest runs
///
/// Every run gets private network, IPC, PID and mount namespaces. The PID
/// namespace is what keeps descendants contained: a guest that forks,
/// calls setsid() and forks again is still inside it, and the kernel kills
/// every member when the namespace's PID 1 exits.
///
/// The functions named `*_in_child` run between fork and exec. They only
/// make raw syscalls over data prepared in the parent.
use std::io;

/// Which namespaces a run unshares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NamespaceSet {
    pub network: bool,
    pub ipc: bool,
    pub pid: bool,
    pub mount: bool,
    /// Needed by an unprivileged engine to unshare anything else
    pub user: bool,
}

impl NamespaceSet {
    pub fn clone_flags(&self) -> libc::c_int {
        let mut flags = 0;
        if self.network {
            flags |= libc::CLONE_NEWNET;
        }
        if self.ipc {
            flags |= libc::CLONE_NEWIPC;
        }
        if self.pid {
            flags |= libc::CLONE_NEWPID;
        }
        if self.mount {
            flags |= libc::CLONE_NEWNS;
        }
        if self.user {
            flags |= libc::CLONE_NEWUSER;
        }
        flags
    }

    pub fn is_empty(&self) -> bool {
        self.clone_flags() == 0
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.network {
            names.push("net");
        }
        if self.ipc {
            names.push("ipc");
        }
        if self.pid {
            names.push("pid");
        }
        if self.mount {
            names.push("mnt");
        }
        if self.user {
            names.push("user");
        }
        names
    }

    pub fn unshare_in_child(&self) -> io::Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        if unsafe { libc::unshare(self.clone_flags()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Check if namespace isolation is supported on this system
pub fn is_supported() -> bool {
    std::fs::read_dir("/proc/self/ns").is_ok()
}

/// uid/gid maps for a user namespace: the engine's own ids map onto
/// themselves, so the guest keeps a non-root uid and loses every
/// capability at exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdMapping {
    uid_map: String,
    gid_map: String,
}

impl IdMapping {
    pub fn for_current_user() -> Self {
        let uid = nix::unistd::geteuid().as_raw();
        let gid = nix::unistd::getegid().as_raw();
        IdMapping {
            uid_map: format!("{uid} {uid} 1\n"),
            gid_map: format!("{gid} {gid} 1\n"),
        }
    }

    pub fn write_in_child(&self) -> io::Result<()> {
        // gid_map is refused until setgroups is denied.
        write_proc_file(b"/proc/self/setgroups\0", b"deny")?;
        write_proc_file(b"/proc/self/uid_map\0", self.uid_map.as_bytes())?;
        write_proc_file(b"/proc/self/gid_map\0", self.gid_map.as_bytes())
    }
}

fn write_proc_file(path: &[u8], contents: &[u8]) -> io::Result<()> {
    let fd = unsafe { libc::open(path.as_ptr().cast(), libc::O_WRONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let written = unsafe { libc::write(fd, contents.as_ptr().cast(), contents.len()) };
    let err = io::Error::last_os_error();
    unsafe { libc::close(fd) };
    if written == contents.len() as isize {
        Ok(())
    } else {
        Err(err)
    }
}

/// Fork into the PID namespace created by the preceding unshare.
///
/// Returns only in the child, which is PID 1 of the new namespace and goes
/// on to exec the interpreter. The calling process stays outside as a relay:
/// it drops its descriptors, waits for the child and exits the same way,
/// so the supervisor sees the guest's status on the pid it spawned.
pub fn enter_pid_namespace_in_child(cpu_limit_seconds: u64) -> io::Result<()> {
    let child = unsafe { libc::fork() };
    if child < 0 {
        return Err(io::Error::last_os_error());
    }
    if child > 0 {
        relay_exit(child, cpu_limit_seconds);
    }
    // PDEATHSIG does not survive fork; the relay is the new parent.
    if unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL as libc::c_ulong, 0, 0, 0) } != 0
    {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn relay_exit(child: libc::pid_t, cpu_limit_seconds: u64) -> ! {
    close_all_descriptors();

    let mut status: libc::c_int = 0;
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    loop {
        let rc = unsafe { libc::wait4(child, &mut status, 0, &mut usage) };
        if rc == child {
            break;
        }
        if rc < 0 && io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
            unsafe { libc::_exit(127) };
        }
    }

    if libc::WIFEXITED(status) {
        unsafe { libc::_exit(libc::WEXITSTATUS(status)) };
    }

    let mut signal = libc::WTERMSIG(status);
    // A namespace init ignores SIGXCPU, so the CPU limit lands as the
    // hard limit's SIGKILL. Report it as the CPU signal it stands for.
    let cpu_used = (usage.ru_utime.tv_sec + usage.ru_stime.tv_sec).max(0) as u64;
    if signal == libc::SIGKILL && cpu_used >= cpu_limit_seconds {
        signal = libc::SIGXCPU;
    }
    unsafe {
        libc::signal(signal, libc::SIG_DFL);
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, signal);
        libc::sigprocmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut());
        libc::kill(libc::getpid(), signal);
        libc::_exit(128 + signal)
    }
}

/// The relay must not keep the guest's pipes (or the spawn status pipe)
/// open on its own.
fn close_all_descriptors() {
    let rc = unsafe {
        libc::syscall(
            libc::SYS_close_range,
            0 as libc::c_uint,
            libc::c_uint::MAX,
            0 as libc::c_uint,
        )
    };
    if rc != 0 {
        let mut limit: libc::rlimit = unsafe { std::mem::zeroed() };
        let max = if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } == 0 {
            limit.rlim_cur.min(65536) as libc::c_int
        } else {
            1024
        };
        for fd in 0..max {
            unsafe { libc::close(fd) };
        }
    }
}
