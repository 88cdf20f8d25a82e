/// Process-tree termination for sandboxed runs
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::{getpgid, Pid};

/// What a kill attempt actually did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KillReport {
    /// Signal went to the whole process group
    pub group_kill: bool,
    /// Target was already gone
    pub already_exited: bool,
}

/// SIGKILL the guest's process group.
///
/// The guest calls setsid() before exec, so its pid is its pgid. If that did
/// not happen (permissive mode) the group would be ours; fall back to killing
/// the single pid.
pub fn kill_process_tree(pid: Pid) -> KillReport {
    let mut report = KillReport::default();

    match getpgid(Some(pid)) {
        Ok(pgid) if pgid == pid => match killpg(pgid, Signal::SIGKILL) {
            Ok(()) => report.group_kill = true,
            Err(Errno::ESRCH) => report.already_exited = true,
            Err(e) => {
                log::warn!("killpg({}) failed: {}; falling back to kill", pgid, e);
                report.already_exited = kill(pid, Signal::SIGKILL) == Err(Errno::ESRCH);
            }
        },
        Ok(_) => {
            report.already_exited = kill(pid, Signal::SIGKILL) == Err(Errno::ESRCH);
        }
        Err(_) => report.already_exited = true,
    }

    report
}

/// Sweep any descendants left in a group after the group leader exited.
/// Errors are ignored: an empty group is the expected case.
pub fn sweep_process_group(pgid: Pid) {
    let _ = killpg(pgid, Signal::SIGKILL);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    #[test]
    fn test_kill_process_tree_kills_own_group() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        let Ok(mut child) = cmd.spawn() else {
            eprintln!("sleep not available; skipping");
            return;
        };

        let pid = Pid::from_raw(child.id() as i32);
        // setsid runs before exec; wait until it is visible from here.
        for _ in 0..100 {
            if getpgid(Some(pid)) == Ok(pid) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let report = kill_process_tree(pid);
        assert!(report.group_kill);
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_kill_reaped_pid_reports_exited() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        child.wait().unwrap();
        assert!(kill_process_tree(pid).already_exited);
    }
}
