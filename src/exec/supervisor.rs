/// Guest process supervision
///
/// Spawns the hardened interpreter, feeds stdin from a writer thread, drains
/// stdout/stderr through bounded collectors and enforces the wall clock by
/// polling. On timeout the whole process group is killed and reaped, so the
/// caller is never blocked much beyond the configured limit. The spawned pid
/// is the PID-namespace relay; its death takes every guest process with it.
use crate::config::types::{GradeError, Result};
use crate::exec::preexec::{validate_plan, HardeningPlan};
use crate::kernel::signal::{kill_process_tree, sweep_process_group};
use crate::utils::output::{OutputCollector, OutputLimits, OutputResult};
use nix::unistd::Pid;
use std::io::Write;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How often the supervisor checks the child
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long collectors may keep draining after the child is gone
const COLLECTION_GRACE: Duration = Duration::from_millis(500);

/// One guest process launch
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    /// Full environment; the host environment is never inherited
    pub environment: Vec<(String, String)>,
    pub stdin: Vec<u8>,
    pub wall_timeout: Duration,
    pub output_limits: OutputLimits,
    pub hardening: HardeningPlan,
}

/// Raw process outcome, before any language-specific classification
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub term_signal: Option<i32>,
    pub timed_out: bool,
    pub wall_time: Duration,
    pub output: OutputResult,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Launch the guest and supervise it to completion or timeout.
pub fn launch(spec: LaunchSpec) -> Result<ProcessOutcome> {
    validate_plan(&spec.hardening)?;

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.workdir)
        .env_clear()
        .envs(spec.environment.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let plan = spec.hardening.clone();
    unsafe {
        cmd.pre_exec(move || plan.apply_in_child());
    }

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|e| {
        GradeError::Infrastructure(format!(
            "Failed to launch {}: {}",
            spec.program.display(),
            e
        ))
    })?;
    let pid = Pid::from_raw(child.id() as i32);
    log::debug!("Launched guest pid {} ({})", pid, spec.program.display());

    // A guest that never reads stdin must not stall the supervisor, so the
    // input is written from its own thread. EPIPE is expected then.
    let stdin_writer = child.stdin.take().map(|mut stdin| {
        let data = spec.stdin;
        thread::spawn(move || {
            let _ = stdin.write_all(&data);
        })
    });

    let pending = OutputCollector::new(spec.output_limits)
        .start(child.stdout.take(), child.stderr.take());

    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if started.elapsed() >= spec.wall_timeout {
                    timed_out = true;
                    let report = kill_process_tree(pid);
                    log::debug!("Wall timeout for pid {}: {:?}", pid, report);
                    match child.wait() {
                        Ok(status) => break status,
                        Err(e) => {
                            return Err(GradeError::Infrastructure(format!(
                                "Failed to reap timed-out guest {}: {}",
                                pid, e
                            )))
                        }
                    }
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                kill_process_tree(pid);
                let _ = child.wait();
                return Err(GradeError::Infrastructure(format!(
                    "Failed to wait for guest {}: {}",
                    pid, e
                )));
            }
        }
    };
    let wall_time = started.elapsed();

    // Descendants that outlived the leader would otherwise hold the pipes.
    if spec.hardening.new_session {
        sweep_process_group(pid);
    }

    let output = pending.finish(COLLECTION_GRACE);
    if let Some(writer) = stdin_writer {
        let _ = writer.join();
    }

    Ok(ProcessOutcome {
        exit_code: status.code(),
        term_signal: status.signal(),
        timed_out,
        wall_time,
        output,
    })
}
