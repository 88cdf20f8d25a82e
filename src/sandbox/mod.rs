//! Sandbox executor: one guest run in one fresh isolation context.
//!
//! `Sandbox::execute` creates the context, lets the language executor write
//! its harness, launches the interpreter under the pre-exec hardening plan,
//! and classifies the process outcome into output or an `ExecutionError`.
//! The context is dropped on every path out of `execute`.

pub mod context;
pub mod pool;

use crate::config::loader::EngineConfig;
use crate::config::types::{ExecutionError, ExecutionLimits, GradeError, Language, ResourceLimit};
use crate::exec::preexec::{Credentials, HardeningPlan, RlimitSet};
use crate::exec::supervisor::{self, LaunchSpec, ProcessOutcome};
use crate::judge::adapter::{runtime_error_message, GuestRun, LanguageExecutor};
use crate::judge::registry::ExecutorRegistry;
use crate::kernel::mount::JailLayout;
use crate::utils::output::{OutputIntegrity, OutputLimits};
use context::{IsolationContext, ScopeRequest};
use std::path::PathBuf;
use std::time::Duration;

/// RLIMIT_NPROC for a root-launched guest. Counts every process and thread
/// of the sandbox uid, so it has to cover all concurrent contexts.
const SANDBOX_NPROC: u64 = 256;

/// Runs one piece of code once. The seam the test case runner depends on.
pub trait CodeExecutor: Send + Sync {
    fn execute(
        &self,
        code: &str,
        language: Language,
        input: &str,
        limits: &ExecutionLimits,
    ) -> std::result::Result<String, ExecutionError>;

    /// Languages this executor can run
    fn available_languages(&self) -> Vec<Language>;
}

/// Process-isolated sandbox backed by the executor registry
pub struct Sandbox {
    registry: ExecutorRegistry,
    workspace_root: PathBuf,
    cgroup_parent: Option<PathBuf>,
    strict_mode: bool,
    isolate_network: bool,
    isolate_filesystem: bool,
    output_limits: OutputLimits,
    identity: Credentials,
}

impl Sandbox {
    /// Sandbox with the default presets plus any interpreter overrides
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_registry(
            config,
            ExecutorRegistry::from_presets(&config.language_presets()),
        )
    }

    pub fn with_registry(config: &EngineConfig, registry: ExecutorRegistry) -> Self {
        Sandbox {
            registry,
            workspace_root: config.workspace_root.clone(),
            cgroup_parent: config.cgroup_parent.clone(),
            strict_mode: config.strict_mode,
            isolate_network: config.isolate_network,
            isolate_filesystem: config.isolate_filesystem,
            output_limits: OutputLimits {
                stdout_limit: config.output_limit_bytes,
                stderr_limit: config.stderr_limit_bytes,
            },
            identity: Credentials {
                uid: config.sandbox_uid,
                gid: config.sandbox_gid,
            },
        }
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    fn run_in_context(
        &self,
        executor: &dyn LanguageExecutor,
        code: &str,
        input: &str,
        limits: &ExecutionLimits,
    ) -> std::result::Result<String, ExecutionError> {
        let scope = self.cgroup_parent.as_deref().map(|parent| ScopeRequest {
            parent,
            memory_limit_bytes: limits.memory_limit_bytes(),
        });
        let context = IsolationContext::create(&self.workspace_root, scope, self.strict_mode)
            .map_err(infrastructure)?;

        let run = GuestRun {
            code,
            limits: *limits,
            output_limit_bytes: self.output_limits.stdout_limit,
        };
        let plan = executor.prepare(&context, &run).map_err(infrastructure)?;

        let rlimits = RlimitSet {
            address_space: plan.address_space_bytes,
            data_segment: plan.data_segment_bytes,
            cpu_seconds: RlimitSet::cpu_seconds_for(limits.timeout_ms),
            file_size: self.output_limits.stdout_limit as u64,
            open_files: executor.preset().fd_limit,
            processes: Some(SANDBOX_NPROC),
        };
        let mut hardening = HardeningPlan::for_host(
            self.strict_mode,
            self.isolate_network,
            rlimits,
            self.identity,
            context.cgroup().map(|scope| scope.procs_path().clone()),
        );
        if self.isolate_filesystem {
            let jail = JailLayout::prepare(context.root(), &plan.program).map_err(infrastructure)?;
            hardening = hardening.with_jail(jail);
        }

        let outcome = supervisor::launch(LaunchSpec {
            program: plan.program,
            args: plan.args,
            workdir: context.root().to_path_buf(),
            environment: plan.environment,
            stdin: input.as_bytes().to_vec(),
            wall_timeout: Duration::from_millis(limits.timeout_ms),
            output_limits: self.output_limits,
            hardening,
        })
        .map_err(infrastructure)?;

        log::debug!(
            "context {} ({}, preset {}) finished in {} ms exit={:?} signal={:?} peak={:?}",
            context.id(),
            executor.language(),
            executor.preset().id,
            outcome.wall_time.as_millis(),
            outcome.exit_code,
            outcome.term_signal,
            context.cgroup().and_then(|scope| scope.memory_peak())
        );

        classify(executor, &outcome, context.oom_killed())
    }
}

impl CodeExecutor for Sandbox {
    fn execute(
        &self,
        code: &str,
        language: Language,
        input: &str,
        limits: &ExecutionLimits,
    ) -> std::result::Result<String, ExecutionError> {
        let executor = self.registry.get(language)?;
        self.run_in_context(executor, code, input, limits)
    }

    fn available_languages(&self) -> Vec<Language> {
        self.registry.available()
    }
}

fn infrastructure(err: GradeError) -> ExecutionError {
    match err {
        GradeError::LanguageUnavailable(language) => ExecutionError::LanguageUnavailable(language),
        GradeError::Infrastructure(message) => ExecutionError::Infrastructure(message),
        other => ExecutionError::Infrastructure(other.to_string()),
    }
}

/// Map a finished process to guest output or a failure kind.
///
/// Resource violations win over whatever the guest printed, since a killed
/// guest's last words are not trustworthy.
pub fn classify(
    executor: &dyn LanguageExecutor,
    outcome: &ProcessOutcome,
    oom_killed: bool,
) -> std::result::Result<String, ExecutionError> {
    use ExecutionError::{Infrastructure, ResourceLimitExceeded, Runtime};

    if outcome.timed_out {
        return Err(ResourceLimitExceeded(ResourceLimit::WallTime));
    }
    if outcome.term_signal == Some(libc::SIGXCPU) {
        return Err(ResourceLimitExceeded(ResourceLimit::CpuTime));
    }

    let stderr = outcome.output.stderr.text();
    if oom_killed || executor.memory_exhausted(outcome.exit_code, &stderr) {
        return Err(ResourceLimitExceeded(ResourceLimit::Memory));
    }

    match outcome.output.stdout.integrity {
        OutputIntegrity::TruncatedByJudgeLimit => {
            return Err(ResourceLimitExceeded(ResourceLimit::Output))
        }
        // Something the guest started still holds the pipe: the guest's
        // doing, so it fails this case only.
        OutputIntegrity::CollectionTimeout => {
            return Err(Runtime(
                "output stream still held open after the guest exited".to_string(),
            ))
        }
        OutputIntegrity::ReadError => {
            return Err(Infrastructure(format!(
                "guest stdout not collected: {}",
                outcome.output.stdout.integrity
            )))
        }
        OutputIntegrity::Complete => {}
    }

    if outcome.exit_code == Some(0) {
        return Ok(outcome.output.stdout.text());
    }
    if let Some(message) = runtime_error_message(&stderr) {
        return Err(Runtime(message));
    }
    match (outcome.exit_code, outcome.term_signal) {
        (_, Some(signal)) => Err(Runtime(format!("terminated by {}", signal_name(signal)))),
        (Some(code), None) => Err(Runtime(format!("exited with status {code}"))),
        (None, None) => Err(Runtime("exited abnormally".to_string())),
    }
}

fn signal_name(signal: i32) -> String {
    nix::sys::signal::Signal::try_from(signal)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("signal {signal}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::presets::LanguagePresets;
    use crate::judge::languages::python::PythonExecutor;
    use crate::utils::output::{OutputResult, StreamOutput};

    fn python() -> PythonExecutor {
        PythonExecutor::new(
            LanguagePresets::new()
                .get(Language::Python)
                .unwrap()
                .clone(),
        )
    }

    fn outcome(exit_code: Option<i32>, signal: Option<i32>, stdout: &str, stderr: &str) -> ProcessOutcome {
        ProcessOutcome {
            exit_code,
            term_signal: signal,
            timed_out: false,
            wall_time: Duration::from_millis(10),
            output: OutputResult {
                stdout: StreamOutput {
                    data: stdout.as_bytes().to_vec(),
                    integrity: OutputIntegrity::Complete,
                },
                stderr: StreamOutput {
                    data: stderr.as_bytes().to_vec(),
                    integrity: OutputIntegrity::Complete,
                },
            },
        }
    }

    #[test]
    fn test_clean_exit_returns_stdout() {
        let result = classify(&python(), &outcome(Some(0), None, "42\n", ""), false);
        assert_eq!(result, Ok("42\n".to_string()));
    }

    #[test]
    fn test_timeout_beats_everything() {
        let mut raw = outcome(None, Some(libc::SIGKILL), "partial", "");
        raw.timed_out = true;
        assert_eq!(
            classify(&python(), &raw, true),
            Err(ExecutionError::ResourceLimitExceeded(ResourceLimit::WallTime))
        );
    }

    #[test]
    fn test_cpu_and_memory_limits() {
        assert_eq!(
            classify(&python(), &outcome(None, Some(libc::SIGXCPU), "", ""), false),
            Err(ExecutionError::ResourceLimitExceeded(ResourceLimit::CpuTime))
        );
        assert_eq!(
            classify(&python(), &outcome(Some(3), None, "", ""), false),
            Err(ExecutionError::ResourceLimitExceeded(ResourceLimit::Memory))
        );
        assert_eq!(
            classify(&python(), &outcome(None, Some(libc::SIGKILL), "", ""), true),
            Err(ExecutionError::ResourceLimitExceeded(ResourceLimit::Memory))
        );
    }

    #[test]
    fn test_truncated_output_is_output_limit() {
        let mut raw = outcome(Some(1), None, "xxxx", "");
        raw.output.stdout.integrity = OutputIntegrity::TruncatedByJudgeLimit;
        assert_eq!(
            classify(&python(), &raw, false),
            Err(ExecutionError::ResourceLimitExceeded(ResourceLimit::Output))
        );
    }

    #[test]
    fn test_held_output_pipe_fails_only_the_case() {
        let mut raw = outcome(Some(0), None, "", "");
        raw.output.stdout.integrity = OutputIntegrity::CollectionTimeout;
        let result = classify(&python(), &raw, false);
        assert!(matches!(result, Err(ExecutionError::Runtime(_))), "{result:?}");
        assert!(!result.unwrap_err().is_fatal());

        raw.output.stdout.integrity = OutputIntegrity::ReadError;
        assert!(matches!(
            classify(&python(), &raw, false),
            Err(ExecutionError::Infrastructure(_))
        ));
    }

    #[test]
    fn test_runtime_error_uses_marker_only() {
        let stderr = "Traceback (most recent call last):\n  File \"solution.py\"\n\
                      __GRADEBOX_ERROR__:ValueError: bad input\n";
        assert_eq!(
            classify(&python(), &outcome(Some(1), None, "", stderr), false),
            Err(ExecutionError::Runtime("ValueError: bad input".to_string()))
        );
        assert_eq!(
            classify(&python(), &outcome(None, Some(libc::SIGSEGV), "", ""), false),
            Err(ExecutionError::Runtime("terminated by SIGSEGV".to_string()))
        );
    }

    #[test]
    fn test_unavailable_language_never_launches() {
        let config = EngineConfig::default();
        let sandbox = Sandbox::with_registry(&config, ExecutorRegistry::empty());
        assert_eq!(
            sandbox.execute("int main(){}", Language::Cpp, "", &ExecutionLimits::default()),
            Err(ExecutionError::LanguageUnavailable(Language::Cpp))
        );
        assert!(sandbox.available_languages().is_empty());
    }
}
