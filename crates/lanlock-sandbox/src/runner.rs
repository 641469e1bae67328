//! Compile-and-run pipeline

use lanlock_api::{Language, RunReport, RunStatus, TestCase, TestCaseResult, TestRunReport};
use lanlock_config::SandboxSettings;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{SandboxError, SandboxResult, Workspace};

/// Cap on captured stdout/stderr per stream. Anything beyond this is cut;
/// a submission printing in a tight loop must not balloon the response.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// Sandboxed runner for student submissions
pub struct Sandbox {
    settings: SandboxSettings,
}

enum Compiled {
    Ok { compile_ms: u64 },
    Failed(RunReport),
}

impl Sandbox {
    pub fn new(settings: SandboxSettings) -> Self {
        Self { settings }
    }

    fn compiler_for(&self, language: Language) -> &str {
        match language {
            Language::C => &self.settings.cc_path,
            Language::Cpp => &self.settings.cxx_path,
        }
    }

    /// Compile the submission and run it once against `stdin`.
    pub async fn run(
        &self,
        language: Language,
        source: &str,
        stdin: &str,
    ) -> SandboxResult<RunReport> {
        let workspace = Workspace::create(self.settings.temp_dir.as_deref(), language, source)?;

        match self.compile(&workspace, language).await? {
            Compiled::Failed(report) => Ok(report),
            Compiled::Ok { compile_ms } => self.execute(&workspace, stdin, compile_ms).await,
        }
    }

    /// Compile once, then run the binary against each graded case. A case
    /// passes when the run succeeds and trimmed stdout matches the trimmed
    /// expectation.
    pub async fn run_tests(
        &self,
        language: Language,
        source: &str,
        cases: &[TestCase],
    ) -> SandboxResult<TestRunReport> {
        let workspace = Workspace::create(self.settings.temp_dir.as_deref(), language, source)?;

        let compile_ms = match self.compile(&workspace, language).await? {
            Compiled::Ok { compile_ms } => compile_ms,
            Compiled::Failed(report) => {
                // Every case fails the same way when nothing compiled
                let results = (0..cases.len())
                    .map(|case| TestCaseResult {
                        case,
                        passed: false,
                        stdout: report.stdout.clone(),
                        stderr: report.stderr.clone(),
                        status: report.status.clone(),
                    })
                    .collect();
                return Ok(TestRunReport {
                    passed: 0,
                    total: cases.len(),
                    all_passed: false,
                    results,
                });
            }
        };

        let mut results = Vec::with_capacity(cases.len());
        let mut passed = 0;
        for (case, test) in cases.iter().enumerate() {
            let report = self.execute(&workspace, &test.stdin, compile_ms).await?;
            let ok = report.status == RunStatus::Success
                && report.stdout.trim() == test.expected_stdout.trim();
            if ok {
                passed += 1;
            }
            results.push(TestCaseResult {
                case,
                passed: ok,
                stdout: report.stdout,
                stderr: report.stderr,
                status: report.status,
            });
        }

        Ok(TestRunReport {
            passed,
            total: cases.len(),
            all_passed: passed == cases.len(),
            results,
        })
    }

    async fn compile(&self, workspace: &Workspace, language: Language) -> SandboxResult<Compiled> {
        let compiler = self.compiler_for(language);
        let mut cmd = Command::new(compiler);
        cmd.arg("-O2")
            .arg(workspace.source_path())
            .arg("-o")
            .arg(workspace.binary_path());

        let outcome = run_captured(cmd, compiler, "", self.settings.compile_timeout).await?;
        match outcome {
            Captured::TimedOut { elapsed_ms } => {
                debug!(job_id = %workspace.job_id(), "Compilation timed out");
                // A compiler that ran out of time is still "didn't compile",
                // never conflated with the submission running too long
                Ok(Compiled::Failed(RunReport {
                    status: RunStatus::CompileFailed,
                    stdout: String::new(),
                    stderr: "compilation timed out".into(),
                    compile_ms: elapsed_ms,
                    exec_ms: 0,
                }))
            }
            Captured::Done {
                output,
                elapsed_ms,
            } => {
                if output.status.success() {
                    Ok(Compiled::Ok {
                        compile_ms: elapsed_ms,
                    })
                } else {
                    debug!(job_id = %workspace.job_id(), "Compilation failed");
                    Ok(Compiled::Failed(RunReport {
                        status: RunStatus::CompileFailed,
                        stdout: truncate(output.stdout),
                        stderr: truncate(output.stderr),
                        compile_ms: elapsed_ms,
                        exec_ms: 0,
                    }))
                }
            }
        }
    }

    async fn execute(
        &self,
        workspace: &Workspace,
        stdin: &str,
        compile_ms: u64,
    ) -> SandboxResult<RunReport> {
        let binary = workspace.binary_path().display().to_string();
        let mut cmd = Command::new(workspace.binary_path());
        cmd.current_dir(workspace.dir());

        let outcome = run_captured(cmd, &binary, stdin, self.settings.execution_timeout).await?;
        match outcome {
            Captured::TimedOut { elapsed_ms } => {
                debug!(job_id = %workspace.job_id(), "Execution timed out");
                Ok(RunReport {
                    status: RunStatus::TimedOut,
                    stdout: String::new(),
                    stderr: "execution timed out".into(),
                    compile_ms,
                    exec_ms: elapsed_ms,
                })
            }
            Captured::Done {
                output,
                elapsed_ms,
            } => {
                let status = if output.status.success() {
                    RunStatus::Success
                } else {
                    RunStatus::RuntimeFailure {
                        exit_code: output.status.code(),
                    }
                };
                Ok(RunReport {
                    status,
                    stdout: truncate(output.stdout),
                    stderr: truncate(output.stderr),
                    compile_ms,
                    exec_ms: elapsed_ms,
                })
            }
        }
    }
}

enum Captured {
    Done {
        output: std::process::Output,
        elapsed_ms: u64,
    },
    TimedOut {
        elapsed_ms: u64,
    },
}

/// Spawn a process in its own process group, feed it stdin, and collect its
/// output under a time limit. On timeout the whole group gets SIGKILL, so a
/// submission that forked cannot outlive its job.
async fn run_captured(
    mut cmd: Command,
    program: &str,
    stdin_data: &str,
    limit: Duration,
) -> SandboxResult<Captured> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // SAFETY: setsid is async-signal-safe and runs between fork and exec
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(|e| SandboxError::SpawnFailed {
        program: program.to_string(),
        message: e.to_string(),
    })?;
    // After setsid, pid == pgid
    let pgid = child.id();

    if let Some(mut pipe) = child.stdin.take() {
        if stdin_data.is_empty() {
            drop(pipe);
        } else {
            // Fed from the side: a submission that never reads must not
            // stall the deadline below once the pipe fills. The write errors
            // out when the killed child closes its end, and dropping the
            // pipe closes the child's stdin.
            let data = stdin_data.to_owned();
            tokio::spawn(async move {
                let _ = pipe.write_all(data.as_bytes()).await;
            });
        }
    }

    let started = Instant::now();
    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(Captured::Done {
            output,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }),
        Ok(Err(e)) => Err(SandboxError::Internal(e.to_string())),
        Err(_) => {
            if let Some(pgid) = pgid {
                kill_group(pgid);
            }
            Ok(Captured::TimedOut {
                elapsed_ms: started.elapsed().as_millis() as u64,
            })
        }
    }
}

fn kill_group(pid: u32) {
    let pgid = Pid::from_raw(-(pid as i32));
    match signal::kill(pgid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = %e, "Failed to kill process group"),
    }
}

fn truncate(bytes: Vec<u8>) -> String {
    let mut s = String::from_utf8_lossy(&bytes).into_owned();
    if s.len() > MAX_CAPTURE_BYTES {
        let mut cut = MAX_CAPTURE_BYTES;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("\n[output truncated]");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox(exec_timeout_ms: u64) -> Sandbox {
        // "cc" rather than "gcc": present on any box that can build this
        // workspace at all.
        Sandbox::new(SandboxSettings {
            cc_path: "cc".into(),
            cxx_path: "c++".into(),
            compile_timeout: Duration::from_secs(20),
            execution_timeout: Duration::from_millis(exec_timeout_ms),
            temp_dir: None,
        })
    }

    #[tokio::test]
    async fn echo_program_succeeds() {
        let source = r#"
            #include <stdio.h>
            int main(void) {
                int a, b;
                if (scanf("%d %d", &a, &b) == 2) printf("%d\n", a + b);
                return 0;
            }
        "#;

        let report = sandbox(5000)
            .run(Language::C, source, "20 22\n")
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.stdout.trim(), "42");
        assert!(report.succeeded());
    }

    #[tokio::test]
    async fn compile_error_reported_with_diagnostics() {
        let report = sandbox(5000)
            .run(Language::C, "int main(void) { return oops; }", "")
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::CompileFailed);
        assert!(!report.stderr.is_empty());
        assert_eq!(report.exec_ms, 0);
    }

    #[tokio::test]
    async fn infinite_loop_times_out() {
        let report = sandbox(300)
            .run(Language::C, "int main(void) { for(;;); }", "")
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::TimedOut);
        // The limit actually bounded the run
        assert!(report.exec_ms < 5000);
    }

    #[tokio::test]
    async fn ignored_stdin_cannot_stall_the_timeout() {
        // Far more than a pipe buffer, fed to a program that never reads it
        let stdin = "x".repeat(4 * 1024 * 1024);

        let report = tokio::time::timeout(
            Duration::from_secs(10),
            sandbox(300).run(Language::C, "int main(void) { for(;;); }", &stdin),
        )
        .await
        .expect("run finishes once the execution timeout fires")
        .unwrap();
        assert_eq!(report.status, RunStatus::TimedOut);
    }

    #[tokio::test]
    async fn compile_timeout_is_a_compile_failure() {
        let sandbox = Sandbox::new(SandboxSettings {
            cc_path: "cc".into(),
            cxx_path: "c++".into(),
            compile_timeout: Duration::from_millis(1),
            execution_timeout: Duration::from_secs(5),
            temp_dir: None,
        });

        let report = sandbox
            .run(Language::C, "int main(void) { return 0; }", "")
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::CompileFailed);
        assert!(report.stderr.contains("timed out"));
        assert_eq!(report.exec_ms, 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_runtime_failure() {
        let report = sandbox(5000)
            .run(Language::C, "int main(void) { return 3; }", "")
            .await
            .unwrap();
        assert_eq!(
            report.status,
            RunStatus::RuntimeFailure { exit_code: Some(3) }
        );
    }

    #[tokio::test]
    async fn graded_cases_counted_independently() {
        let source = r#"
            #include <stdio.h>
            int main(void) {
                int n;
                if (scanf("%d", &n) == 1) printf("%d\n", n * 2);
                return 0;
            }
        "#;
        let cases = vec![
            TestCase {
                stdin: "2\n".into(),
                expected_stdout: "4".into(),
            },
            TestCase {
                stdin: "10\n".into(),
                expected_stdout: "20".into(),
            },
            TestCase {
                stdin: "3\n".into(),
                expected_stdout: "7".into(), // wrong on purpose
            },
        ];

        let report = sandbox(5000)
            .run_tests(Language::C, source, &cases)
            .await
            .unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.passed, 2);
        assert!(!report.all_passed);
        assert!(report.results[0].passed);
        assert!(!report.results[2].passed);
    }

    #[tokio::test]
    async fn compile_failure_fails_every_case() {
        let cases = vec![
            TestCase {
                stdin: String::new(),
                expected_stdout: String::new(),
            },
            TestCase {
                stdin: String::new(),
                expected_stdout: String::new(),
            },
        ];

        let report = sandbox(5000)
            .run_tests(Language::C, "not c at all", &cases)
            .await
            .unwrap();
        assert_eq!(report.passed, 0);
        assert_eq!(report.total, 2);
        assert!(report
            .results
            .iter()
            .all(|r| r.status == RunStatus::CompileFailed));
    }

    #[tokio::test]
    async fn missing_compiler_is_a_server_error() {
        let sandbox = Sandbox::new(SandboxSettings {
            cc_path: "/nonexistent/compiler".into(),
            cxx_path: "/nonexistent/compiler++".into(),
            compile_timeout: Duration::from_secs(5),
            execution_timeout: Duration::from_secs(5),
            temp_dir: None,
        });

        let result = sandbox.run(Language::C, "int main(void){return 0;}", "").await;
        assert!(matches!(result, Err(SandboxError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn workspaces_cleaned_up_after_runs() {
        let base = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(SandboxSettings {
            cc_path: "cc".into(),
            cxx_path: "c++".into(),
            compile_timeout: Duration::from_secs(20),
            execution_timeout: Duration::from_millis(300),
            temp_dir: Some(base.path().to_path_buf()),
        });

        // One success, one compile failure, one timeout
        sandbox
            .run(Language::C, "int main(void){return 0;}", "")
            .await
            .unwrap();
        sandbox.run(Language::C, "int main(void){oops}", "").await.unwrap();
        sandbox
            .run(Language::C, "int main(void){for(;;);}", "")
            .await
            .unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(base.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }
}
