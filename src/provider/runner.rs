//! Process execution seam used by CLI-backed providers.

use std::ffi::OsString;
use std::process::{Command, Stdio};

use thiserror::Error;

/// Output captured from a local command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if any.
    pub code: Option<i32>,
    /// Captured standard output stream.
    pub stdout: String,
    /// Captured standard error stream.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the command exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Renders the exit status for diagnostics.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Errors raised when a command cannot be executed at all.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RunnerError {
    /// Raised when the process fails to start.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that could not be started.
        program: String,
        /// Operating system error message.
        message: String,
    },
}

/// Abstraction over command execution so providers can be tested without
/// spawning processes.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError>;
}

/// Real command runner that shells out to the host operating system.
///
/// Stdin is closed and `AWS_PAGER` is blanked so the aws CLI never blocks on
/// an interactive pager or prompt. On Unix each child leads its own process
/// group: a terminal Ctrl-C reaches the launcher only, and calls made during
/// cleanup are not killed alongside it.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        let mut command = Command::new(program);
        command.args(args).env("AWS_PAGER", "").stdin(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let output = command
            .output()
            .map_err(|err| RunnerError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_reports_spawn_error() {
        let err = ProcessCommandRunner
            .run("spotlaunch-definitely-not-installed", &[])
            .expect_err("program should not exist");
        assert!(matches!(err, RunnerError::Spawn { ref program, .. } if program.contains("spotlaunch")));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn child_runs_in_its_own_process_group() {
        let script = OsString::from(r#"echo "$$ $(cut -d' ' -f5 /proc/$$/stat)""#);
        let output = ProcessCommandRunner
            .run("sh", &[OsString::from("-c"), script])
            .expect("sh should run");
        assert!(output.is_success(), "stderr: {}", output.stderr);

        let fields: Vec<&str> = output.stdout.split_whitespace().collect();
        let [pid, group] = fields.as_slice() else {
            panic!("unexpected output: {:?}", output.stdout);
        };
        assert_eq!(pid, group, "child should lead its process group");
    }

    #[test]
    fn status_text_handles_signals() {
        let output = CommandOutput {
            code: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(output.status_text(), "unknown");
        assert!(!output.is_success());
    }
}
