//! Child process spawning with captured output.

use indexmap::IndexMap;
use maestro_core::WorkflowError;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Everything needed to spawn one child process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Variables layered over the inherited process environment.
    pub env: IndexMap<String, String>,
    /// Text written to the child's stdin, which is closed afterwards.
    pub stdin: Option<String>,
}

impl CommandSpec {
    /// Runs `command` through `sh -c`.
    pub fn shell(command: impl Into<String>) -> Self {
        Self::with_shell("sh", command)
    }

    /// Runs `command` through `<shell> -c`.
    pub fn with_shell(shell: impl Into<String>, command: impl Into<String>) -> Self {
        CommandSpec {
            program: shell.into(),
            args: vec!["-c".to_string(), command.into()],
            ..Default::default()
        }
    }

    /// Splits `command` on whitespace and runs it without a shell.
    pub fn direct(command: &str) -> Self {
        let mut words = command.split_whitespace().map(str::to_string);
        CommandSpec {
            program: words.next().unwrap_or_default(),
            args: words.collect(),
            ..Default::default()
        }
    }

    /// Creates a spec for `program` with explicit arguments.
    pub fn program<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn envs(mut self, env: IndexMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Renders the command line for logs and error messages.
    pub fn display(&self) -> String {
        match self.args.as_slice() {
            [flag, command] if flag == "-c" => command.clone(),
            args if args.is_empty() => self.program.clone(),
            args => format!("{} {}", self.program, args.join(" ")),
        }
    }
}

/// The captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub command: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turns a non-zero exit into `CommandFailed`.
    pub fn check(self) -> Result<Self, WorkflowError> {
        if self.success() {
            Ok(self)
        } else {
            Err(WorkflowError::CommandFailed {
                command: self.command,
                exit_code: self.exit_code,
                stderr: self.stderr.trim_end().to_string(),
            })
        }
    }
}

/// Spawns the process, waits for it and captures its output.
///
/// A non-zero exit is not an error here; call [`CommandOutput::check`].
pub async fn run(spec: &CommandSpec) -> Result<CommandOutput, WorkflowError> {
    let command_line = spec.display();
    debug!(command = %command_line, cwd = ?spec.working_dir, "spawning process");

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(&spec.env)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        command.current_dir(dir);
    }

    let mut child = command.spawn()?;
    if let (Some(input), Some(mut pipe)) = (&spec.stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes()).await?;
        pipe.shutdown().await?;
    }
    let output = child.wait_with_output().await?;

    let result = CommandOutput {
        command: command_line,
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(command = %result.command, exit_code = ?result.exit_code, "process finished");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shell_captures_output_and_exit_code() {
        let output = run(&CommandSpec::shell("echo out; echo err >&2; exit 3"))
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(matches!(
            output.check(),
            Err(WorkflowError::CommandFailed {
                exit_code: Some(3),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_env_working_dir_and_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = IndexMap::new();
        env.insert("GREETING".to_string(), "hi".to_string());
        let spec = CommandSpec::shell("read line; echo \"$GREETING $line $(pwd)\"")
            .working_dir(dir.path())
            .envs(env)
            .stdin("there\n");

        let output = run(&spec).await.unwrap().check().unwrap();
        let expected_dir = dir.path().canonicalize().unwrap();
        assert_eq!(
            output.stdout.trim_end(),
            format!("hi there {}", expected_dir.display())
        );
    }

    #[tokio::test]
    async fn test_output_records_the_command_line() {
        let spec = CommandSpec::direct("sh -c false");
        let output = run(&spec).await.unwrap();
        assert_eq!(output.command, spec.display());

        match output.check() {
            Err(WorkflowError::CommandFailed { command, .. }) => {
                assert_eq!(command, "false")
            }
            other => unreachable!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_direct_splits_on_whitespace() {
        let spec = CommandSpec::direct("git  status --short");
        assert_eq!(spec.program, "git");
        assert_eq!(spec.args, vec!["status", "--short"]);
        assert_eq!(spec.display(), "git status --short");
    }

    #[tokio::test]
    async fn test_missing_program_is_an_io_error() {
        let result = run(&CommandSpec::direct("definitely-not-a-real-binary-42")).await;
        assert!(matches!(result, Err(WorkflowError::Io(_))));
    }
}
