//! External-process plumbing for the compiler front-end.
//!
//! `CommandSpec` is the program plus arguments for one invocation and
//! `CommandRunner` is the seam that executes it. `ProcessRunner` spawns a real
//! child with the source on stdin and captures stdout/stderr verbatim; tests
//! substitute a runner that counts invocations.

use std::ffi::OsString;
use std::io::{self, Write};
use std::process::{ChildStdin, Command, Output, Stdio};
use std::thread;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Shell-ish rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Exit status plus captured output of one invocation.
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            success: code == 0,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// True when the process died without an exit code (crash, signal).
    pub fn crashed(&self) -> bool {
        self.code.is_none()
    }

    /// Captured stdout followed by stderr, unmodified. Falls back to a status
    /// description when the process printed nothing.
    pub fn diagnostic(&self) -> String {
        let combined = format!("{}{}", self.stdout, self.stderr);
        if !combined.trim().is_empty() {
            return combined;
        }
        match self.code {
            Some(code) => format!("process exited with status {code} and no output"),
            None => "process terminated by signal with no output".to_string(),
        }
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Executes a command with `stdin` fed to the child and waits for it.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec, stdin: &[u8]) -> io::Result<CommandOutput>;
}

#[derive(Clone, Copy, Debug, Default)]
/// Runs commands as real child processes.
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, spec: &CommandSpec, stdin: &[u8]) -> io::Result<CommandOutput> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Stdin is fed from its own thread while this one drains stdout and
        // stderr; a chatty child would otherwise block both sides on full pipes.
        let pipe = child.stdin.take();
        let (written, output) = thread::scope(|scope| {
            let writer = scope.spawn(move || feed_stdin(pipe, stdin));
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stdin writer thread panicked")));
            (written, output)
        });

        let output = output?;
        written?;
        Ok(CommandOutput::from(output))
    }
}

/// Write `input` and close the pipe so the child sees EOF.
///
/// A child that exits before draining stdin closes the pipe; its status and
/// output still describe what went wrong, so a broken pipe is not an error.
fn feed_stdin(pipe: Option<ChildStdin>, input: &[u8]) -> io::Result<()> {
    let Some(mut pipe) = pipe else {
        return Ok(());
    };
    match pipe.write_all(input) {
        Err(err) if err.kind() != io::ErrorKind::BrokenPipe => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_keeps_output_verbatim() {
        let output = CommandOutput::exited(1, "", "<stdin>:1:12: error: expected ';'\n");
        assert_eq!(output.diagnostic(), "<stdin>:1:12: error: expected ';'\n");
        assert!(!output.success);
    }

    #[test]
    fn diagnostic_describes_silent_failures() {
        let output = CommandOutput::exited(4, "", "");
        assert!(output.diagnostic().contains("status 4"));
    }

    #[test]
    fn spec_display_joins_program_and_args() {
        let spec = CommandSpec::new("c++").args(["-fsyntax-only", "-x", "c++", "-"]);
        assert_eq!(spec.display(), "c++ -fsyntax-only -x c++ -");
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_feeds_stdin_and_captures_output() {
        let spec = CommandSpec::new("/bin/sh").args(["-c", "cat; echo oops >&2; exit 3"]);
        let output = ProcessRunner
            .run(&spec, b"int main() {}\n")
            .expect("sh runs");
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout, "int main() {}\n");
        assert_eq!(output.stderr, "oops\n");
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_survives_child_flooding_stderr_before_reading() {
        let input = vec![b'x'; 200_000];
        let spec = CommandSpec::new("/bin/sh")
            .args(["-c", "head -c 200000 /dev/zero >&2; wc -c"]);
        let output = ProcessRunner.run(&spec, &input).expect("sh runs");
        assert!(output.success, "{output:?}");
        assert_eq!(output.stderr.len(), 200_000);
        assert_eq!(output.stdout.trim(), "200000");
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_tolerates_child_ignoring_stdin() {
        let input = vec![b'x'; 200_000];
        let spec = CommandSpec::new("/bin/sh").args(["-c", "echo early; exit 2"]);
        let output = ProcessRunner.run(&spec, &input).expect("broken pipe is tolerated");
        assert_eq!(output.code, Some(2));
        assert_eq!(output.stdout, "early\n");
    }
}
