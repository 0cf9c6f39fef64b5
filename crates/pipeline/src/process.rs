//! Spawning and reaping helper pipelines.

use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::os::fd::{AsFd, BorrowedFd};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};

use tracing::{debug, warn};

use crate::ShellSafePath;

/// Shell used for [`Stage::shell`].
const SHELL: &str = "/bin/sh";

/// Errors raised while starting a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The builder had no stages.
    #[error("pipeline has no stages")]
    Empty,
    /// A stage could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program of the failing stage.
        program: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Waiting for or reading from a stage failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A command line for `/bin/sh -c`, built only from literals and validated
/// paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellCommand {
    text: String,
}

impl ShellCommand {
    /// Starts the command with a fixed literal.
    pub fn new(literal: &'static str) -> Self {
        Self {
            text: literal.to_owned(),
        }
    }

    /// Appends another fixed literal.
    pub fn literal(mut self, literal: &'static str) -> Self {
        self.text.push_str(literal);
        self
    }

    /// Appends a validated path. Callers quote it with surrounding `"`
    /// literals.
    pub fn path(mut self, path: &ShellSafePath) -> Self {
        self.text.push_str(path.as_str());
        self
    }

    /// The assembled command line.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// One program in a pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Direct exec with a literal argument vector.
    Exec {
        /// Program name or path.
        program: OsString,
        /// Arguments, excluding the program name.
        args: Vec<OsString>,
    },
    /// Command line interpreted by `/bin/sh -c`.
    Shell(ShellCommand),
}

impl Stage {
    /// A stage that execs `program` with `args`.
    pub fn exec<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<OsString>,
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self::Exec {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// A stage that runs `command` through the shell.
    pub fn shell(command: ShellCommand) -> Self {
        Self::Shell(command)
    }

    fn program(&self) -> String {
        match self {
            Self::Exec { program, .. } => program.to_string_lossy().into_owned(),
            Self::Shell(_) => SHELL.to_owned(),
        }
    }

    fn command(&self) -> Command {
        match self {
            Self::Exec { program, args } => {
                let mut command = Command::new(program);
                command.args(args);
                command
            }
            Self::Shell(line) => {
                let mut command = Command::new(SHELL);
                command.arg("-c").arg(line.as_str());
                command
            }
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exec { program, args } => {
                write!(f, "{}", program.to_string_lossy())?;
                for arg in args {
                    write!(f, " {}", arg.to_string_lossy())?;
                }
                Ok(())
            }
            Self::Shell(line) => write!(f, "{SHELL} -c '{}'", line.as_str()),
        }
    }
}

/// Collects stages and spawns them as one pipeline.
#[derive(Clone, Debug, Default)]
pub struct PipelineBuilder {
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage whose stdin is the previous stage's stdout.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Spawns every stage.
    ///
    /// The first stage reads from `/dev/null`; stderr of every stage is
    /// discarded. If a later stage fails to start, the stages already running
    /// are killed and reaped before the error is returned.
    pub fn spawn(self) -> Result<Pipeline, PipelineError> {
        if self.stages.is_empty() {
            return Err(PipelineError::Empty);
        }
        let description = self
            .stages
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" | ");
        let mut pipeline = Pipeline {
            stdout: None,
            children: Vec::with_capacity(self.stages.len()),
            description,
        };

        let mut upstream: Option<ChildStdout> = None;
        for stage in &self.stages {
            let mut command = stage.command();
            command
                .stdin(upstream.take().map_or_else(Stdio::null, Stdio::from))
                .stdout(Stdio::piped())
                .stderr(Stdio::null());
            let mut child = command.spawn().map_err(|source| PipelineError::Spawn {
                program: stage.program(),
                source,
            })?;
            upstream = child.stdout.take();
            pipeline.children.push(child);
        }
        pipeline.stdout = upstream;

        debug!(pipeline = %pipeline.description, pids = ?pipeline.pids(), "spawned helper pipeline");
        Ok(pipeline)
    }
}

/// Running helper processes plus the read end of the last stage's stdout.
#[derive(Debug)]
pub struct Pipeline {
    stdout: Option<ChildStdout>,
    children: Vec<Child>,
    description: String,
}

impl Pipeline {
    /// Human-readable form of the stages, joined with `|`.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Process ids of all stages in order.
    pub fn pids(&self) -> Vec<u32> {
        self.children.iter().map(Child::id).collect()
    }

    /// Read end of the final stage's stdout, until the pipeline finishes.
    pub fn source_fd(&self) -> Option<BorrowedFd<'_>> {
        self.stdout.as_ref().map(AsFd::as_fd)
    }

    /// Switches reads between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match &self.stdout {
            Some(stdout) => platform::fd::set_nonblocking(stdout.as_fd(), nonblocking),
            None => Ok(()),
        }
    }

    /// Closes the stream and waits for every stage, returning their statuses
    /// in stage order.
    pub fn finish(mut self) -> Result<Vec<ExitStatus>, PipelineError> {
        self.stdout = None;
        let mut statuses = Vec::with_capacity(self.children.len());
        for mut child in std::mem::take(&mut self.children) {
            statuses.push(child.wait()?);
        }
        Ok(statuses)
    }
}

impl Read for Pipeline {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.stdout {
            Some(stdout) => stdout.read(buf),
            None => Ok(0),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stdout = None;
        for child in &mut self.children {
            if matches!(child.try_wait(), Ok(None)) {
                let _ = child.kill();
            }
            if let Err(err) = child.wait() {
                warn!(pid = child.id(), error = %err, "failed to reap helper");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    mod spawning {
        use super::*;

        #[test]
        fn single_stage_output_is_readable() {
            let mut pipeline = PipelineBuilder::new()
                .stage(Stage::exec("echo", ["hello"]))
                .spawn()
                .unwrap();
            let mut out = String::new();
            pipeline.read_to_string(&mut out).unwrap();
            assert_eq!(out, "hello\n");

            let statuses = pipeline.finish().unwrap();
            assert_eq!(statuses.len(), 1);
            assert!(statuses[0].success());
        }

        #[test]
        fn stages_are_chained() {
            let mut pipeline = PipelineBuilder::new()
                .stage(Stage::exec("printf", ["b\\na\\nc\\n"]))
                .stage(Stage::exec("sort", Vec::<&str>::new()))
                .spawn()
                .unwrap();
            assert_eq!(pipeline.pids().len(), 2);

            let mut out = String::new();
            pipeline.read_to_string(&mut out).unwrap();
            assert_eq!(out, "a\nb\nc\n");
            assert!(pipeline.finish().unwrap().iter().all(ExitStatus::success));
        }

        #[test]
        fn arguments_are_not_interpreted_by_a_shell() {
            let mut pipeline = PipelineBuilder::new()
                .stage(Stage::exec("echo", ["$HOME; `id`"]))
                .spawn()
                .unwrap();
            let mut out = String::new();
            pipeline.read_to_string(&mut out).unwrap();
            assert_eq!(out, "$HOME; `id`\n");
        }

        #[test]
        fn missing_program_is_a_spawn_error() {
            let err = PipelineBuilder::new()
                .stage(Stage::exec("/nonexistent/helper", ["x"]))
                .spawn()
                .unwrap_err();
            assert!(matches!(err, PipelineError::Spawn { ref program, .. } if program == "/nonexistent/helper"));
        }

        #[test]
        fn later_spawn_failure_reaps_earlier_stages() {
            let err = PipelineBuilder::new()
                .stage(Stage::exec("yes", Vec::<&str>::new()))
                .stage(Stage::exec("/nonexistent/filter", Vec::<&str>::new()))
                .spawn()
                .unwrap_err();
            assert!(matches!(err, PipelineError::Spawn { .. }));
        }

        #[test]
        fn empty_builder_is_rejected() {
            assert!(matches!(PipelineBuilder::new().spawn(), Err(PipelineError::Empty)));
        }
    }

    mod shell_stage {
        use super::*;

        #[test]
        fn quotes_validated_path() {
            let temp = tempfile::tempdir().unwrap();
            let file = temp.path().join("it's here.txt");
            fs::write(&file, b"content").unwrap();
            let safe = ShellSafePath::new(&file).unwrap();

            let command = ShellCommand::new("cat \"").path(&safe).literal("\"");
            let mut pipeline = PipelineBuilder::new().stage(Stage::shell(command)).spawn().unwrap();
            let mut out = String::new();
            pipeline.read_to_string(&mut out).unwrap();
            assert_eq!(out, "content");
        }

        #[test]
        fn display_shows_command_line() {
            let stage = Stage::shell(ShellCommand::new("unzip -l \"").literal("\""));
            assert_eq!(stage.to_string(), "/bin/sh -c 'unzip -l \"\"'");
            assert_eq!(Stage::exec("col", ["-b"]).to_string(), "col -b");
        }
    }

    mod teardown {
        use super::*;

        #[test]
        fn dropping_undrained_pipeline_does_not_hang() {
            let mut pipeline = PipelineBuilder::new()
                .stage(Stage::exec("yes", Vec::<&str>::new()))
                .spawn()
                .unwrap();
            let mut buf = [0u8; 8];
            pipeline.read_exact(&mut buf).unwrap();
            drop(pipeline);
        }

        #[test]
        fn nonblocking_read_reports_would_block() {
            let mut pipeline = PipelineBuilder::new()
                .stage(Stage::exec("sleep", ["5"]))
                .spawn()
                .unwrap();
            pipeline.set_nonblocking(true).unwrap();
            let mut buf = [0u8; 8];
            assert_eq!(
                pipeline.read(&mut buf).unwrap_err().kind(),
                io::ErrorKind::WouldBlock
            );
            assert!(pipeline.source_fd().is_some());
        }
    }
}
