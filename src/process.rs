// Copyright 2025 Sean Kelleher. All rights reserved.
// Use of this source code is governed by an MIT
// licence that can be found in the LICENCE file.

//! A child-process driver that forwards the child's output streams into
//! `OutputStream` sinks chunk-by-chunk, so callers can stream, capture, or
//! buffer output without the child knowing the difference.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io::Error as IoError;
use std::path::Path;
use std::process::ExitStatus;
use std::process::Stdio;

use snafu::ResultExt;
use snafu::Snafu;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;

use crate::context::OutputStream;

pub struct RunSpec<'a> {
    pub prog: &'a OsStr,
    pub args: Vec<&'a OsStr>,
    // `None` inherits the parent's environment; `Some` replaces it.
    pub env: Option<&'a HashMap<String, String>>,
    pub workdir: Option<&'a Path>,
    pub stdin: Stdio,
}

// `run` spawns the command described by `spec` and pumps its output into
// `stdout` and `stderr` until the child exits. Streams that are inherited
// are passed straight through as file descriptors and never pumped.
#[tokio::main(flavor = "current_thread")]
pub async fn run(
    spec: RunSpec<'_>,
    stdout: &OutputStream,
    stderr: &OutputStream,
)
    -> Result<ExitStatus, RunError>
{
    let mut cmd = TokioCommand::new(spec.prog);

    cmd
        .args(&spec.args)
        .stdin(spec.stdin)
        .stdout(stdout.to_stdio())
        .stderr(stderr.to_stdio());

    if let Some(env) = spec.env {
        cmd.env_clear().envs(env);
    }

    if let Some(dir) = spec.workdir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()
        .context(SpawnFailed)?;

    // Pipes only exist for captured streams; inherited streams leave these
    // as `None` and the select arms below stay disabled.
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let mut stdout_buf = [0; 0x1000];
    let mut stderr_buf = [0; 0x1000];

    let mut wait_status = None;
    while wait_status.is_none() {
        tokio::select! {
            result = read_chunk(&mut stdout_pipe, &mut stdout_buf),
                if stdout_pipe.is_some() =>
            {
                let n = result
                    .context(ReadStdoutFailed)?;

                if n == 0 {
                    stdout_pipe = None;
                } else {
                    stdout.write_all(&stdout_buf[..n])
                        .context(WriteStdoutFailed)?;
                }
            },

            result = read_chunk(&mut stderr_pipe, &mut stderr_buf),
                if stderr_pipe.is_some() =>
            {
                let n = result
                    .context(ReadStderrFailed)?;

                if n == 0 {
                    stderr_pipe = None;
                } else {
                    stderr.write_all(&stderr_buf[..n])
                        .context(WriteStderrFailed)?;
                }
            },

            result = child.wait() => {
                let status = result
                    .context(WaitFailed)?;

                wait_status = Some(status);
            },
        }
    }

    // The child can exit while its pipes still hold buffered output, so the
    // remainder is drained before returning.
    if let Some(mut pipe) = stdout_pipe {
        let mut rest = vec![];
        pipe.read_to_end(&mut rest).await
            .context(ReadStdoutFailed)?;
        stdout.write_all(&rest)
            .context(WriteStdoutFailed)?;
    }
    if let Some(mut pipe) = stderr_pipe {
        let mut rest = vec![];
        pipe.read_to_end(&mut rest).await
            .context(ReadStderrFailed)?;
        stderr.write_all(&rest)
            .context(WriteStderrFailed)?;
    }

    // `unwrap` is safe here because we assert that `wait_status` is not
    // `None` via the exit condition of `while`.
    Ok(wait_status.unwrap())
}

async fn read_chunk<R: AsyncRead + Unpin>(
    pipe: &mut Option<R>,
    buf: &mut [u8],
)
    -> Result<usize, IoError>
{
    match pipe {
        Some(reader) => reader.read(buf).await,
        // The branch is disabled by its guard when the pipe is `None`.
        None => Ok(0),
    }
}

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Snafu)]
pub enum RunError {
    #[snafu(display("Couldn't spawn the command: {}", source))]
    SpawnFailed{source: IoError},
    #[snafu(display("Couldn't read the command's STDOUT: {}", source))]
    ReadStdoutFailed{source: IoError},
    #[snafu(display("Couldn't read the command's STDERR: {}", source))]
    ReadStderrFailed{source: IoError},
    #[snafu(display("Couldn't forward the command's STDOUT: {}", source))]
    WriteStdoutFailed{source: IoError},
    #[snafu(display("Couldn't forward the command's STDERR: {}", source))]
    WriteStderrFailed{source: IoError},
    #[snafu(display("Couldn't wait for the command: {}", source))]
    WaitFailed{source: IoError},
}

// `exit_code` maps an `ExitStatus` to the exit code reported to callers;
// terminations without a code (e.g. by signal) map to 1.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        code
    } else if status.success() {
        0
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os_strs<'a>(strs: &'a [&'a str]) -> Vec<&'a OsStr> {
        strs
            .iter()
            .map(OsStr::new)
            .collect()
    }

    #[test]
    // Given a command that writes to STDOUT and STDERR
    // When the command is run with captured streams
    // Then each stream's sink receives the matching output
    fn run_captures_both_streams() {
        let stdout = OutputStream::captured();
        let stderr = OutputStream::captured();

        let status = run(
            RunSpec{
                prog: OsStr::new("sh"),
                args: os_strs(&["-c", "echo out; echo err >&2"]),
                env: None,
                workdir: None,
                stdin: Stdio::null(),
            },
            &stdout,
            &stderr,
        )
            .expect("couldn't run the command");

        assert_eq!(exit_code(status), 0);
        assert_eq!(stdout.contents(), "out\n");
        assert_eq!(stderr.contents(), "err\n");
    }

    #[test]
    // Given a command that exits with a non-zero code
    // When the command is run
    // Then the exit code is reported
    fn run_reports_exit_code() {
        let stdout = OutputStream::captured();
        let stderr = OutputStream::captured();

        let status = run(
            RunSpec{
                prog: OsStr::new("sh"),
                args: os_strs(&["-c", "exit 3"]),
                env: None,
                workdir: None,
                stdin: Stdio::null(),
            },
            &stdout,
            &stderr,
        )
            .expect("couldn't run the command");

        assert_eq!(exit_code(status), 3);
    }

    #[test]
    // Given a replacement environment
    // When the command is run
    // Then the child sees only the replacement environment
    fn run_replaces_environment() {
        let stdout = OutputStream::captured();
        let stderr = OutputStream::captured();

        let mut env = HashMap::new();
        env.insert("MARKER".to_string(), "present".to_string());
        // The replacement environment needs a PATH for `sh` to be found.
        env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());

        let status = run(
            RunSpec{
                prog: OsStr::new("sh"),
                args: os_strs(&["-c", "echo \"$MARKER:$UNSET_VAR\""]),
                env: Some(&env),
                workdir: None,
                stdin: Stdio::null(),
            },
            &stdout,
            &stderr,
        )
            .expect("couldn't run the command");

        assert_eq!(exit_code(status), 0);
        assert_eq!(stdout.contents(), "present:\n");
    }
}
