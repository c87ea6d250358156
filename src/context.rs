// Copyright 2025 Sean Kelleher. All rights reserved.
// Use of this source code is governed by an MIT
// licence that can be found in the LICENCE file.

//! The per-invocation bundle passed to every runtime, and the result type
//! every runtime produces.

use std::collections::HashMap;
use std::io;
use std::io::Error as IoError;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;

use snafu::Snafu;

use crate::cancel::CancelHandle;
use crate::engine::RunEngineError;
use crate::env_builder;
use crate::env_builder::BuildEnvError;
use crate::env_builder::EnvOptions;
use crate::invowkfile::CommandConfig;
use crate::invowkfile::Implementation;
use crate::invowkfile::Invowkfile;
use crate::invowkfile::RuntimeKind;
use crate::invowkfile::ScriptBodyError;
use crate::process::RunError as ProcessRunError;
use crate::provision::ProvisionError;
use crate::run_lock::AcquireRunLockError;
use crate::ssh::IssueConnectionError;
use crate::virtual_shell::EvalError;

pub struct ExecutionContext {
    pub command_name: String,
    pub command: CommandConfig,
    pub invowkfile: Invowkfile,
    pub selected_impl: Option<Implementation>,
    pub selected_runtime: RuntimeKind,
    pub io: IoStreams,
    pub env: EnvOptions,
    pub workdir_override: Option<String>,
    pub positional_args: Vec<String>,
    pub tui: TuiConfig,
    pub cancel: CancelHandle,
    pub execution_id: String,
}

impl ExecutionContext {
    // `implementation` returns the selected implementation, which every
    // runtime requires before it can dispatch.
    pub fn implementation(&self) -> Result<&Implementation, ExecError> {
        self.selected_impl
            .as_ref()
            .ok_or_else(|| ExecError::NoImplementationSelected{
                command: self.command_name.clone(),
            })
    }

    // `extra_env` returns the tool-internal variables passed into the child:
    // positional parameters and invocation metadata, merged with any extra
    // variables the caller provided.
    pub fn extra_env(&self) -> HashMap<String, String> {
        let mut vars = self.env.extra_env.clone();

        vars.insert(
            "ARGC".to_string(),
            self.positional_args.len().to_string(),
        );
        for (i, arg) in self.positional_args.iter().enumerate() {
            vars.insert(format!("ARG{}", i + 1), arg.clone());
        }

        vars.insert(
            env_builder::VAR_CMD_NAME.to_string(),
            self.command_name.clone(),
        );
        vars.insert(
            env_builder::VAR_RUNTIME.to_string(),
            self.selected_runtime.name().to_string(),
        );
        vars.insert(
            env_builder::VAR_SOURCE.to_string(),
            self.invowkfile.path.display().to_string(),
        );
        vars.insert(
            env_builder::VAR_PLATFORM.to_string(),
            crate::invowkfile::current_platform().to_string(),
        );

        vars
    }
}

#[derive(Clone, Default)]
pub struct TuiConfig {
    pub server_url: String,
    pub server_token: String,
}

impl TuiConfig {
    pub fn validate(&self) -> Result<(), NewTuiConfigError> {
        if !self.server_url.is_empty()
            && !self.server_url.starts_with("http://")
            && !self.server_url.starts_with("https://")
        {
            return Err(NewTuiConfigError::InvalidServerUrl{
                url: self.server_url.clone(),
            });
        }

        if !self.server_token.is_empty()
            && self.server_token.trim().is_empty()
        {
            return Err(NewTuiConfigError::BlankServerToken);
        }

        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        !self.server_url.is_empty()
    }
}

#[derive(Debug, Snafu)]
pub enum NewTuiConfigError {
    #[snafu(display(
        "The TUI server URL ('{}') must start with `http://` or `https://`",
        url,
    ))]
    InvalidServerUrl{url: String},
    #[snafu(display("The TUI server token must contain non-whitespace"))]
    BlankServerToken,
}

pub struct IoStreams {
    pub stdin: InputStream,
    pub stdout: OutputStream,
    pub stderr: OutputStream,
}

impl IoStreams {
    pub fn inherited() -> Self {
        IoStreams{
            stdin: InputStream::Inherited,
            stdout: OutputStream::InheritedStdout,
            stderr: OutputStream::InheritedStderr,
        }
    }

    // `captured` returns streams for capture mode: no input, and both output
    // streams recorded in buffers surfaced on the result.
    pub fn captured() -> Self {
        IoStreams{
            stdin: InputStream::Null,
            stdout: OutputStream::captured(),
            stderr: OutputStream::captured(),
        }
    }
}

#[derive(Clone)]
pub enum InputStream {
    Inherited,
    Null,
}

impl InputStream {
    pub fn to_stdio(&self) -> Stdio {
        match self {
            Self::Inherited => Stdio::inherit(),
            Self::Null => Stdio::null(),
        }
    }
}

// `OutputStream` is a byte sink for child output. `Inherited*` streams write
// through to the file descriptors of the current process; `Captured` streams
// record into a shared buffer that the caller can drain afterwards.
#[derive(Clone)]
pub enum OutputStream {
    InheritedStdout,
    InheritedStderr,
    Captured(Arc<Mutex<Vec<u8>>>),
}

impl OutputStream {
    pub fn captured() -> Self {
        Self::Captured(Arc::new(Mutex::new(vec![])))
    }

    pub fn write_all(&self, bytes: &[u8]) -> Result<(), IoError> {
        match self {
            Self::InheritedStdout => {
                io::stdout().lock().write_all(bytes)
            },
            Self::InheritedStderr => {
                io::stderr().lock().write_all(bytes)
            },
            Self::Captured(buf) => {
                let mut buf =
                    match buf.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                buf.extend_from_slice(bytes);

                Ok(())
            },
        }
    }

    // `contents` returns the captured bytes as a lossily-decoded string, or
    // an empty string for inherited streams.
    pub fn contents(&self) -> String {
        match self {
            Self::Captured(buf) => {
                let buf =
                    match buf.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };

                String::from_utf8_lossy(&buf).into_owned()
            },
            _ => String::new(),
        }
    }

    pub fn is_captured(&self) -> bool {
        matches!(self, Self::Captured(_))
    }

    // `to_stdio` returns how a child process should bind this stream:
    // inherited streams pass the file descriptor through, captured streams
    // are piped so the driver can pump chunks into the buffer.
    pub fn to_stdio(&self) -> Stdio {
        match self {
            Self::InheritedStdout | Self::InheritedStderr => Stdio::inherit(),
            Self::Captured(_) => Stdio::piped(),
        }
    }
}

pub struct ExecutionResult {
    // Exit codes are in `[0, 255]`; `-1` is never stored.
    pub exit_code: i32,
    pub error: Option<ExecError>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn from_exit_code(exit_code: i32) -> Self {
        ExecutionResult{
            exit_code: exit_code.clamp(0, 255),
            error: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn from_error(error: ExecError) -> Self {
        ExecutionResult{
            exit_code: 1,
            error: Some(error),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }
}

// The error taxonomy shared by all runtimes. Variants are named by intent;
// `RuntimeNotAvailable` doubles as a sentinel that callers can match on after
// dispatch returns.
#[derive(Debug, Snafu)]
pub enum ExecError {
    #[snafu(display(
        "No implementation was selected for command '{}'",
        command,
    ))]
    NoImplementationSelected{command: String},
    #[snafu(display("Command '{}' has an empty script", command))]
    EmptyScript{command: String},
    #[snafu(display("Runtime '{}' isn't available on this host", name))]
    RuntimeNotAvailable{name: String},
    #[snafu(display("Runtime '{}' isn't registered", name))]
    RuntimeNotRegistered{name: String},
    #[snafu(display(
        "Runtime '{}' doesn't support capturing output",
        name,
    ))]
    CaptureNotSupported{name: String},
    #[snafu(display(
        "Runtime '{}' doesn't support interactive preparation",
        name,
    ))]
    InteractiveNotSupported{name: String},
    #[snafu(display(
        "`interpreter` can't be used with the virtual runtime",
    ))]
    InterpreterNotAllowedInVirtual,
    #[snafu(display("Couldn't parse the script: {}", message))]
    ScriptSyntax{message: String},
    #[snafu(display("Couldn't resolve the script: {}", source))]
    ResolveScriptFailed{source: ScriptBodyError},
    #[snafu(display(
        "Command '{}' has no container runtime configuration",
        command,
    ))]
    MissingContainerConfig{command: String},
    #[snafu(display(
        "windows container images are not supported (image '{}')",
        image,
    ))]
    WindowsImageNotSupported{image: String},
    #[snafu(display(
        "alpine-based container images are not supported (image '{}'); the \
            provisioned binary requires a glibc-based image",
        image,
    ))]
    AlpineImageNotSupported{image: String},
    #[snafu(display("Couldn't build the environment: {}", source))]
    BuildEnvFailed{source: BuildEnvError},
    #[snafu(display(
        "Couldn't provision the container image with strict mode enabled: {}",
        source,
    ))]
    StrictProvisioningFailed{source: ProvisionError},
    #[snafu(display(
        "Couldn't set up host SSH access (`enable_host_ssh`): {}",
        source,
    ))]
    SshSetupFailed{source: IssueConnectionError},
    #[snafu(display("Interpreter '{}' was not found on PATH", interpreter))]
    InterpreterNotFound{interpreter: String},
    #[snafu(display(
        "The working directory '{}' doesn't exist or isn't a directory: {}",
        path.display(),
        source,
    ))]
    WorkdirInvalid{source: IoError, path: PathBuf},
    #[snafu(display(
        "'{}' exists but isn't a directory",
        path.display(),
    ))]
    WorkdirNotADirectory{path: PathBuf},
    #[snafu(display("Couldn't stage the script to a file: {}", source))]
    StageScriptFailed{source: IoError},
    #[snafu(display("Couldn't run the command: {}", source))]
    ProcessRunFailed{source: ProcessRunError},
    #[snafu(display("Couldn't run the script: {}", source))]
    VirtualRunFailed{source: EvalError},
    #[snafu(display("The container engine failed: {}", source))]
    EngineRunFailed{source: RunEngineError},
    #[snafu(display("Couldn't acquire the engine run-lock: {}", source))]
    RunLockFailed{source: AcquireRunLockError},
    #[snafu(display("Invalid TUI configuration: {}", source))]
    TuiConfigInvalid{source: NewTuiConfigError},
    #[snafu(display("The execution was cancelled"))]
    Cancelled,
}
