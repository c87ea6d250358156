// Copyright 2025 Sean Kelleher. All rights reserved.
// Use of this source code is governed by an MIT
// licence that can be found in the LICENCE file.

//! The contract the container runtime drives an external engine through,
//! and the `docker`/`podman` CLI drivers that implement it.

use std::collections::HashMap;
use std::env;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::fs;
use std::io::Error as IoError;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Output;
use std::process::Stdio;

use snafu::ResultExt;
use snafu::Snafu;

use crate::context::OutputStream;
use crate::interpreter;
use crate::process;
use crate::process::RunSpec;

pub const DOCKER_HOST_GATEWAY: &str = "host.docker.internal";
pub const PODMAN_HOST_GATEWAY: &str = "host.containers.internal";

pub struct BuildOpts<'a> {
    pub context_dir: &'a Path,
    // The build file's name within `context_dir`.
    pub build_file: &'a str,
    pub tag: &'a str,
}

#[derive(Clone, Default)]
pub struct RunOpts {
    pub image: String,
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    // `src:dst` bind specs.
    pub volumes: Vec<String>,
    pub workdir: String,
    // `name:target` mappings passed to `--add-host`.
    pub extra_hosts: Vec<String>,
    pub interactive: bool,
    pub tty: bool,
    pub remove: bool,
}

pub struct RunResult {
    // Exit-code failures of the containerised command surface here, not as
    // an error.
    pub exit_code: i32,
}

pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;

    fn available(&self) -> bool;

    fn version(&self) -> Option<String>;

    fn build(&self, opts: &BuildOpts) -> Result<(), BuildEngineError>;

    fn run(
        &self,
        opts: &RunOpts,
        stdin: Stdio,
        stdout: &OutputStream,
        stderr: &OutputStream,
    )
        -> Result<RunResult, RunEngineError>;

    // `run_invocation` returns the program and arguments `run` would spawn,
    // without spawning them, so a caller can attach a PTY itself.
    fn run_invocation(&self, opts: &RunOpts) -> (String, Vec<String>);

    fn image_exists(&self, tag: &str) -> bool;

    fn remove_image(&self, tag: &str, force: bool)
        -> Result<(), EngineCommandError>;

    // `sysctl_override_active` is an optional capability: `None` means the
    // engine isn't subject to the known OCI runtime race and never needs the
    // cross-process run-lock; `Some(active)` reports whether the race
    // mitigation is already configured.
    fn sysctl_override_active(&self) -> Option<bool> {
        None
    }

    // The DNS name by which containers of this engine reach the host.
    fn host_gateway(&self) -> &'static str;
}

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Snafu)]
pub enum BuildEngineError {
    #[snafu(display("Couldn't run the engine: {}", source))]
    BuildProcessFailed{source: process::RunError},
    #[snafu(display("The image build failed:\n{}", stderr))]
    BuildFailed{stderr: String},
}

// The CLI drivers surface run failures through the exit code, so they only
// ever construct `RunProcessFailed`; the `Transient`/`Fatal` classification
// is for engine implementations that can tell a transient failure apart
// themselves.
#[derive(Debug, Snafu)]
pub enum RunEngineError {
    #[snafu(display("Couldn't run the engine: {}", source))]
    RunProcessFailed{source: process::RunError},
    #[snafu(display("The engine reported a transient failure: {}", message))]
    Transient{message: String},
    #[snafu(display("{}", message))]
    Fatal{message: String},
}

impl RunEngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient{..})
    }
}

#[derive(Debug, Snafu)]
pub enum EngineCommandError {
    #[snafu(display("Couldn't run the engine: {}", source))]
    RunFailed{source: IoError},
    #[snafu(display("The engine exited with a non-zero status: {:?}", output))]
    NonZeroExit{output: Output},
}

enum CliEngineKind {
    Docker,
    Podman,
}

// `CliEngine` drives an engine through its CLI, passing standard streams
// through the process driver so output can be streamed or buffered.
pub struct CliEngine {
    prog: String,
    kind: CliEngineKind,
}

impl CliEngine {
    pub fn docker() -> Self {
        CliEngine{prog: "docker".to_string(), kind: CliEngineKind::Docker}
    }

    pub fn podman() -> Self {
        CliEngine{prog: "podman".to_string(), kind: CliEngineKind::Podman}
    }

    // `capture` runs an engine subcommand to completion, asserting success.
    fn capture<I, S>(&self, args: I) -> Result<Output, EngineCommandError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output =
            Command::new(&self.prog)
                .args(args)
                .output()
                .context(RunFailed)?;

        if !output.status.success() {
            return Err(EngineCommandError::NonZeroExit{output});
        }

        Ok(output)
    }

    fn run_args(&self, opts: &RunOpts) -> Vec<String> {
        let mut args = vec!["run".to_string()];

        if opts.remove {
            args.push("--rm".to_string());
        }
        if opts.interactive {
            args.push("--interactive".to_string());
        }
        if opts.tty {
            args.push("--tty".to_string());
        }

        if !opts.workdir.is_empty() {
            args.push(format!("--workdir={}", opts.workdir));
        }

        // Sorted for a reproducible command line.
        let mut env: Vec<_> = opts.env.iter().collect();
        env.sort();
        for (k, v) in env {
            args.push(format!("--env={k}={v}"));
        }

        for volume in &opts.volumes {
            args.push(format!("--volume={volume}"));
        }

        for host in &opts.extra_hosts {
            args.push(format!("--add-host={host}"));
        }

        args.push(opts.image.clone());
        args.extend(opts.command.iter().cloned());

        args
    }
}

impl Engine for CliEngine {
    fn name(&self) -> &'static str {
        match self.kind {
            CliEngineKind::Docker => "docker",
            CliEngineKind::Podman => "podman",
        }
    }

    fn available(&self) -> bool {
        interpreter::resolve_on_path(&self.prog).is_some()
    }

    fn version(&self) -> Option<String> {
        let output = self.capture(["--version"]).ok()?;

        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn build(&self, opts: &BuildOpts) -> Result<(), BuildEngineError> {
        let build_file = opts.context_dir.join(opts.build_file);

        let mut args: Vec<OsString> = vec![
            OsString::from("build"),
            OsString::from("--file"),
            build_file.into_os_string(),
            OsString::from("--tag"),
            OsString::from(opts.tag),
        ];
        args.push(opts.context_dir.as_os_str().to_os_string());

        // Build output is captured so a successful build stays quiet; the
        // captured STDERR is surfaced when the build fails.
        let stdout = OutputStream::captured();
        let stderr = OutputStream::captured();

        let status = process::run(
            RunSpec{
                prog: OsStr::new(&self.prog),
                args: args.iter().map(OsString::as_os_str).collect(),
                env: None,
                workdir: None,
                stdin: Stdio::null(),
            },
            &stdout,
            &stderr,
        )
            .context(BuildProcessFailed)?;

        if !status.success() {
            return Err(BuildEngineError::BuildFailed{
                stderr: stderr.contents(),
            });
        }

        Ok(())
    }

    fn run(
        &self,
        opts: &RunOpts,
        stdin: Stdio,
        stdout: &OutputStream,
        stderr: &OutputStream,
    )
        -> Result<RunResult, RunEngineError>
    {
        let args = self.run_args(opts);

        let status = process::run(
            RunSpec{
                prog: OsStr::new(&self.prog),
                args: args.iter().map(|a| OsStr::new(a.as_str())).collect(),
                env: None,
                workdir: None,
                stdin,
            },
            stdout,
            stderr,
        )
            .context(RunProcessFailed)?;

        Ok(RunResult{exit_code: process::exit_code(status)})
    }

    fn run_invocation(&self, opts: &RunOpts) -> (String, Vec<String>) {
        (self.prog.clone(), self.run_args(opts))
    }

    fn image_exists(&self, tag: &str) -> bool {
        self.capture(["image", "inspect", tag]).is_ok()
    }

    fn remove_image(&self, tag: &str, force: bool)
        -> Result<(), EngineCommandError>
    {
        let mut args = vec!["rmi"];
        if force {
            args.push("--force");
        }
        args.push(tag);

        self.capture(args)?;

        Ok(())
    }

    fn sysctl_override_active(&self) -> Option<bool> {
        match self.kind {
            // Docker isn't subject to the rootless OCI runtime race.
            CliEngineKind::Docker => None,
            CliEngineKind::Podman => {
                Some(ping_group_range_override_configured())
            },
        }
    }

    fn host_gateway(&self) -> &'static str {
        match self.kind {
            CliEngineKind::Docker => DOCKER_HOST_GATEWAY,
            CliEngineKind::Podman => PODMAN_HOST_GATEWAY,
        }
    }
}

// `ping_group_range_override_configured` reports whether the user's
// `containers.conf` declares the `net.ipv4.ping_group_range` default sysctl,
// which mitigates the rootless OCI runtime race that otherwise requires the
// cross-process run-lock.
fn ping_group_range_override_configured() -> bool {
    let mut candidates: Vec<PathBuf> = vec![];

    if let Some(dir) = env::var_os("XDG_CONFIG_HOME") {
        candidates.push(
            PathBuf::from(dir).join("containers/containers.conf"),
        );
    }
    if let Some(home) = env::var_os("HOME") {
        candidates.push(
            PathBuf::from(home).join(".config/containers/containers.conf"),
        );
    }

    for path in candidates {
        if let Ok(conts) = fs::read_to_string(&path) {
            if conts.contains("net.ipv4.ping_group_range") {
                return true;
            }
        }
    }

    false
}

#[cfg(test)]
pub mod mock {
    //! A scripted in-process engine for exercising the container runtime
    //! without a daemon.

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;

    pub struct MockEngine {
        // Outcomes popped per `run` call, either an exit code or an engine
        // error; an empty queue yields exit 0.
        pub run_outcomes: Mutex<VecDeque<Result<i32, RunEngineError>>>,
        // Written to the attempt's STDERR sink on every `run` call, before
        // the outcome is reported.
        pub run_stderr: String,
        pub run_stdout: String,
        pub run_calls: AtomicUsize,
        pub build_calls: AtomicUsize,
        pub build_fails: bool,
        pub existing_images: Mutex<Vec<String>>,
        pub sysctl_override: Option<bool>,
        pub last_run_opts: Mutex<Option<RunOpts>>,
    }

    impl MockEngine {
        pub fn new() -> Self {
            MockEngine{
                run_outcomes: Mutex::new(VecDeque::new()),
                run_stderr: String::new(),
                run_stdout: String::new(),
                run_calls: AtomicUsize::new(0),
                build_calls: AtomicUsize::new(0),
                build_fails: false,
                existing_images: Mutex::new(vec![]),
                sysctl_override: None,
                last_run_opts: Mutex::new(None),
            }
        }

        pub fn with_exit_codes(codes: &[i32]) -> Self {
            Self::with_outcomes(codes.iter().map(|&code| Ok(code)).collect())
        }

        pub fn with_outcomes(
            outcomes: VecDeque<Result<i32, RunEngineError>>,
        )
            -> Self
        {
            let mut engine = Self::new();
            engine.run_outcomes = Mutex::new(outcomes);

            engine
        }

        pub fn run_call_count(&self) -> usize {
            self.run_calls.load(Ordering::SeqCst)
        }

        pub fn build_call_count(&self) -> usize {
            self.build_calls.load(Ordering::SeqCst)
        }
    }

    impl Engine for MockEngine {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn available(&self) -> bool {
            true
        }

        fn version(&self) -> Option<String> {
            Some("mock 0.0.0".to_string())
        }

        fn build(&self, opts: &BuildOpts) -> Result<(), BuildEngineError> {
            self.build_calls.fetch_add(1, Ordering::SeqCst);

            if self.build_fails {
                return Err(BuildEngineError::BuildFailed{
                    stderr: "mock build failure".to_string(),
                });
            }

            self.existing_images
                .lock()
                .expect("couldn't lock the mock image store")
                .push(opts.tag.to_string());

            Ok(())
        }

        fn run(
            &self,
            opts: &RunOpts,
            _stdin: Stdio,
            stdout: &OutputStream,
            stderr: &OutputStream,
        )
            -> Result<RunResult, RunEngineError>
        {
            self.run_calls.fetch_add(1, Ordering::SeqCst);

            *self.last_run_opts
                .lock()
                .expect("couldn't lock the mock run options") =
                    Some(opts.clone());

            if !self.run_stdout.is_empty() {
                stdout.write_all(self.run_stdout.as_bytes())
                    .expect("couldn't write mock STDOUT");
            }
            if !self.run_stderr.is_empty() {
                stderr.write_all(self.run_stderr.as_bytes())
                    .expect("couldn't write mock STDERR");
            }

            let outcome = self.run_outcomes
                .lock()
                .expect("couldn't lock the mock outcomes")
                .pop_front()
                .unwrap_or(Ok(0));

            let exit_code = outcome?;

            Ok(RunResult{exit_code})
        }

        fn run_invocation(&self, opts: &RunOpts) -> (String, Vec<String>) {
            let mut args = vec!["run".to_string()];
            args.push(opts.image.clone());
            args.extend(opts.command.iter().cloned());

            ("mock".to_string(), args)
        }

        fn image_exists(&self, tag: &str) -> bool {
            self.existing_images
                .lock()
                .expect("couldn't lock the mock image store")
                .iter()
                .any(|t| t == tag)
        }

        fn remove_image(&self, tag: &str, _force: bool)
            -> Result<(), EngineCommandError>
        {
            self.existing_images
                .lock()
                .expect("couldn't lock the mock image store")
                .retain(|t| t != tag);

            Ok(())
        }

        fn sysctl_override_active(&self) -> Option<bool> {
            self.sysctl_override
        }

        fn host_gateway(&self) -> &'static str {
            "host.mock.internal"
        }
    }
}
