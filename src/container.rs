// Copyright 2025 Sean Kelleher. All rights reserved.
// Use of this source code is governed by an MIT
// licence that can be found in the LICENCE file.

//! The container runtime, which runs scripts inside a Linux container
//! through an external engine.
//!
//! Preparation acquires up to three resources (provisioning side-effects, an
//! SSH token, a staged script); each is released automatically if a later
//! step fails, and the combined cleanup runs after the engine returns on
//! every path. Engine dispatch retries transient failures with each
//! attempt's STDERR buffered, so noise from attempts that were retried away
//! never reaches the caller.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::context::ExecError;
use crate::context::ExecutionContext;
use crate::context::ExecutionResult;
use crate::context::IoStreams;
use crate::context::OutputStream;
use crate::engine::Engine;
use crate::engine::RunOpts;
use crate::env_builder;
use crate::env_builder::InheritMode;
use crate::interpreter;
use crate::invowkfile::RuntimeConfig;
use crate::provision;
use crate::provision::ProvisionConfig;
use crate::run_lock::RunLock;
use crate::runtime::Cleanup;
use crate::runtime::PreparedCommand;
use crate::runtime::Runtime;
use crate::ssh::IssueConnectionError;
use crate::ssh::TokenIssuer;

pub const WORKSPACE_MOUNT: &str = "/workspace";

const MAX_RUN_RETRIES: u32 = 3;
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(500);

// Engine exit 125 is a generic engine-internal error; 126 is an OCI runtime
// failure, which covers the known rootless race on the kernel's
// ping-group-range sysctl. Both are worth retrying.
const TRANSIENT_EXIT_CODES: &[i32] = &[125, 126];

pub struct ContainerRuntime {
    engine: Arc<dyn Engine>,
    provision: ProvisionConfig,
    ssh: Option<Arc<dyn TokenIssuer>>,
}

struct Prepared {
    opts: RunOpts,
    cleanup: Cleanup,
    // Keeps the staged script on disk until the engine has finished.
    staged_script: Option<tempfile::TempPath>,
}

impl ContainerRuntime {
    pub fn new(engine: Arc<dyn Engine>, provision: ProvisionConfig) -> Self {
        ContainerRuntime{engine, provision, ssh: None}
    }

    pub fn with_ssh_issuer(mut self, issuer: Arc<dyn TokenIssuer>) -> Self {
        self.ssh = Some(issuer);

        self
    }

    fn container_config<'a>(
        &self,
        ctx: &'a ExecutionContext,
        runtime_config: &'a RuntimeConfig,
    )
        -> Result<&'a str, ExecError>
    {
        match &runtime_config.image {
            Some(image) => Ok(image),
            None => Err(ExecError::MissingContainerConfig{
                command: ctx.command_name.clone(),
            }),
        }
    }

    fn prepare(&self, ctx: &ExecutionContext, io: &IoStreams)
        -> Result<Prepared, ExecError>
    {
        let mut cleanup = Cleanup::new();

        match self.try_prepare(ctx, io, &mut cleanup) {
            Ok((opts, staged_script)) => {
                Ok(Prepared{opts, cleanup, staged_script})
            },
            Err(e) => {
                cleanup.run();

                Err(e)
            },
        }
    }

    fn try_prepare(
        &self,
        ctx: &ExecutionContext,
        io: &IoStreams,
        cleanup: &mut Cleanup,
    )
        -> Result<(RunOpts, Option<tempfile::TempPath>), ExecError>
    {
        let impl_ = ctx.implementation()?;
        let runtime_config = impl_.runtime_config();

        let base_image =
            self.container_config(ctx, &runtime_config)?.to_string();
        validate_base_image(&base_image)?;

        ctx.tui.validate()
            .map_err(|source| ExecError::TuiConfigInvalid{source})?;

        let invowkfile_dir = ctx.invowkfile.dir();

        let script = impl_.script_body(&invowkfile_dir)
            .map_err(|source| ExecError::ResolveScriptFailed{source})?;

        let mut run_image = base_image.clone();
        let mut provisioned_env = HashMap::new();

        if self.provision.enabled {
            let result = provision::ensure_provisioned(
                self.engine.as_ref(),
                &self.provision,
                &base_image,
                &invowkfile_dir,
            );

            match result {
                Ok(provisioned) => {
                    run_image = provisioned.image_tag;
                    provisioned_env = provisioned.env_vars;
                    cleanup.extend(provisioned.cleanup);
                },
                Err(e) => {
                    if self.provision.strict {
                        return Err(ExecError::StrictProvisioningFailed{
                            source: e,
                        });
                    }

                    let warning = format!(
                        "Warning: couldn't provision '{base_image}' with \
                            the invowk binary: {e}\n\
                        Warning: nested `invowk` commands won't be \
                            available inside this container; set `strict` \
                            in the provisioning configuration to make this \
                            fatal.\n",
                    );
                    let _ = io.stderr.write_all(warning.as_bytes());
                },
            }
        }

        // Containers start from an empty environment unless the
        // implementation opts into inheritance.
        let mut env = env_builder::build_env(ctx, InheritMode::None)
            .map_err(|source| ExecError::BuildEnvFailed{source})?;

        for (k, v) in provisioned_env {
            env.insert(k, v);
        }

        if runtime_config.host_ssh == Some(true) {
            let issuer = self.ssh
                .as_ref()
                .ok_or(ExecError::SshSetupFailed{
                    source: IssueConnectionError::ServerUnavailable,
                })?;

            let conn = issuer
                .issue(&ctx.execution_id, self.engine.host_gateway())
                .map_err(|source| ExecError::SshSetupFailed{source})?;

            env.insert("INVOWK_SSH_HOST".to_string(), conn.host.clone());
            env.insert("INVOWK_SSH_PORT".to_string(), conn.port.to_string());
            env.insert("INVOWK_SSH_USER".to_string(), conn.user.clone());
            env.insert("INVOWK_SSH_TOKEN".to_string(), conn.token.clone());
            env.insert("INVOWK_SSH_ENABLED".to_string(), "1".to_string());

            let issuer = Arc::clone(issuer);
            let token = conn.token;
            cleanup.push(move || issuer.revoke(&token));
        }

        if ctx.tui.is_configured() {
            env.insert(
                "INVOWK_TUI_ADDR".to_string(),
                ctx.tui.server_url.clone(),
            );
            if !ctx.tui.server_token.is_empty() {
                env.insert(
                    "INVOWK_TUI_TOKEN".to_string(),
                    ctx.tui.server_token.clone(),
                );
            }
        }

        let mut volumes = runtime_config.volumes.clone().unwrap_or_default();
        volumes.push(
            format!("{}:{}", invowkfile_dir.display(), WORKSPACE_MOUNT),
        );

        let mut staged_script = None;
        let command =
            match interpreter::resolve(
                runtime_config.interpreter.as_deref(),
                &script,
            ) {
                Some(interp) => {
                    let ext =
                        interpreter::temp_file_extension(&interp.prog);

                    let mut builder = tempfile::Builder::new();
                    builder.prefix("invowk-script-");
                    if !ext.is_empty() {
                        builder.suffix(ext);
                    }

                    let mut file = builder.tempfile()
                        .map_err(|source| ExecError::StageScriptFailed{
                            source,
                        })?;
                    file.write_all(script.as_bytes())
                        .map_err(|source| ExecError::StageScriptFailed{
                            source,
                        })?;

                    let staged_path = file.into_temp_path();

                    let container_path = format!("/invowk/script{ext}");
                    volumes.push(format!(
                        "{}:{}",
                        staged_path.display(),
                        container_path,
                    ));
                    staged_script = Some(staged_path);

                    let mut command = vec![interp.prog.clone()];
                    command.extend(interp.args.iter().cloned());
                    command.push(container_path);
                    command.extend(ctx.positional_args.iter().cloned());

                    command
                },
                None => {
                    let mut command = vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        script,
                        // `$0` for the script.
                        "invowk".to_string(),
                    ];
                    command.extend(ctx.positional_args.iter().cloned());

                    command
                },
            };

        let workdir_choice = ctx.workdir_override
            .clone()
            .or_else(|| impl_.workdir.clone())
            .or_else(|| ctx.command.workdir.clone())
            .or_else(|| ctx.invowkfile.workdir.clone());
        let workdir = container_workdir(
            workdir_choice.as_deref(),
            &invowkfile_dir,
        );

        let mut extra_hosts = vec![];
        let needs_host_access =
            runtime_config.host_ssh == Some(true) || ctx.tui.is_configured();
        if needs_host_access {
            extra_hosts.push(
                format!("{}:host-gateway", self.engine.host_gateway()),
            );
        }

        let opts = RunOpts{
            image: run_image,
            command,
            env,
            volumes,
            workdir,
            extra_hosts,
            interactive: false,
            tty: false,
            remove: true,
        };

        Ok((opts, staged_script))
    }

    // `run_with_retry` drives the engine, retrying transient failures with
    // exponential backoff. Each attempt's STDERR goes into a fresh buffer
    // that only reaches the caller on the final decision, so an OCI
    // runtime's noise from a retried attempt never leaks.
    fn run_with_retry(
        &self,
        ctx: &ExecutionContext,
        opts: &RunOpts,
        io: &IoStreams,
    )
        -> Result<i32, ExecError>
    {
        let needs_lock =
            self.engine.sysctl_override_active() == Some(false);

        let mut attempt = 1;
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(ExecError::Cancelled);
            }

            let attempt_stderr = OutputStream::captured();

            // The lock is scoped to a single engine call so concurrent
            // invocations interleave between attempts.
            let lock =
                if needs_lock {
                    let lock = RunLock::acquire()
                        .map_err(|source| ExecError::RunLockFailed{
                            source,
                        })?;

                    Some(lock)
                } else {
                    None
                };

            let result = self.engine.run(
                opts,
                io.stdin.to_stdio(),
                &io.stdout,
                &attempt_stderr,
            );

            drop(lock);

            match result {
                Ok(run_result) => {
                    let transient = TRANSIENT_EXIT_CODES
                        .contains(&run_result.exit_code);

                    if !transient || attempt >= MAX_RUN_RETRIES {
                        // A success that needed retries discards its
                        // buffer: whatever the OCI runtime wrote on the
                        // way belongs with the attempts that were retried
                        // away.
                        let retried_success =
                            run_result.exit_code == 0 && attempt > 1;
                        if !retried_success {
                            flush_stderr(&attempt_stderr, &io.stderr);
                        }

                        return Ok(run_result.exit_code);
                    }
                },
                Err(e) => {
                    if !e.is_transient() || attempt >= MAX_RUN_RETRIES {
                        flush_stderr(&attempt_stderr, &io.stderr);

                        return Err(ExecError::EngineRunFailed{source: e});
                    }
                },
            }

            let backoff = RETRY_BACKOFF_BASE * 2u32.pow(attempt - 1);
            if ctx.cancel.sleep(backoff) {
                return Err(ExecError::Cancelled);
            }

            attempt += 1;
        }
    }

    fn execute_with_io(
        &self,
        ctx: &ExecutionContext,
        io: &IoStreams,
        interactive: bool,
    )
        -> ExecutionResult
    {
        let mut prepared =
            match self.prepare(ctx, io) {
                Ok(prepared) => prepared,
                Err(e) => return ExecutionResult::from_error(e),
            };

        prepared.opts.interactive = interactive;

        let run_result = self.run_with_retry(ctx, &prepared.opts, io);

        prepared.cleanup.run();
        drop(prepared.staged_script);

        match run_result {
            Ok(exit_code) => {
                let mut result = ExecutionResult::from_exit_code(exit_code);
                result.stdout = io.stdout.contents();
                result.stderr = io.stderr.contents();

                result
            },
            Err(e) => {
                ExecutionResult::from_error(e)
            },
        }
    }

    fn build_prepared_command(&self, ctx: &ExecutionContext)
        -> Result<PreparedCommand, ExecError>
    {
        let mut prepared = self.prepare(ctx, &ctx.io)?;

        prepared.opts.interactive = true;
        prepared.opts.tty = true;

        let (prog, args) = self.engine.run_invocation(&prepared.opts);

        let mut cleanup = Cleanup::new();
        cleanup.extend(prepared.cleanup);
        if let Some(staged) = prepared.staged_script.take() {
            cleanup.push(move || drop(staged));
        }

        Ok(PreparedCommand{
            prog,
            args,
            env: None,
            workdir: None,
            cleanup,
        })
    }
}

impl Runtime for ContainerRuntime {
    fn name(&self) -> &'static str {
        "container"
    }

    fn available(&self) -> bool {
        self.engine.available()
    }

    fn validate(&self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        let impl_ = ctx.implementation()?;
        let runtime_config = impl_.runtime_config();

        let image = self.container_config(ctx, &runtime_config)?;
        validate_base_image(image)?;

        ctx.tui.validate()
            .map_err(|source| ExecError::TuiConfigInvalid{source})?;

        let script = impl_.script_body(&ctx.invowkfile.dir())
            .map_err(|source| ExecError::ResolveScriptFailed{source})?;

        if script.trim().is_empty() {
            return Err(ExecError::EmptyScript{
                command: ctx.command_name.clone(),
            });
        }

        Ok(())
    }

    fn execute(&self, ctx: &ExecutionContext) -> ExecutionResult {
        self.execute_with_io(ctx, &ctx.io, true)
    }

    fn execute_capture(&self, ctx: &ExecutionContext)
        -> Option<ExecutionResult>
    {
        Some(self.execute_with_io(ctx, &IoStreams::captured(), false))
    }

    fn prepare_command(&self, ctx: &ExecutionContext)
        -> Option<Result<PreparedCommand, ExecError>>
    {
        Some(self.build_prepared_command(ctx))
    }
}

// `validate_base_image` rejects images the provisioned binary can't run on:
// Windows images outright, and Alpine-based images because of musl
// incompatibilities with the glibc-linked binary.
fn validate_base_image(image: &str) -> Result<(), ExecError> {
    let lowered = image.to_ascii_lowercase();

    let is_windows =
        lowered.contains("windows")
        || lowered.contains("nanoserver")
        || lowered.contains("servercore");
    if is_windows {
        return Err(ExecError::WindowsImageNotSupported{
            image: image.to_string(),
        });
    }

    if lowered.contains("alpine") {
        return Err(ExecError::AlpineImageNotSupported{
            image: image.to_string(),
        });
    }

    Ok(())
}

// `container_workdir` maps the requested working directory into the
// container's filesystem: nothing requested lands in the workspace mount,
// relative paths are relative to it, absolute paths under the Invowkfile's
// directory are translated into it, and any other absolute path is taken
// as an in-container path as written.
fn container_workdir(choice: Option<&str>, invowkfile_dir: &Path) -> String {
    let dir =
        match choice {
            None | Some("") => return WORKSPACE_MOUNT.to_string(),
            Some(dir) => dir,
        };

    let path = Path::new(dir);

    if path.is_relative() {
        return format!("{WORKSPACE_MOUNT}/{dir}");
    }

    match path.strip_prefix(invowkfile_dir) {
        Ok(rel) => {
            if rel.as_os_str().is_empty() {
                WORKSPACE_MOUNT.to_string()
            } else {
                format!("{}/{}", WORKSPACE_MOUNT, rel.display())
            }
        },
        Err(_) => {
            dir.to_string()
        },
    }
}

fn flush_stderr(buffered: &OutputStream, stderr: &OutputStream) {
    let contents = buffered.contents();
    if !contents.is_empty() {
        let _ = stderr.write_all(contents.as_bytes());
    }
}
