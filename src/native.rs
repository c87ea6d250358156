// Copyright 2025 Sean Kelleher. All rights reserved.
// Use of this source code is governed by an MIT
// licence that can be found in the LICENCE file.

//! The native runtime, which runs scripts through a host shell or an
//! interpreter discovered from the script's shebang.

use std::ffi::OsStr;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use crate::context::ExecError;
use crate::context::ExecutionContext;
use crate::context::ExecutionResult;
use crate::context::IoStreams;
use crate::env_builder;
use crate::env_builder::InheritMode;
use crate::interpreter;
use crate::process;
use crate::process::RunSpec;
use crate::runtime::Runtime;

pub struct NativeRuntime {
    // An explicitly-configured shell; discovery failures for it surface at
    // exec time rather than here.
    shell: Option<String>,
}

impl NativeRuntime {
    pub fn new() -> Self {
        NativeRuntime{shell: None}
    }

    pub fn with_shell(shell: String) -> Self {
        NativeRuntime{shell: Some(shell)}
    }

    fn select_shell(&self) -> String {
        if let Some(shell) = &self.shell {
            return shell.clone();
        }

        if cfg!(windows) {
            for candidate in ["pwsh", "powershell"] {
                if interpreter::resolve_on_path(candidate).is_some() {
                    return candidate.to_string();
                }
            }

            "cmd".to_string()
        } else {
            if let Ok(shell) = std::env::var("SHELL") {
                if !shell.is_empty() {
                    return shell;
                }
            }

            if interpreter::resolve_on_path("bash").is_some() {
                "bash".to_string()
            } else {
                "sh".to_string()
            }
        }
    }

    fn run(&self, ctx: &ExecutionContext, io: &IoStreams)
        -> Result<i32, ExecError>
    {
        let impl_ = ctx.implementation()?;

        let env = env_builder::build_env(ctx, InheritMode::All)
            .map_err(|source| ExecError::BuildEnvFailed{source})?;

        let workdir = resolve_workdir(ctx)?;

        let script = impl_.script_body(&ctx.invowkfile.dir())
            .map_err(|source| ExecError::ResolveScriptFailed{source})?;

        let runtime_config = impl_.runtime_config();
        let maybe_interp = interpreter::resolve(
            runtime_config.interpreter.as_deref(),
            &script,
        );

        let status =
            if let Some(interp) = maybe_interp {
                let prog = interpreter::resolve_on_path(&interp.prog)
                    .ok_or_else(|| ExecError::InterpreterNotFound{
                        interpreter: interp.prog.clone(),
                    })?;

                // Scripts stored in a file are run in place; inline scripts
                // are staged to a temp file that's removed after the run.
                let mut staged = None;
                let script_path =
                    if let Some(file) = &impl_.script_file {
                        ctx.invowkfile.dir().join(file)
                    } else {
                        let file = stage_script(&interp.prog, &script)?;
                        let path = file.path().to_path_buf();
                        staged = Some(file);

                        path
                    };

                let mut args: Vec<OsString> = interp.args
                    .iter()
                    .map(OsString::from)
                    .collect();
                args.push(script_path.into_os_string());
                args.extend(
                    ctx.positional_args.iter().map(OsString::from),
                );

                let status = process::run(
                    RunSpec{
                        prog: prog.as_os_str(),
                        args: args.iter().map(OsString::as_os_str).collect(),
                        env: Some(&env),
                        workdir: Some(&workdir),
                        stdin: io.stdin.to_stdio(),
                    },
                    &io.stdout,
                    &io.stderr,
                )
                    .map_err(|source| ExecError::ProcessRunFailed{source})?;

                drop(staged);

                status
            } else {
                let shell = self.select_shell();
                let args = shell_invocation_args(
                    &shell,
                    &script,
                    &ctx.positional_args,
                );

                process::run(
                    RunSpec{
                        prog: OsStr::new(&shell),
                        args: args.iter().map(|a| OsStr::new(a.as_str()))
                            .collect(),
                        env: Some(&env),
                        workdir: Some(&workdir),
                        stdin: io.stdin.to_stdio(),
                    },
                    &io.stdout,
                    &io.stderr,
                )
                    .map_err(|source| ExecError::ProcessRunFailed{source})?
            };

        Ok(process::exit_code(status))
    }

    fn execute_with_io(&self, ctx: &ExecutionContext, io: &IoStreams)
        -> ExecutionResult
    {
        match self.run(ctx, io) {
            Ok(code) => {
                let mut result = ExecutionResult::from_exit_code(code);
                result.stdout = io.stdout.contents();
                result.stderr = io.stderr.contents();

                result
            },
            Err(e) => {
                ExecutionResult::from_error(e)
            },
        }
    }
}

impl Default for NativeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime for NativeRuntime {
    fn name(&self) -> &'static str {
        "native"
    }

    fn available(&self) -> bool {
        true
    }

    fn validate(&self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        let impl_ = ctx.implementation()?;

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
        self.execute_with_io(ctx, &ctx.io)
    }

    fn execute_capture(&self, ctx: &ExecutionContext)
        -> Option<ExecutionResult>
    {
        Some(self.execute_with_io(ctx, &IoStreams::captured()))
    }
}

fn stage_script(interp_prog: &str, script: &str)
    -> Result<tempfile::NamedTempFile, ExecError>
{
    let ext = interpreter::temp_file_extension(interp_prog);

    let mut builder = tempfile::Builder::new();
    builder.prefix("invowk-script-");
    if !ext.is_empty() {
        builder.suffix(ext);
    }

    let mut file = builder.tempfile()
        .map_err(|source| ExecError::StageScriptFailed{source})?;

    file.write_all(script.as_bytes())
        .map_err(|source| ExecError::StageScriptFailed{source})?;

    Ok(file)
}

// `shell_invocation_args` shapes the argument list per shell family, keyed
// on the shell's basename with any `.exe` suffix stripped.
pub fn shell_invocation_args(
    shell: &str,
    script: &str,
    positional_args: &[String],
)
    -> Vec<String>
{
    let base = Path::new(shell)
        .file_name()
        .and_then(OsStr::to_str)
        .unwrap_or(shell)
        .to_ascii_lowercase();
    let base = base.trim_end_matches(".exe");

    match base {
        // `cmd` has no positional-parameter semantics compatible with the
        // POSIX form, so positional arguments aren't forwarded.
        "cmd" => {
            vec!["/C".to_string(), script.to_string()]
        },
        "powershell" | "pwsh" => {
            let mut args = vec![
                "-NoProfile".to_string(),
                "-Command".to_string(),
                script.to_string(),
            ];
            args.extend(positional_args.iter().cloned());

            args
        },
        _ => {
            let mut args = vec![
                "-c".to_string(),
                script.to_string(),
                // `$0` for the script.
                "invowk".to_string(),
            ];
            args.extend(positional_args.iter().cloned());

            args
        },
    }
}

// `resolve_workdir` applies the working-directory fallback chain: the CLI
// override, then the implementation, command and Invowkfile levels, and
// finally the directory containing the Invowkfile. The result is validated
// up front for a clearer error than the one `exec` would give.
pub fn resolve_workdir(ctx: &ExecutionContext)
    -> Result<PathBuf, ExecError>
{
    let impl_ = ctx.implementation()?;

    let choice = ctx.workdir_override
        .clone()
        .or_else(|| impl_.workdir.clone())
        .or_else(|| ctx.command.workdir.clone())
        .or_else(|| ctx.invowkfile.workdir.clone());

    let path =
        match choice {
            Some(dir) => PathBuf::from(dir),
            None => ctx.invowkfile.dir(),
        };

    let meta = fs::metadata(&path)
        .map_err(|source| ExecError::WorkdirInvalid{
            source,
            path: path.clone(),
        })?;

    if !meta.is_dir() {
        return Err(ExecError::WorkdirNotADirectory{path});
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;
    use crate::cancel::CancelHandle;
    use crate::context::TuiConfig;
    use crate::env_builder::EnvOptions;
    use crate::invowkfile::CommandConfig;
    use crate::invowkfile::Implementation;
    use crate::invowkfile::Invowkfile;
    use crate::invowkfile::RuntimeConfig;
    use crate::invowkfile::RuntimeKind;

    fn script_impl(script: &str) -> Implementation {
        Implementation{
            platforms: None,
            runtime: RuntimeKind::Native,
            script: Some(script.to_string()),
            script_file: None,
            env_files: None,
            vars: None,
            workdir: None,
            runtime_config: None,
        }
    }

    fn test_ctx(dir: &Path, impl_: Implementation) -> ExecutionContext {
        ExecutionContext{
            command_name: "test".to_string(),
            command: CommandConfig{
                description: None,
                env_files: None,
                vars: None,
                workdir: None,
                implementations: vec![impl_.clone()],
            },
            invowkfile: Invowkfile{
                schema_version: "0.1".to_string(),
                env_files: None,
                vars: None,
                workdir: None,
                commands: HashMap::new(),
                path: dir.join("invowk.yaml"),
            },
            selected_impl: Some(impl_),
            selected_runtime: RuntimeKind::Native,
            io: IoStreams::captured(),
            env: EnvOptions::new(dir.to_path_buf()),
            workdir_override: None,
            positional_args: vec![],
            tui: TuiConfig::default(),
            cancel: CancelHandle::new(),
            execution_id: "0-0".to_string(),
        }
    }

    #[test]
    // Given an inline script that echoes its positional parameters
    // When the command is executed with two positional arguments
    // Then the command succeeds and the output contains both arguments
    fn positional_args_reach_the_script() {
        let dir = tempfile::tempdir()
            .expect("couldn't create temporary directory");
        let mut ctx = test_ctx(
            dir.path(),
            script_impl(r#"echo "arg1=$1 arg2=$2""#),
        );
        ctx.positional_args =
            vec!["hello".to_string(), "world".to_string()];

        let runtime = NativeRuntime::with_shell("sh".to_string());
        let result = runtime.execute_capture(&ctx)
            .expect("the native runtime doesn't support capture");

        assert!(result.success(), "error: {:?}", result.error);
        assert!(result.stdout.contains("arg1=hello arg2=world"));
    }

    #[test]
    // Given an inline script with a shebang naming `sh`
    // When the command is executed with interpreter `auto`
    // Then the script is staged and run through the interpreter
    fn auto_interpreter_runs_shebang_program() {
        let dir = tempfile::tempdir()
            .expect("couldn't create temporary directory");
        let mut impl_ = script_impl("#!/usr/bin/env sh\necho ok");
        impl_.runtime_config = Some(RuntimeConfig{
            interpreter: Some("auto".to_string()),
            ..RuntimeConfig::default()
        });
        let ctx = test_ctx(dir.path(), impl_);

        let runtime = NativeRuntime::new();
        let result = runtime.execute_capture(&ctx)
            .expect("the native runtime doesn't support capture");

        assert!(result.success(), "error: {:?}", result.error);
        assert_eq!(result.stdout, "ok\n");
    }

    #[test]
    // Given an implementation naming an interpreter that isn't on PATH
    // When the command is executed
    // Then the result reports that the interpreter was not found
    fn missing_interpreter_is_reported() {
        let dir = tempfile::tempdir()
            .expect("couldn't create temporary directory");
        let mut impl_ = script_impl("print('ok')");
        impl_.runtime_config = Some(RuntimeConfig{
            interpreter: Some("no-such-interp-xyz".to_string()),
            ..RuntimeConfig::default()
        });
        let ctx = test_ctx(dir.path(), impl_);

        let runtime = NativeRuntime::new();
        let result = runtime.execute(&ctx);

        assert_eq!(result.exit_code, 1);
        let err = result.error
            .expect("no terminal error was reported");
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    // Given a command-level workdir
    // When the script prints its working directory
    // Then the command-level workdir was used
    fn command_workdir_is_applied() {
        let dir = tempfile::tempdir()
            .expect("couldn't create temporary directory");
        let sub = dir.path().join("sub");
        fs::create_dir(&sub)
            .expect("couldn't create subdirectory");

        let mut ctx = test_ctx(dir.path(), script_impl("pwd"));
        ctx.command.workdir = Some(sub.display().to_string());

        let runtime = NativeRuntime::with_shell("sh".to_string());
        let result = runtime.execute_capture(&ctx)
            .expect("the native runtime doesn't support capture");

        assert!(result.success(), "error: {:?}", result.error);
        let printed = PathBuf::from(result.stdout.trim());
        assert_eq!(
            printed.canonicalize().ok(),
            sub.canonicalize().ok(),
        );
    }

    #[test]
    // Given a nonexistent workdir override
    // When the working directory is resolved
    // Then resolution fails
    fn invalid_workdir_is_rejected() {
        let dir = tempfile::tempdir()
            .expect("couldn't create temporary directory");
        let mut ctx = test_ctx(dir.path(), script_impl("true"));
        ctx.workdir_override = Some("/no/such/dir/xyz".to_string());

        let result = resolve_workdir(&ctx);

        assert_matches!(result, Err(ExecError::WorkdirInvalid{..}));
    }

    #[test]
    // Given an implementation with an empty script
    // When the context is validated
    // Then validation fails with an empty-script error
    fn empty_script_fails_validation() {
        let dir = tempfile::tempdir()
            .expect("couldn't create temporary directory");
        let ctx = test_ctx(dir.path(), script_impl("   \n"));

        let runtime = NativeRuntime::new();

        assert_matches!(
            runtime.validate(&ctx),
            Err(ExecError::EmptyScript{..})
        );
    }

    #[test]
    fn posix_shells_get_dash_c_and_positional_args() {
        let args = shell_invocation_args(
            "/bin/bash",
            "echo hi",
            &["a".to_string(), "b".to_string()],
        );

        assert_eq!(
            args,
            vec!["-c", "echo hi", "invowk", "a", "b"],
        );
    }

    #[test]
    fn cmd_gets_slash_c_without_positional_args() {
        let args = shell_invocation_args(
            "cmd.exe",
            "echo hi",
            &["a".to_string()],
        );

        assert_eq!(args, vec!["/C", "echo hi"]);
    }

    #[test]
    fn powershell_gets_no_profile_command() {
        let args = shell_invocation_args(
            "pwsh",
            "echo hi",
            &["a".to_string()],
        );

        assert_eq!(args, vec!["-NoProfile", "-Command", "echo hi", "a"]);
    }
}
