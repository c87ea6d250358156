// Copyright 2025 Sean Kelleher. All rights reserved.
// Use of this source code is governed by an MIT
// licence that can be found in the LICENCE file.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

extern crate clap;
extern crate serde;
extern crate serde_yaml;
extern crate snafu;

use clap::Arg;
use clap::ArgMatches;
use clap::Command as ClapCommand;
use snafu::OptionExt;
use snafu::ResultExt;
use snafu::Snafu;

mod cancel;
mod container;
mod context;
mod dotenv;
mod engine;
mod env_builder;
mod interpreter;
mod invowkfile;
mod native;
mod process;
mod provision;
mod run_lock;
mod runtime;
mod ssh;
mod virtual_shell;

use cancel::CancelHandle;
use container::ContainerRuntime;
use context::ExecutionContext;
use context::ExecutionResult;
use context::IoStreams;
use context::TuiConfig;
use engine::CliEngine;
use engine::Engine;
use env_builder::EnvOptions;
use env_builder::InheritMode;
use invowkfile::FindAndParseInvowkfileError;
use invowkfile::RuntimeKind;
use native::NativeRuntime;
use provision::ProvisionConfig;
use runtime::RuntimeRegistry;
use ssh::LocalTokenIssuer;
use ssh::TokenIssuer;
use virtual_shell::VirtualRuntime;

const COMMAND_ARG: &str = "command";
const CMD_ARGS_ARG: &str = "args";
const ENV_FILE_FLAG: &str = "env-file";
const ENV_VAR_FLAG: &str = "env-var";
const WORKDIR_FLAG: &str = "workdir";
const ENV_INHERIT_FLAG: &str = "env-inherit";

fn main() {
    let invowk_file_name = "invowk.yaml";
    let run_about: &str = &format!(
        "Run a command defined in `{invowk_file_name}`",
    );
    let list_about: &str = &format!(
        "List the commands defined in `{invowk_file_name}`",
    );

    let args =
        ClapCommand::new("invowk")
            .version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
            .about(env!("CARGO_PKG_DESCRIPTION"))
            .subcommand_required(true)
            .arg_required_else_help(true)
            .subcommands(vec![
                ClapCommand::new("run")
                    .trailing_var_arg(true)
                    .about(run_about)
                    .args(&[
                        Arg::new(COMMAND_ARG)
                            .required(true)
                            .help("The command to run"),
                        Arg::new(ENV_FILE_FLAG)
                            .long(ENV_FILE_FLAG)
                            .takes_value(true)
                            .multiple_occurrences(true)
                            .help(
                                "Load extra environment variables from a \
                                 dotenv file (`path?` marks it optional)",
                            ),
                        Arg::new(ENV_VAR_FLAG)
                            .long(ENV_VAR_FLAG)
                            .takes_value(true)
                            .multiple_occurrences(true)
                            .help(
                                "Set an environment variable, in the form \
                                 `NAME=value`; overrides all other sources",
                            ),
                        Arg::new(WORKDIR_FLAG)
                            .long(WORKDIR_FLAG)
                            .takes_value(true)
                            .help(
                                "Override the command's working directory",
                            ),
                        Arg::new(ENV_INHERIT_FLAG)
                            .long(ENV_INHERIT_FLAG)
                            .takes_value(true)
                            .possible_values(["all", "allow", "none"])
                            .help(
                                "Override which host environment variables \
                                 the command inherits",
                            ),
                        Arg::new(CMD_ARGS_ARG)
                            .multiple_values(true)
                            .help("Positional arguments for the command"),
                    ]),
                ClapCommand::new("list")
                    .about(list_about),
            ])
            .get_matches();

    match args.subcommand() {
        Some(("run", sub_args)) => {
            std::process::exit(handle_run(invowk_file_name, sub_args));
        },
        Some(("list", _)) => {
            std::process::exit(handle_list(invowk_file_name));
        },
        subcommand => {
            // All subcommands are handled above, so matching an unhandled
            // command shouldn't happen.
            panic!("unexpected subcommand: '{subcommand:?}'");
        },
    }
}

fn handle_run(invowk_file_name: &str, args: &ArgMatches) -> i32 {
    match run_command(invowk_file_name, args) {
        Ok(result) => {
            if let Some(e) = &result.error {
                eprintln!("{e}");
            }

            result.exit_code
        },
        Err(e) => {
            eprintln!("{e}");

            1
        },
    }
}

fn run_command(invowk_file_name: &str, args: &ArgMatches)
    -> Result<ExecutionResult, RunCommandError>
{
    let conf = invowkfile::find_and_parse_invowkfile(invowk_file_name)
        .context(FindInvowkfileFailed)?;

    // `unwrap` is safe here because `clap` requires the argument.
    let command_name = args.value_of(COMMAND_ARG).unwrap().to_string();

    let command = conf.commands
        .get(&command_name)
        .context(CommandNotFound{name: command_name.clone()})?
        .clone();

    let selected_impl = command.select_implementation().cloned();
    let selected_runtime = selected_impl
        .as_ref()
        .map(|impl_| impl_.runtime)
        .unwrap_or(RuntimeKind::Native);

    let positional_args: Vec<String> =
        match args.values_of(CMD_ARGS_ARG) {
            Some(values) => values.map(ToString::to_string).collect(),
            None => vec![],
        };

    let cwd = env::current_dir()
        .context(GetCurrentDirFailed)?;

    let mut env_options = EnvOptions::new(cwd);

    if let Some(files) = args.values_of(ENV_FILE_FLAG) {
        env_options.env_files =
            files.map(ToString::to_string).collect();
    }

    if let Some(vars) = args.values_of(ENV_VAR_FLAG) {
        for var in vars {
            let (name, value) = var.split_once('=')
                .context(InvalidEnvVarFlag{value: var.to_string()})?;

            env_options.env_vars
                .insert(name.to_string(), value.to_string());
        }
    }

    if let Some(mode) = args.value_of(ENV_INHERIT_FLAG) {
        env_options.inherit_mode =
            match mode {
                "all" => Some(InheritMode::All),
                "allow" => Some(InheritMode::Allow),
                "none" => Some(InheritMode::None),
                // `clap` restricts the value to the set above.
                other => panic!("unexpected inheritance mode: '{other}'"),
            };
    }

    let registry = new_registry();

    let ctx = ExecutionContext{
        command_name,
        command,
        invowkfile: conf,
        selected_impl,
        selected_runtime,
        io: IoStreams::inherited(),
        env: env_options,
        workdir_override:
            args.value_of(WORKDIR_FLAG).map(ToString::to_string),
        positional_args,
        tui: TuiConfig::default(),
        cancel: CancelHandle::new(),
        execution_id: registry.new_execution_id(),
    };

    Ok(registry.execute(&ctx))
}

#[derive(Debug, Snafu)]
enum RunCommandError {
    #[snafu(display("{}", source))]
    FindInvowkfileFailed{source: FindAndParseInvowkfileError},
    #[snafu(display("Command '{}' isn't defined", name))]
    CommandNotFound{name: String},
    #[snafu(display("Couldn't get the current directory: {}", source))]
    GetCurrentDirFailed{source: std::io::Error},
    #[snafu(display(
        "'{}' isn't a valid `--env-var` value; expected `NAME=value`",
        value,
    ))]
    InvalidEnvVarFlag{value: String},
}

fn new_registry() -> RuntimeRegistry {
    let mut registry = RuntimeRegistry::new();

    registry.register(
        RuntimeKind::Native,
        Box::new(NativeRuntime::new()),
    );
    registry.register(
        RuntimeKind::Virtual,
        Box::new(VirtualRuntime::new()),
    );

    let docker = CliEngine::docker();
    let engine: Arc<dyn Engine> =
        if docker.available() {
            Arc::new(docker)
        } else {
            Arc::new(CliEngine::podman())
        };

    let binary_path = env::current_exe().unwrap_or_default();
    let mut provision = ProvisionConfig::new(binary_path);
    provision.modules_paths = module_paths();

    let mut container = ContainerRuntime::new(engine, provision);

    // The host SSH server is an external collaborator; when its port is
    // published, commands that enable `host_ssh` get per-invocation
    // credentials for it.
    if let Some(port) = ssh_server_port() {
        let issuer: Arc<dyn TokenIssuer> =
            Arc::new(LocalTokenIssuer::new(port));
        container = container.with_ssh_issuer(issuer);
    }

    registry.register(RuntimeKind::Container, Box::new(container));

    registry
}

fn module_paths() -> Vec<PathBuf> {
    match env::var_os("INVOWK_MODULE_PATH") {
        Some(paths) => env::split_paths(&paths).collect(),
        None => vec![],
    }
}

fn ssh_server_port() -> Option<u16> {
    env::var("INVOWK_SSH_SERVER_PORT").ok()?.parse().ok()
}

fn handle_list(invowk_file_name: &str) -> i32 {
    let conf =
        match invowkfile::find_and_parse_invowkfile(invowk_file_name) {
            Ok(conf) => {
                conf
            },
            Err(e) => {
                eprintln!("{e}");

                return 1;
            },
        };

    let mut names: Vec<_> = conf.commands.keys().collect();
    names.sort();

    let descriptions: HashMap<_, _> = conf.commands
        .iter()
        .map(|(name, command)| (name, command.description.clone()))
        .collect();

    for name in names {
        match descriptions.get(name).cloned().flatten() {
            Some(description) => println!("{name}\t{description}"),
            None => println!("{name}"),
        }
    }

    0
}
