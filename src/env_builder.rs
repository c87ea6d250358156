// Copyright 2025 Sean Kelleher. All rights reserved.
// Use of this source code is governed by an MIT
// licence that can be found in the LICENCE file.

//! Composition of the environment a command runs with.
//!
//! The final environment is merged from ten ordered sources, where later
//! sources override earlier ones on key collision:
//!
//! 1. the host environment, filtered by the inheritance policy,
//! 2. Invowkfile-level dotenv files,
//! 3. command-level dotenv files,
//! 4. implementation-level dotenv files,
//! 5. Invowkfile-level inline vars,
//! 6. command-level inline vars,
//! 7. implementation-level inline vars,
//! 8. tool-internal extra vars (positional parameters and metadata),
//! 9. `--env-file` dotenv files,
//! 10. `--env-var` inline overrides.
//!
//! Sources 2-4 resolve relative paths against the Invowkfile's directory;
//! source 9 resolves against the invocation's working directory.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::Error as IoError;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use snafu::ResultExt;
use snafu::Snafu;

use crate::context::ExecutionContext;
use crate::dotenv;
use crate::dotenv::ParseEnvError;

pub const VAR_CMD_NAME: &str = "INVOWK_CMD_NAME";
pub const VAR_RUNTIME: &str = "INVOWK_RUNTIME";
pub const VAR_SOURCE: &str = "INVOWK_SOURCE";
pub const VAR_PLATFORM: &str = "INVOWK_PLATFORM";

pub const ARG_PREFIX: &str = "INVOWK_ARG_";
pub const FLAG_PREFIX: &str = "INVOWK_FLAG_";

const METADATA_VARS: &[&str] =
    &[VAR_CMD_NAME, VAR_RUNTIME, VAR_SOURCE, VAR_PLATFORM];

// `InheritMode` controls which host variables a command starts from.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum InheritMode {
    All,
    Allow,
    None,
}

// `EnvOptions` holds the invocation-level environment inputs: extra
// tool-internal variables, `--env-file`/`--env-var` overrides, and the CLI
// overrides for the inheritance policy.
#[derive(Clone)]
pub struct EnvOptions {
    pub extra_env: HashMap<String, String>,
    pub env_files: Vec<String>,
    pub env_vars: HashMap<String, String>,
    pub inherit_mode: Option<InheritMode>,
    pub allow: Option<Vec<String>>,
    pub deny: Option<Vec<String>>,
    pub base_dir: PathBuf,
}

impl EnvOptions {
    pub fn new(base_dir: PathBuf) -> Self {
        EnvOptions{
            extra_env: HashMap::new(),
            env_files: vec![],
            env_vars: HashMap::new(),
            inherit_mode: None,
            allow: None,
            deny: None,
            base_dir,
        }
    }
}

// `build_env` produces the final environment for `ctx`. `default_mode` is
// the inheritance mode used when neither the implementation's runtime
// configuration nor the CLI overrides one; runtimes choose their own default
// (containers start from `None`).
pub fn build_env(ctx: &ExecutionContext, default_mode: InheritMode)
    -> Result<HashMap<String, String>, BuildEnvError>
{
    // Variables that aren't valid unicode can't be represented in the final
    // map, so they're dropped at this conversion boundary.
    let host: Vec<(String, String)> = env::vars_os()
        .filter_map(|(k, v)| {
            Some((k.into_string().ok()?, v.into_string().ok()?))
        })
        .collect();

    build_env_from_host(ctx, default_mode, &host)
}

// `build_env_from_host` is `build_env` with the host environment passed
// explicitly.
pub fn build_env_from_host(
    ctx: &ExecutionContext,
    default_mode: InheritMode,
    host: &[(String, String)],
)
    -> Result<HashMap<String, String>, BuildEnvError>
{
    let policy = resolve_policy(ctx, default_mode);

    let mut vars = HashMap::new();

    for (name, value) in host {
        if policy.inherits(name) {
            vars.insert(name.clone(), value.clone());
        }
    }

    let file_dir = ctx.invowkfile.dir();

    let file_levels = [
        ctx.invowkfile.env_files.as_ref(),
        ctx.command.env_files.as_ref(),
        ctx.selected_impl.as_ref().and_then(|i| i.env_files.as_ref()),
    ];

    for files in file_levels.into_iter().flatten() {
        for file in files {
            merge_env_file(&mut vars, &file_dir, file)?;
        }
    }

    let var_levels: Vec<Option<&HashMap<String, String>>> = vec![
        ctx.invowkfile.vars.as_ref(),
        ctx.command.vars.as_ref(),
        ctx.selected_impl.as_ref().and_then(|i| i.vars.as_ref()),
    ];

    for level in var_levels.into_iter().flatten() {
        for (k, v) in level {
            vars.insert(k.clone(), v.clone());
        }
    }

    for (k, v) in ctx.extra_env() {
        vars.insert(k, v);
    }

    for file in &ctx.env.env_files {
        merge_env_file(&mut vars, &ctx.env.base_dir, file)?;
    }

    for (k, v) in &ctx.env.env_vars {
        vars.insert(k.clone(), v.clone());
    }

    Ok(vars)
}

struct InheritPolicy {
    mode: InheritMode,
    allow: Vec<String>,
    deny: Vec<String>,
}

impl InheritPolicy {
    // `inherits` returns whether the host variable `name` survives the host
    // pass. The tool-reserved filter applies to the host pass only; later
    // sources may set reserved names deliberately.
    fn inherits(&self, name: &str) -> bool {
        if self.deny.iter().any(|d| d == name) {
            return false;
        }

        match self.mode {
            InheritMode::None => false,
            InheritMode::All => !is_reserved_host_var(name),
            InheritMode::Allow => {
                self.allow.iter().any(|a| a == name)
                    && !is_reserved_host_var(name)
            },
        }
    }
}

// The policy resolves through a three-level chain where later levels win:
// the runtime's default mode, the implementation's runtime configuration,
// and the CLI overrides on the context. The allow-list and deny-list resolve
// independently of the mode.
fn resolve_policy(ctx: &ExecutionContext, default_mode: InheritMode)
    -> InheritPolicy
{
    let runtime_config =
        ctx.selected_impl.as_ref().and_then(|i| i.runtime_config.clone());

    let config_mode = runtime_config.as_ref().and_then(|c| c.env_inherit);
    let config_allow =
        runtime_config.as_ref().and_then(|c| c.env_allow.clone());
    let config_deny =
        runtime_config.as_ref().and_then(|c| c.env_deny.clone());

    InheritPolicy{
        mode: ctx.env.inherit_mode.or(config_mode).unwrap_or(default_mode),
        allow: ctx.env.allow.clone().or(config_allow).unwrap_or_default(),
        deny: ctx.env.deny.clone().or(config_deny).unwrap_or_default(),
    }
}

// `is_reserved_host_var` returns whether `name` is reserved for passing
// tool-internal values *into* a child, and so must never be inherited from
// the host.
pub fn is_reserved_host_var(name: &str) -> bool {
    if name == "ARGC" {
        return true;
    }

    if let Some(suffix) = name.strip_prefix("ARG") {
        let is_positional =
            !suffix.is_empty()
            && suffix.chars().all(|c| c.is_ascii_digit())
            && suffix.parse::<u64>().map(|n| n >= 1).unwrap_or(false);

        if is_positional {
            return true;
        }
    }

    name.starts_with(ARG_PREFIX)
        || name.starts_with(FLAG_PREFIX)
        || METADATA_VARS.contains(&name)
}

// `merge_env_file` loads a single dotenv file into `vars`. A `?` suffix on
// the path marks the file as optional, in which case a missing file is
// skipped silently; a missing non-optional file is fatal.
fn merge_env_file(
    vars: &mut HashMap<String, String>,
    base_dir: &Path,
    file: &str,
)
    -> Result<(), BuildEnvError>
{
    let (raw_path, optional) =
        match file.strip_suffix('?') {
            Some(p) => (p, true),
            None => (file, false),
        };

    let path = base_dir.join(raw_path);

    let conts =
        match fs::read_to_string(&path) {
            Ok(conts) => {
                conts
            },
            Err(err) => {
                if optional && err.kind() == ErrorKind::NotFound {
                    return Ok(());
                }

                return Err(err)
                    .context(OpenEnvFileFailed{path});
            },
        };

    let pairs = dotenv::parse(&conts)
        .context(ParseEnvFileFailed{path})?;

    for (k, v) in pairs {
        vars.insert(k, v);
    }

    Ok(())
}

#[derive(Debug, Snafu)]
pub enum BuildEnvError {
    #[snafu(display(
        "Couldn't open the env file '{}': {}",
        path.display(),
        source,
    ))]
    OpenEnvFileFailed{source: IoError, path: PathBuf},
    #[snafu(display(
        "Couldn't parse the env file '{}': {}",
        path.display(),
        source,
    ))]
    ParseEnvFileFailed{source: ParseEnvError, path: PathBuf},
}

#[cfg(test)]
mod tests {
    use std::fs;

    use assert_matches::assert_matches;
    use maplit::hashmap;
    use tempfile::TempDir;

    use super::*;
    use crate::cancel::CancelHandle;
    use crate::context::IoStreams;
    use crate::context::TuiConfig;
    use crate::invowkfile::CommandConfig;
    use crate::invowkfile::Implementation;
    use crate::invowkfile::Invowkfile;
    use crate::invowkfile::RuntimeConfig;
    use crate::invowkfile::RuntimeKind;

    fn test_impl() -> Implementation {
        Implementation{
            platforms: None,
            runtime: RuntimeKind::Native,
            script: Some("true".to_string()),
            script_file: None,
            env_files: None,
            vars: None,
            workdir: None,
            runtime_config: None,
        }
    }

    fn test_ctx(dir: &TempDir) -> ExecutionContext {
        let invowkfile = Invowkfile{
            schema_version: "0.1".to_string(),
            env_files: None,
            vars: None,
            workdir: None,
            commands: HashMap::new(),
            path: dir.path().join("invowk.yaml"),
        };

        ExecutionContext{
            command_name: "test".to_string(),
            command: CommandConfig{
                description: None,
                env_files: None,
                vars: None,
                workdir: None,
                implementations: vec![test_impl()],
            },
            invowkfile,
            selected_impl: Some(test_impl()),
            selected_runtime: RuntimeKind::Native,
            io: IoStreams::captured(),
            env: EnvOptions::new(dir.path().to_path_buf()),
            workdir_override: None,
            positional_args: vec![],
            tui: TuiConfig::default(),
            cancel: CancelHandle::new(),
            execution_id: "0-0".to_string(),
        }
    }

    fn new_test_dir() -> TempDir {
        tempfile::tempdir()
            .expect("couldn't create temporary directory")
    }

    #[test]
    // Given the same variable defined at every level of the precedence
    //     ladder
    // When the environment is built
    // Then the `--env-var` value is used
    fn env_var_override_wins_the_ladder() {
        let dir = new_test_dir();
        fs::write(dir.path().join("root.env"), "KEY=root_file\n")
            .expect("couldn't write env file");
        fs::write(dir.path().join("cmd.env"), "KEY=cmd_file\n")
            .expect("couldn't write env file");
        fs::write(dir.path().join("impl.env"), "KEY=impl_file\n")
            .expect("couldn't write env file");
        fs::write(dir.path().join("cli.env"), "KEY=cli_file\n")
            .expect("couldn't write env file");

        let mut ctx = test_ctx(&dir);
        ctx.invowkfile.env_files = Some(vec!["root.env".to_string()]);
        ctx.invowkfile.vars =
            Some(hashmap!{"KEY".to_string() => "root".to_string()});
        ctx.command.env_files = Some(vec!["cmd.env".to_string()]);
        ctx.command.vars =
            Some(hashmap!{"KEY".to_string() => "cmd".to_string()});
        let mut impl_ = test_impl();
        impl_.env_files = Some(vec!["impl.env".to_string()]);
        impl_.vars = Some(hashmap!{"KEY".to_string() => "impl".to_string()});
        ctx.selected_impl = Some(impl_);
        ctx.env.extra_env.insert("KEY".to_string(), "extra".to_string());
        ctx.env.env_files = vec!["cli.env".to_string()];
        ctx.env.env_vars.insert("KEY".to_string(), "cli".to_string());

        let host = vec![("KEY".to_string(), "host".to_string())];
        let vars = build_env_from_host(&ctx, InheritMode::All, &host)
            .expect("couldn't build the environment");

        assert_eq!(vars.get("KEY").map(String::as_str), Some("cli"));
    }

    #[test]
    // Given a variable defined at each adjacent pair of levels
    // When the environment is built
    // Then the higher level of each pair wins
    fn each_level_overrides_the_previous() {
        let dir = new_test_dir();
        fs::write(dir.path().join("root.env"), "A=2\n")
            .expect("couldn't write env file");
        fs::write(dir.path().join("cmd.env"), "A=3\nB=3\n")
            .expect("couldn't write env file");
        fs::write(dir.path().join("impl.env"), "B=4\nC=4\n")
            .expect("couldn't write env file");
        fs::write(dir.path().join("cli.env"), "F=9\nG=9\n")
            .expect("couldn't write env file");

        let mut ctx = test_ctx(&dir);
        ctx.invowkfile.env_files = Some(vec!["root.env".to_string()]);
        ctx.command.env_files = Some(vec!["cmd.env".to_string()]);
        ctx.invowkfile.vars = Some(hashmap!{
            "C".to_string() => "5".to_string(),
            "D".to_string() => "5".to_string(),
        });
        ctx.command.vars = Some(hashmap!{
            "D".to_string() => "6".to_string(),
            "E".to_string() => "6".to_string(),
        });
        let mut impl_ = test_impl();
        impl_.env_files = Some(vec!["impl.env".to_string()]);
        impl_.vars = Some(hashmap!{
            "E".to_string() => "7".to_string(),
            "F".to_string() => "7".to_string(),
        });
        ctx.selected_impl = Some(impl_);
        ctx.env.env_files = vec!["cli.env".to_string()];
        ctx.env.env_vars.insert("G".to_string(), "10".to_string());

        let host = vec![("A".to_string(), "1".to_string())];
        let vars = build_env_from_host(&ctx, InheritMode::All, &host)
            .expect("couldn't build the environment");

        assert_eq!(vars.get("A").map(String::as_str), Some("3"));
        assert_eq!(vars.get("B").map(String::as_str), Some("4"));
        assert_eq!(vars.get("C").map(String::as_str), Some("5"));
        assert_eq!(vars.get("D").map(String::as_str), Some("6"));
        assert_eq!(vars.get("E").map(String::as_str), Some("7"));
        assert_eq!(vars.get("F").map(String::as_str), Some("9"));
        assert_eq!(vars.get("G").map(String::as_str), Some("10"));
    }

    #[test]
    // Given a host environment containing tool-reserved variables
    // When the environment is built with mode `All`
    // Then the reserved variables are filtered out and the rest are kept
    fn reserved_host_vars_are_filtered() {
        let dir = new_test_dir();
        let ctx = test_ctx(&dir);

        let host = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("ARGC".to_string(), "2".to_string()),
            ("ARG1".to_string(), "stale".to_string()),
            ("ARG12".to_string(), "stale".to_string()),
            ("ARGUMENT".to_string(), "kept".to_string()),
            ("INVOWK_ARG_NAME".to_string(), "stale".to_string()),
            ("INVOWK_FLAG_VERBOSE".to_string(), "stale".to_string()),
            ("INVOWK_CMD_NAME".to_string(), "stale".to_string()),
            ("INVOWK_RUNTIME".to_string(), "stale".to_string()),
            ("INVOWK_SOURCE".to_string(), "stale".to_string()),
            ("INVOWK_PLATFORM".to_string(), "stale".to_string()),
        ];
        let vars = build_env_from_host(&ctx, InheritMode::All, &host)
            .expect("couldn't build the environment");

        assert_eq!(vars.get("PATH").map(String::as_str), Some("/usr/bin"));
        assert_eq!(vars.get("ARGUMENT").map(String::as_str), Some("kept"));
        assert!(!vars.contains_key("ARG1"));
        assert!(!vars.contains_key("ARG12"));
        assert!(!vars.contains_key("INVOWK_ARG_NAME"));
        assert!(!vars.contains_key("INVOWK_FLAG_VERBOSE"));
        assert!(!vars.contains_key("INVOWK_CMD_NAME"));
        assert!(!vars.contains_key("INVOWK_RUNTIME"));
        assert!(!vars.contains_key("INVOWK_SOURCE"));
        assert!(!vars.contains_key("INVOWK_PLATFORM"));
        // `ARGC` set by the tool itself is present; only the host's copy is
        // dropped.
        assert_eq!(vars.get("ARGC").map(String::as_str), Some("0"));
    }

    #[test]
    // Given a host environment mixing reserved and ordinary names
    // When the environment is built with mode `All`
    // Then no host-originated value survives under a reserved name
    fn no_reserved_pattern_survives_the_host_pass() {
        let reserved = regex::Regex::new(
            r"^(ARGC|ARG[0-9]+|INVOWK_ARG_.*|INVOWK_FLAG_.*|INVOWK_CMD_NAME|INVOWK_RUNTIME|INVOWK_SOURCE|INVOWK_PLATFORM)$",
        )
            .expect("couldn't compile the reserved-name pattern");

        let names = [
            "PATH", "HOME", "ARGC", "ARG1", "ARG9", "ARG10", "ARGS",
            "INVOWK_ARG_X", "INVOWK_FLAG_Y", "INVOWK_CMD_NAME",
            "INVOWK_RUNTIME", "INVOWK_SOURCE", "INVOWK_PLATFORM",
            "INVOWKISH", "XINVOWK_ARG_Z",
        ];
        let host: Vec<(String, String)> = names
            .iter()
            .map(|n| (n.to_string(), "from-host".to_string()))
            .collect();

        let dir = new_test_dir();
        let ctx = test_ctx(&dir);
        let vars = build_env_from_host(&ctx, InheritMode::All, &host)
            .expect("couldn't build the environment");

        for (name, value) in &vars {
            if value == "from-host" {
                assert!(
                    !reserved.is_match(name),
                    "reserved name '{name}' was inherited from the host",
                );
            }
        }
        // Non-reserved lookalikes survive.
        assert!(vars.contains_key("ARGS"));
        assert!(vars.contains_key("INVOWKISH"));
        assert!(vars.contains_key("XINVOWK_ARG_Z"));
    }

    #[test]
    // Given inheritance mode `None`
    // When the environment is built
    // Then no host variables are inherited
    fn mode_none_inherits_nothing() {
        let dir = new_test_dir();
        let ctx = test_ctx(&dir);

        let host = vec![("PATH".to_string(), "/usr/bin".to_string())];
        let vars = build_env_from_host(&ctx, InheritMode::None, &host)
            .expect("couldn't build the environment");

        assert!(!vars.contains_key("PATH"));
    }

    #[test]
    // Given inheritance mode `Allow` with an allow-list
    // When the environment is built
    // Then only allow-listed host variables are inherited
    fn mode_allow_inherits_only_allow_list() {
        let dir = new_test_dir();
        let mut ctx = test_ctx(&dir);
        ctx.env.allow = Some(vec!["HOME".to_string()]);

        let host = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("HOME".to_string(), "/home/user".to_string()),
        ];
        let vars = build_env_from_host(&ctx, InheritMode::Allow, &host)
            .expect("couldn't build the environment");

        assert_eq!(vars.get("HOME").map(String::as_str), Some("/home/user"));
        assert!(!vars.contains_key("PATH"));
    }

    #[test]
    // Given a deny-list and inheritance mode `All`
    // When the environment is built
    // Then deny-listed host variables are dropped
    fn deny_list_applies_in_all_modes() {
        let dir = new_test_dir();
        let mut ctx = test_ctx(&dir);
        ctx.env.deny = Some(vec!["SECRET".to_string()]);

        let host = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("SECRET".to_string(), "hunter2".to_string()),
        ];
        let vars = build_env_from_host(&ctx, InheritMode::All, &host)
            .expect("couldn't build the environment");

        assert_eq!(vars.get("PATH").map(String::as_str), Some("/usr/bin"));
        assert!(!vars.contains_key("SECRET"));
    }

    #[test]
    // Given an implementation whose runtime configuration sets an
    //     inheritance mode
    // When the environment is built with a different default mode
    // Then the implementation's mode wins over the default
    fn config_mode_overrides_default() {
        let dir = new_test_dir();
        let mut ctx = test_ctx(&dir);
        let mut impl_ = test_impl();
        impl_.runtime_config = Some(RuntimeConfig{
            env_inherit: Some(InheritMode::None),
            ..RuntimeConfig::default()
        });
        ctx.selected_impl = Some(impl_);

        let host = vec![("PATH".to_string(), "/usr/bin".to_string())];
        let vars = build_env_from_host(&ctx, InheritMode::All, &host)
            .expect("couldn't build the environment");

        assert!(!vars.contains_key("PATH"));
    }

    #[test]
    // Given a CLI inheritance override and a conflicting implementation mode
    // When the environment is built
    // Then the CLI override wins
    fn cli_mode_overrides_config() {
        let dir = new_test_dir();
        let mut ctx = test_ctx(&dir);
        let mut impl_ = test_impl();
        impl_.runtime_config = Some(RuntimeConfig{
            env_inherit: Some(InheritMode::None),
            ..RuntimeConfig::default()
        });
        ctx.selected_impl = Some(impl_);
        ctx.env.inherit_mode = Some(InheritMode::All);

        let host = vec![("PATH".to_string(), "/usr/bin".to_string())];
        let vars = build_env_from_host(&ctx, InheritMode::None, &host)
            .expect("couldn't build the environment");

        assert_eq!(vars.get("PATH").map(String::as_str), Some("/usr/bin"));
    }

    #[test]
    // Given an optional dotenv file that doesn't exist
    // When the environment is built
    // Then the build succeeds and the file contributes nothing
    fn missing_optional_env_file_is_skipped() {
        let dir = new_test_dir();
        let mut ctx = test_ctx(&dir);
        ctx.invowkfile.env_files = Some(vec!["nonexistent.env?".to_string()]);

        let vars = build_env_from_host(&ctx, InheritMode::None, &[])
            .expect("couldn't build the environment");

        // The tool-internal variables are always present.
        assert_eq!(vars.get("ARGC").map(String::as_str), Some("0"));
        assert!(!vars.contains_key("nonexistent"));
    }

    #[test]
    // Given a non-optional dotenv file that doesn't exist
    // When the environment is built
    // Then the build fails naming the file
    fn missing_required_env_file_is_fatal() {
        let dir = new_test_dir();
        let mut ctx = test_ctx(&dir);
        ctx.invowkfile.env_files = Some(vec!["nonexistent.env".to_string()]);

        let result = build_env_from_host(&ctx, InheritMode::None, &[]);

        assert_matches!(result, Err(BuildEnvError::OpenEnvFileFailed{..}));
    }

    #[test]
    // Given a dotenv file with a syntax error
    // When the environment is built
    // Then the build fails with the parse error
    fn malformed_env_file_is_fatal() {
        let dir = new_test_dir();
        fs::write(dir.path().join("bad.env"), "not-an-assignment\n")
            .expect("couldn't write env file");
        let mut ctx = test_ctx(&dir);
        ctx.invowkfile.env_files = Some(vec!["bad.env".to_string()]);

        let result = build_env_from_host(&ctx, InheritMode::None, &[]);

        assert_matches!(result, Err(BuildEnvError::ParseEnvFileFailed{..}));
    }

    #[test]
    // Given a fixed host environment and configuration
    // When the environment is built twice
    // Then both builds yield identical maps
    fn builds_are_deterministic() {
        let dir = new_test_dir();
        fs::write(dir.path().join("root.env"), "A=1\nB=2\n")
            .expect("couldn't write env file");
        let mut ctx = test_ctx(&dir);
        ctx.invowkfile.env_files = Some(vec!["root.env".to_string()]);
        ctx.invowkfile.vars =
            Some(hashmap!{"C".to_string() => "3".to_string()});

        let host = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("HOME".to_string(), "/home/user".to_string()),
        ];

        let first = build_env_from_host(&ctx, InheritMode::All, &host)
            .expect("couldn't build the environment");
        let second = build_env_from_host(&ctx, InheritMode::All, &host)
            .expect("couldn't build the environment");

        assert_eq!(first, second);
    }

    #[test]
    // Given positional arguments on the context
    // When the environment is built
    // Then `ARG<n>` and `ARGC` are set from the arguments
    fn positional_args_are_exported() {
        let dir = new_test_dir();
        let mut ctx = test_ctx(&dir);
        ctx.positional_args =
            vec!["hello".to_string(), "world".to_string()];

        let vars = build_env_from_host(&ctx, InheritMode::None, &[])
            .expect("couldn't build the environment");

        assert_eq!(vars.get("ARGC").map(String::as_str), Some("2"));
        assert_eq!(vars.get("ARG1").map(String::as_str), Some("hello"));
        assert_eq!(vars.get("ARG2").map(String::as_str), Some("world"));
        assert_eq!(
            vars.get(VAR_CMD_NAME).map(String::as_str),
            Some("test"),
        );
    }
}
