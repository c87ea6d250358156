// Copyright 2025 Sean Kelleher. All rights reserved.
// Use of this source code is governed by an MIT
// licence that can be found in the LICENCE file.

//! The `invowk.yaml` data model and its discovery.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs::File;
use std::io::Error as IoError;
use std::io::ErrorKind;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde_yaml::Error as SerdeYamlError;
use serde_yaml::Value;
use snafu::OptionExt;
use snafu::ResultExt;
use snafu::Snafu;

use crate::env_builder::InheritMode;

#[derive(Clone, Deserialize)]
pub struct Invowkfile {
    pub schema_version: String,
    pub env_files: Option<Vec<String>>,
    pub vars: Option<HashMap<String, String>>,
    pub workdir: Option<String>,
    pub commands: HashMap<String, CommandConfig>,

    // `path` isn't part of the schema; it's filled in after parsing with the
    // location the file was loaded from.
    #[serde(skip)]
    pub path: PathBuf,
}

impl Invowkfile {
    // `dir` returns the directory containing the Invowkfile, which is the
    // base for all paths that the Invowkfile declares as relative.
    pub fn dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"))
    }
}

#[derive(Clone, Deserialize)]
pub struct CommandConfig {
    pub description: Option<String>,
    pub env_files: Option<Vec<String>>,
    pub vars: Option<HashMap<String, String>>,
    pub workdir: Option<String>,
    pub implementations: Vec<Implementation>,
}

impl CommandConfig {
    // `select_implementation` returns the first implementation whose platform
    // list includes the current platform; an absent platform list matches any
    // platform.
    pub fn select_implementation(&self) -> Option<&Implementation> {
        let platform = current_platform();

        self.implementations
            .iter()
            .find(|impl_| match &impl_.platforms {
                Some(platforms) => platforms.contains(&platform),
                None => true,
            })
    }
}

#[derive(Clone, Deserialize)]
pub struct Implementation {
    pub platforms: Option<Vec<Platform>>,
    pub runtime: RuntimeKind,
    pub script: Option<String>,
    pub script_file: Option<PathBuf>,
    pub env_files: Option<Vec<String>>,
    pub vars: Option<HashMap<String, String>>,
    pub workdir: Option<String>,
    pub runtime_config: Option<RuntimeConfig>,
}

impl Implementation {
    // `script_body` returns the inline script, or the contents of
    // `script_file` resolved against `base_dir`.
    pub fn script_body(&self, base_dir: &Path)
        -> Result<String, ScriptBodyError>
    {
        if let Some(script) = &self.script {
            return Ok(script.clone());
        }

        let rel_path = self.script_file.as_ref()
            .context(NoScriptDefined)?;

        let path = base_dir.join(rel_path);

        let mut body = String::new();
        File::open(&path)
            .and_then(|mut f| f.read_to_string(&mut body))
            .context(ReadScriptFileFailed{path: path.clone()})?;

        Ok(body)
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        self.runtime_config.clone().unwrap_or_default()
    }
}

#[derive(Debug, Snafu)]
pub enum ScriptBodyError {
    #[snafu(display("No `script` or `script_file` was defined"))]
    NoScriptDefined,
    #[snafu(display(
        "Couldn't read the script file '{}': {}",
        path.display(),
        source,
    ))]
    ReadScriptFileFailed{source: IoError, path: PathBuf},
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linux,
    Macos,
    Windows,
}

pub fn current_platform() -> Platform {
    if cfg!(target_os = "windows") {
        Platform::Windows
    } else if cfg!(target_os = "macos") {
        Platform::Macos
    } else {
        Platform::Linux
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name =
            match self {
                Self::Linux => "linux",
                Self::Macos => "macos",
                Self::Windows => "windows",
            };

        write!(f, "{name}")
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    Native,
    Virtual,
    Container,
}

impl RuntimeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Virtual => "virtual",
            Self::Container => "container",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    pub interpreter: Option<String>,
    pub shell: Option<String>,
    pub image: Option<String>,
    pub volumes: Option<Vec<String>>,
    pub host_ssh: Option<bool>,
    pub env_inherit: Option<InheritMode>,
    pub env_allow: Option<Vec<String>>,
    pub env_deny: Option<Vec<String>>,
}

pub fn find_and_parse_invowkfile(file_name: &str)
    -> Result<Invowkfile, FindAndParseInvowkfileError>
{
    let cwd = env::current_dir()
        .context(GetCurrentDirFailed)?;

    let (dir, conf_reader) = find_and_open_file(&cwd, file_name)
        .context(OpenInvowkfileFailed)?
        .context(InvowkfileNotFound)?;

    let mut conf = parse_invowkfile(conf_reader)
        .context(ParseInvowkfileFailed)?;

    conf.path = dir.join(file_name);

    Ok(conf)
}

#[derive(Debug, Snafu)]
pub enum FindAndParseInvowkfileError {
    #[snafu(display("Couldn't get the current directory: {}", source))]
    GetCurrentDirFailed{source: IoError},
    #[snafu(display("Couldn't find an Invowkfile"))]
    InvowkfileNotFound,
    #[snafu(display("Couldn't open: {}", source))]
    OpenInvowkfileFailed{source: FindAndOpenFileError},
    #[snafu(display("Couldn't parse: {}", source))]
    ParseInvowkfileFailed{source: ParseInvowkfileError},
}

pub fn parse_invowkfile(file: File)
    -> Result<Invowkfile, ParseInvowkfileError>
{
    let conf_value: Value = serde_yaml::from_reader(file)
        .context(ParseYamlFailed)?;

    let vsn = conf_value.get("schema_version")
        .context(MissingSchemaVersion)?;

    if vsn != "0.1" {
        // TODO Add `vsn` to the error context.
        return Err(ParseInvowkfileError::UnsupportedSchemaVersion);
    }

    let conf: Invowkfile = serde_yaml::from_value(conf_value)
        .context(ParseSchemaFailed)?;

    Ok(conf)
}

#[derive(Debug, Snafu)]
pub enum ParseInvowkfileError {
    #[snafu(display("Couldn't parse: {}", source))]
    ParseYamlFailed{source: SerdeYamlError},
    #[snafu(display("Only `schema_version` 0.1 is currently supported"))]
    UnsupportedSchemaVersion,
    #[snafu(display("Missing `schema_version` field"))]
    MissingSchemaVersion,
    #[snafu(display("Parsed YAML didn't conform to schema: {}", source))]
    ParseSchemaFailed{source: SerdeYamlError},
}

// `find_and_open_file` reads the file named `file_name` in `start` or the
// deepest of `start`s ancestor directories that contains a file named
// `file_name`.
fn find_and_open_file(start: &Path, file_name: &str)
    -> Result<Option<(PathBuf, File)>, FindAndOpenFileError>
{
    let mut cur_dir = start.to_path_buf();
    loop {
        let path = cur_dir.clone().join(file_name);

        let maybe_conts = try_open(&path)
            .context(ReadFailed{path})?;

        if let Some(conts) = maybe_conts {
            return Ok(Some((cur_dir, conts)));
        }

        if !cur_dir.pop() {
            return Ok(None);
        }
    }
}

#[derive(Debug, Snafu)]
pub enum FindAndOpenFileError {
    ReadFailed{source: IoError, path: PathBuf},
}

// `try_open` returns `path` opened in read-only mode, or `None` if it doesn't
// exist, or an error if one occurred.
fn try_open<P: AsRef<Path>>(path: P) -> Result<Option<File>, IoError> {
    match File::open(path) {
        Ok(conts) => {
            Ok(Some(conts))
        },
        Err(err) => {
            if err.kind() == ErrorKind::NotFound {
                Ok(None)
            } else {
                Err(err)
            }
        },
    }
}
