// Copyright 2025 Sean Kelleher. All rights reserved.
// Use of this source code is governed by an MIT
// licence that can be found in the LICENCE file.

//! The layer provisioner, which overlays the `invowk` binary and a module
//! tree onto a user-chosen base image so that commands can invoke `invowk`
//! again from inside their container.
//!
//! Derived images are content-addressed: the tag is a pure function of the
//! base image identifier, the binary's content hash, and fast dirhashes of
//! the module trees and the Invowkfile's directory, so unchanged inputs
//! reuse the image already in the engine's cache.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::Error as IoError;
use std::path::Path;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use snafu::ResultExt;
use snafu::Snafu;

use crate::engine::BuildEngineError;
use crate::engine::BuildOpts;
use crate::engine::Engine;
use crate::runtime::Cleanup;

pub const PROVISIONED_TAG_PREFIX: &str = "invowk-provisioned:";
pub const DEFAULT_BINARY_MOUNT_PATH: &str = "/invowk/bin";
pub const DEFAULT_MODULES_MOUNT_PATH: &str = "/invowk/modules";

const BUILD_FILE_NAME: &str = "Containerfile";

#[derive(Clone)]
pub struct ProvisionConfig {
    pub enabled: bool,
    pub binary_path: PathBuf,
    pub modules_paths: Vec<PathBuf>,
    pub binary_mount_path: String,
    pub modules_mount_path: String,
    // With `strict` set, a provisioning failure fails the command instead
    // of degrading to the base image.
    pub strict: bool,
    // An explicit build-context location, overriding the default chain.
    pub cache_dir: Option<PathBuf>,
}

impl ProvisionConfig {
    pub fn new(binary_path: PathBuf) -> Self {
        ProvisionConfig{
            enabled: true,
            binary_path,
            modules_paths: vec![],
            binary_mount_path: DEFAULT_BINARY_MOUNT_PATH.to_string(),
            modules_mount_path: DEFAULT_MODULES_MOUNT_PATH.to_string(),
            strict: false,
            cache_dir: None,
        }
    }
}

pub struct Provisioned {
    pub image_tag: String,
    // Duplicates of the provisioned image's environment, for callers that
    // want the values without inspecting the image.
    pub env_vars: HashMap<String, String>,
    // Removes the build context; the image itself stays in the engine's
    // cache for reuse.
    pub cleanup: Cleanup,
}

// `ensure_provisioned` returns the derived image for (`base_image`, binary,
// modules, Invowkfile directory), building it through `engine` unless the
// engine already has the tag.
pub fn ensure_provisioned(
    engine: &dyn Engine,
    config: &ProvisionConfig,
    base_image: &str,
    invowkfile_dir: &Path,
)
    -> Result<Provisioned, ProvisionError>
{
    let tag = provisioned_tag(config, base_image, invowkfile_dir)?;

    let env_vars = provisioned_env(config);

    if engine.image_exists(&tag) {
        return Ok(Provisioned{
            image_tag: tag,
            env_vars,
            cleanup: Cleanup::new(),
        });
    }

    let context_dir = create_build_context(config, &tag)?;

    let mut cleanup = Cleanup::new();
    let cleanup_dir = context_dir.clone();
    cleanup.push(move || {
        let _ = fs::remove_dir_all(&cleanup_dir);
    });

    let result = populate_and_build(
        engine,
        config,
        base_image,
        &tag,
        &context_dir,
    );

    if let Err(e) = result {
        cleanup.run();

        return Err(e);
    }

    Ok(Provisioned{image_tag: tag, env_vars, cleanup})
}

fn provisioned_env(config: &ProvisionConfig) -> HashMap<String, String> {
    let mut env_vars = HashMap::new();
    env_vars.insert(
        "INVOWK_MODULE_PATH".to_string(),
        config.modules_mount_path.clone(),
    );

    env_vars
}

// `provisioned_tag` derives the content-addressed tag. The base image
// contributes its identifier as written; the binary contributes a full
// content hash; module trees and the Invowkfile directory contribute
// dirhashes, which trade cryptographic strength for fast change detection.
pub fn provisioned_tag(
    config: &ProvisionConfig,
    base_image: &str,
    invowkfile_dir: &Path,
)
    -> Result<String, ProvisionError>
{
    let binary_hash = sha256::try_digest(config.binary_path.as_path())
        .context(HashBinaryFailed{path: config.binary_path.clone()})?;

    let mut records = String::new();
    records += &format!("image:{base_image}\n");
    records += &format!("binary:{binary_hash}\n");

    for path in &config.modules_paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        records += &format!("module:{}:{}\n", name, dirhash(path));
    }

    records += &format!("taskfile:{}\n", dirhash(invowkfile_dir));

    let cache_key = sha256::digest(records);

    Ok(format!("{}{}", PROVISIONED_TAG_PREFIX, &cache_key[..12]))
}

// `dirhash` digests the sorted `<relpath>:<size>:<mtime>` records of every
// file under `root`. Unreadable files are skipped.
pub fn dirhash(root: &Path) -> String {
    let mut records = vec![];
    collect_file_records(root, root, &mut records);
    records.sort();

    sha256::digest(records.join("\n"))
}

fn collect_file_records(root: &Path, dir: &Path, records: &mut Vec<String>) {
    let entries =
        match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

    for entry in entries.flatten() {
        let path = entry.path();

        if path.is_dir() {
            collect_file_records(root, &path, records);
            continue;
        }

        let meta =
            match path.metadata() {
                Ok(meta) => meta,
                Err(_) => continue,
            };

        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let rel_path = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .into_owned();

        records.push(format!("{}:{}:{}", rel_path, meta.len(), mtime));
    }
}

// `create_build_context` returns a fresh directory for the build context.
// The default location is under `$HOME`, which stays visible to sandboxed
// engines that can't read hidden or `/tmp` paths; the fallbacks are a
// dotted directory in the current directory and then the system temp dir.
fn create_build_context(config: &ProvisionConfig, tag: &str)
    -> Result<PathBuf, ProvisionError>
{
    // The tag suffix is already unique per content, so concurrent builds of
    // different content don't collide.
    let subdir = format!(
        "ctx-{}",
        tag.trim_start_matches(PROVISIONED_TAG_PREFIX),
    );

    let mut candidates: Vec<PathBuf> = vec![];

    if let Some(dir) = &config.cache_dir {
        candidates.push(dir.clone());
    }
    if let Some(home) = env::var_os("HOME") {
        candidates.push(PathBuf::from(home).join("invowk-build"));
    }
    if let Ok(cwd) = env::current_dir() {
        candidates.push(cwd.join(".invowk-build"));
    }
    candidates.push(env::temp_dir().join("invowk-build"));

    let mut last_err = None;
    for candidate in candidates {
        let context_dir = candidate.join(&subdir);

        match fs::create_dir_all(&context_dir) {
            Ok(()) => return Ok(context_dir),
            Err(err) => {
                last_err = Some((err, context_dir));
            },
        }
    }

    // `candidates` is never empty, so an error was recorded on this path.
    let (source, path) = last_err.unwrap();

    Err(ProvisionError::CreateBuildContextFailed{source, path})
}

fn populate_and_build(
    engine: &dyn Engine,
    config: &ProvisionConfig,
    base_image: &str,
    tag: &str,
    context_dir: &Path,
)
    -> Result<(), ProvisionError>
{
    let binary_dest = context_dir.join("invowk");
    fs::copy(&config.binary_path, &binary_dest)
        .context(CopyBinaryFailed{path: config.binary_path.clone()})?;

    let modules_dir = context_dir.join("modules");
    fs::create_dir_all(&modules_dir)
        .context(CreateBuildContextFailed{path: modules_dir.clone()})?;

    for path in &config.modules_paths {
        let name =
            match path.file_name() {
                Some(name) => name,
                None => continue,
            };

        copy_tree(path, &modules_dir.join(name))
            .context(CopyModulesFailed{path: path.clone()})?;
    }

    let build_file = render_build_file(config, base_image);
    fs::write(context_dir.join(BUILD_FILE_NAME), build_file)
        .context(WriteBuildFileFailed{
            path: context_dir.join(BUILD_FILE_NAME),
        })?;

    engine
        .build(&BuildOpts{
            context_dir,
            build_file: BUILD_FILE_NAME,
            tag,
        })
        .context(BuildImageFailed{tag: tag.to_string()})?;

    Ok(())
}

fn render_build_file(config: &ProvisionConfig, base_image: &str) -> String {
    let bin = &config.binary_mount_path;
    let modules = &config.modules_mount_path;

    format!(
        "FROM {base_image}\n\
         COPY invowk {bin}/invowk\n\
         RUN chmod +x {bin}/invowk\n\
         COPY modules/ {modules}/\n\
         ENV PATH=\"{bin}:$PATH\"\n\
         ENV INVOWK_MODULE_PATH=\"{modules}\"\n",
    )
}

fn copy_tree(src: &Path, dest: &Path) -> Result<(), IoError> {
    fs::create_dir_all(dest)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());

        if src_path.is_dir() {
            copy_tree(&src_path, &dest_path)?;
        } else {
            fs::copy(&src_path, &dest_path)?;
        }
    }

    Ok(())
}

#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
pub enum ProvisionError {
    #[snafu(display(
        "Couldn't hash the invowk binary '{}': {}",
        path.display(),
        source,
    ))]
    HashBinaryFailed{source: IoError, path: PathBuf},
    #[snafu(display(
        "Couldn't create the build context '{}': {}",
        path.display(),
        source,
    ))]
    CreateBuildContextFailed{source: IoError, path: PathBuf},
    #[snafu(display(
        "Couldn't copy the invowk binary '{}' into the build context: {}",
        path.display(),
        source,
    ))]
    CopyBinaryFailed{source: IoError, path: PathBuf},
    #[snafu(display(
        "Couldn't copy the module tree '{}' into the build context: {}",
        path.display(),
        source,
    ))]
    CopyModulesFailed{source: IoError, path: PathBuf},
    #[snafu(display(
        "Couldn't write the build file '{}': {}",
        path.display(),
        source,
    ))]
    WriteBuildFileFailed{source: IoError, path: PathBuf},
    #[snafu(display("Couldn't build '{}': {}", tag, source))]
    BuildImageFailed{source: BuildEngineError, tag: String},
}
