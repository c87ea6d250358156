// Copyright 2025 Sean Kelleher. All rights reserved.
// Use of this source code is governed by an MIT
// licence that can be found in the LICENCE file.

//! Resolution of the interpreter a script should be run with.
//!
//! An implementation may name its interpreter explicitly in its runtime
//! configuration; the default (`auto`) derives it from the script's shebang.

use std::env;
use std::path::Path;
use std::path::PathBuf;

#[derive(Debug, PartialEq)]
pub struct Interpreter {
    pub prog: String,
    pub args: Vec<String>,
}

// `resolve` returns the interpreter for a script, or `None` when the script
// should be handed to a shell instead. An explicit interpreter string is
// split on whitespace into the program and its arguments; `auto` (or an
// absent/empty setting) falls back to the script's shebang.
pub fn resolve(configured: Option<&str>, script: &str) -> Option<Interpreter> {
    match configured {
        Some("auto") | Some("") | None => parse_shebang(script),
        Some(explicit) => {
            let mut parts = explicit.split_whitespace();
            let prog = parts.next()?.to_string();

            Some(Interpreter{
                prog,
                args: parts.map(ToString::to_string).collect(),
            })
        },
    }
}

// `parse_shebang` parses the first line of `script` against the shebang
// grammar:
//
//     #! *<path>( <args>)?
//     #!/usr/bin/env <cmd>( <args>)?
//     #!/usr/bin/env -S <cmd>( <args>)?
//
// The returned program is the interpreter's basename; it's resolved against
// `PATH` at execution time.
pub fn parse_shebang(script: &str) -> Option<Interpreter> {
    let first_line = script.lines().next()?;

    let rest = first_line.strip_prefix("#!")?.trim();
    if rest.is_empty() {
        return None;
    }

    let mut tokens = rest.split_whitespace();
    let path = tokens.next()?;

    if Path::new(path).file_name().and_then(|n| n.to_str()) == Some("env") {
        let mut tokens = tokens.peekable();

        if tokens.peek() == Some(&"-S") {
            tokens.next();
        }

        let prog = tokens.next()?.to_string();

        Some(Interpreter{
            prog,
            args: tokens.map(ToString::to_string).collect(),
        })
    } else {
        let prog = Path::new(path)
            .file_name()?
            .to_str()?
            .to_string();

        Some(Interpreter{
            prog,
            args: tokens.map(ToString::to_string).collect(),
        })
    }
}

// `resolve_on_path` returns the absolute path of `prog`, searching the
// directories of `$PATH` unless `prog` already contains a path separator.
pub fn resolve_on_path(prog: &str) -> Option<PathBuf> {
    if prog.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(prog);
        if is_executable(&path) {
            return Some(path);
        }

        return None;
    }

    let paths = env::var_os("PATH")?;
    for dir in env::split_paths(&paths) {
        let candidate = dir.join(prog);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }

    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    match path.metadata() {
        Ok(meta) => {
            meta.is_file() && meta.permissions().mode() & 0o111 != 0
        },
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// `temp_file_extension` returns the conventional file extension for scripts
// run by `prog`, used when an inline script is staged to a file.
pub fn temp_file_extension(prog: &str) -> &'static str {
    let base = prog.trim_end_matches(".exe");

    if base.starts_with("python") {
        return ".py";
    }

    match base {
        "node" | "deno" => ".js",
        "ruby" => ".rb",
        "perl" => ".pl",
        "php" => ".php",
        "lua" => ".lua",
        "sh" | "bash" | "dash" | "zsh" | "ksh" => ".sh",
        "pwsh" | "powershell" => ".ps1",
        _ => "",
    }
}
