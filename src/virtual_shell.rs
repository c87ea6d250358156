// Copyright 2025 Sean Kelleher. All rights reserved.
// Use of this source code is governed by an MIT
// licence that can be found in the LICENCE file.

//! The virtual runtime, which runs POSIX scripts through an embedded
//! interpreter instead of forking a host shell. The script is parsed when
//! the command is validated, so syntax errors surface before anything runs;
//! external commands encountered during the walk are still invoked on the
//! host.

use std::collections::HashMap;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Error as IoError;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Command as StdCommand;
use std::process::Stdio;

use conch_parser::ast;
use conch_parser::ast::AndOr;
use conch_parser::ast::Command;
use conch_parser::ast::ComplexWord;
use conch_parser::ast::CompoundCommandKind;
use conch_parser::ast::ListableCommand;
use conch_parser::ast::Parameter;
use conch_parser::ast::PipeableCommand;
use conch_parser::ast::Redirect;
use conch_parser::ast::RedirectOrCmdWord;
use conch_parser::ast::RedirectOrEnvVar;
use conch_parser::ast::SimpleWord;
use conch_parser::ast::TopLevelCommand;
use conch_parser::ast::TopLevelWord;
use conch_parser::ast::Word;
use conch_parser::lexer::Lexer;
use conch_parser::parse::DefaultParser;
use snafu::Snafu;

use crate::context::ExecError;
use crate::context::ExecutionContext;
use crate::context::ExecutionResult;
use crate::context::InputStream;
use crate::context::IoStreams;
use crate::context::OutputStream;
use crate::env_builder;
use crate::env_builder::InheritMode;
use crate::native;
use crate::process;
use crate::runtime::Runtime;

type Cmd = TopLevelCommand<String>;
type CmdList = ast::CommandList<String, TopLevelWord<String>, Cmd>;
type Pipeable = ast::ShellPipeableCommand<String, TopLevelWord<String>, Cmd>;
type Compound = ast::ShellCompoundCommand<String, TopLevelWord<String>, Cmd>;
type Simple = ast::SimpleCommand<
    String,
    TopLevelWord<String>,
    Redirect<TopLevelWord<String>>,
>;
type Rdr = Redirect<TopLevelWord<String>>;

// `parse` returns the syntax tree of `script`, or the parser's error
// rendered as a message.
pub fn parse(script: &str) -> Result<Vec<Cmd>, ParseScriptError> {
    let lexer = Lexer::new(script.chars());
    let parser = DefaultParser::new(lexer);

    let mut cmds = vec![];
    for result in parser {
        let cmd = result
            .map_err(|e| ParseScriptError::Syntax{message: e.to_string()})?;

        cmds.push(cmd);
    }

    Ok(cmds)
}

#[derive(Debug, Snafu)]
pub enum ParseScriptError {
    #[snafu(display("{}", message))]
    Syntax{message: String},
}

pub struct VirtualRuntime;

impl VirtualRuntime {
    pub fn new() -> Self {
        VirtualRuntime
    }

    fn run(&self, ctx: &ExecutionContext, io: &IoStreams)
        -> Result<i32, ExecError>
    {
        let impl_ = ctx.implementation()?;

        let env = env_builder::build_env(ctx, InheritMode::All)
            .map_err(|source| ExecError::BuildEnvFailed{source})?;

        let workdir = native::resolve_workdir(ctx)?;

        let script = impl_.script_body(&ctx.invowkfile.dir())
            .map_err(|source| ExecError::ResolveScriptFailed{source})?;

        let cmds = parse(&script)
            .map_err(|e| ExecError::ScriptSyntax{message: e.to_string()})?;

        let mut interp = ShellInterpreter::new(
            env,
            ctx.positional_args.clone(),
            workdir,
            &io.stdin,
            &io.stdout,
            &io.stderr,
        );

        interp.run(&cmds)
            .map_err(|source| ExecError::VirtualRunFailed{source})
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

impl Default for VirtualRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime for VirtualRuntime {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn available(&self) -> bool {
        true
    }

    fn validate(&self, ctx: &ExecutionContext) -> Result<(), ExecError> {
        let impl_ = ctx.implementation()?;

        // The embedded interpreter is the interpreter; naming another one
        // makes the implementation self-contradictory.
        if impl_.runtime_config().interpreter.is_some() {
            return Err(ExecError::InterpreterNotAllowedInVirtual);
        }

        let script = impl_.script_body(&ctx.invowkfile.dir())
            .map_err(|source| ExecError::ResolveScriptFailed{source})?;

        if script.trim().is_empty() {
            return Err(ExecError::EmptyScript{
                command: ctx.command_name.clone(),
            });
        }

        parse(&script)
            .map_err(|e| ExecError::ScriptSyntax{message: e.to_string()})?;

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

#[derive(Debug, Snafu)]
pub enum EvalError {
    #[snafu(display(
        "The script uses an unsupported shell construct: {}",
        construct,
    ))]
    UnsupportedConstruct{construct: &'static str},
    #[snafu(display("Couldn't spawn '{}': {}", prog, source))]
    SpawnFailed{source: IoError, prog: String},
    #[snafu(display("Couldn't wait for '{}': {}", prog, source))]
    WaitFailed{source: IoError, prog: String},
    #[snafu(display(
        "Couldn't open '{}' for redirection: {}",
        path,
        source,
    ))]
    OpenRedirectFailed{source: IoError, path: String},
    #[snafu(display("Couldn't write command output: {}", source))]
    WriteOutputFailed{source: IoError},
    #[snafu(display("Couldn't change directory to '{}': {}", path, source))]
    ChangeDirFailed{source: IoError, path: String},
}

// `Control` threads non-local exits (the `exit` builtin) through the walk
// alongside genuine failures.
enum Control {
    Exit(i32),
    Fail(EvalError),
}

impl From<EvalError> for Control {
    fn from(e: EvalError) -> Self {
        Control::Fail(e)
    }
}

const BUILTINS: &[&str] =
    &["cd", "export", "unset", "exit", "true", "false", ":"];

pub struct ShellInterpreter<'a> {
    vars: HashMap<String, String>,
    positional: Vec<String>,
    last_status: i32,
    workdir: PathBuf,
    stdin: &'a InputStream,
    stdout: &'a OutputStream,
    stderr: &'a OutputStream,
}

impl<'a> ShellInterpreter<'a> {
    pub fn new(
        vars: HashMap<String, String>,
        positional: Vec<String>,
        workdir: PathBuf,
        stdin: &'a InputStream,
        stdout: &'a OutputStream,
        stderr: &'a OutputStream,
    )
        -> Self
    {
        ShellInterpreter{
            vars,
            positional,
            last_status: 0,
            workdir,
            stdin,
            stdout,
            stderr,
        }
    }

    pub fn run(&mut self, cmds: &[Cmd]) -> Result<i32, EvalError> {
        match self.sequence(cmds) {
            Ok(status) => Ok(status),
            Err(Control::Exit(code)) => Ok(code),
            Err(Control::Fail(e)) => Err(e),
        }
    }

    fn sequence(&mut self, cmds: &[Cmd]) -> Result<i32, Control> {
        let mut status = self.last_status;
        for cmd in cmds {
            status = self.command(cmd)?;
            self.last_status = status;
        }

        Ok(status)
    }

    fn command(&mut self, cmd: &Cmd) -> Result<i32, Control> {
        match &cmd.0 {
            Command::List(list) => {
                self.and_or_list(list)
            },
            Command::Job(_) => {
                let e = EvalError::UnsupportedConstruct{
                    construct: "background job",
                };

                Err(Control::Fail(e))
            },
        }
    }

    fn and_or_list(&mut self, list: &CmdList) -> Result<i32, Control> {
        let mut status = self.listable(&list.first)?;
        self.last_status = status;

        for next in &list.rest {
            match next {
                AndOr::And(cmd) => {
                    if status == 0 {
                        status = self.listable(cmd)?;
                        self.last_status = status;
                    }
                },
                AndOr::Or(cmd) => {
                    if status != 0 {
                        status = self.listable(cmd)?;
                        self.last_status = status;
                    }
                },
            }
        }

        Ok(status)
    }

    fn listable(&mut self, cmd: &ListableCommand<Pipeable>)
        -> Result<i32, Control>
    {
        match cmd {
            ListableCommand::Single(pipeable) => {
                self.pipeable(pipeable)
            },
            ListableCommand::Pipe(negate, cmds) => {
                let status = self.pipeline(cmds)?;

                if *negate {
                    Ok(i32::from(status == 0))
                } else {
                    Ok(status)
                }
            },
        }
    }

    fn pipeable(&mut self, cmd: &Pipeable) -> Result<i32, Control> {
        match cmd {
            PipeableCommand::Simple(simple) => {
                self.simple(simple)
            },
            PipeableCommand::Compound(compound) => {
                self.compound(compound)
            },
            PipeableCommand::FunctionDef(..) => {
                let e = EvalError::UnsupportedConstruct{
                    construct: "function definition",
                };

                Err(Control::Fail(e))
            },
        }
    }

    fn compound(&mut self, cmd: &Compound) -> Result<i32, Control> {
        if !cmd.io.is_empty() {
            let e = EvalError::UnsupportedConstruct{
                construct: "redirection on a compound command",
            };

            return Err(Control::Fail(e));
        }

        match &cmd.kind {
            CompoundCommandKind::Brace(cmds) => {
                self.sequence(cmds)
            },
            CompoundCommandKind::Subshell(cmds) => {
                // Variable and directory changes made in a subshell don't
                // escape it.
                let mut sub = ShellInterpreter{
                    vars: self.vars.clone(),
                    positional: self.positional.clone(),
                    last_status: self.last_status,
                    workdir: self.workdir.clone(),
                    stdin: self.stdin,
                    stdout: self.stdout,
                    stderr: self.stderr,
                };

                let status =
                    match sub.sequence(cmds) {
                        Ok(status) => status,
                        // `exit` inside a subshell ends the subshell only.
                        Err(Control::Exit(code)) => code,
                        Err(fail) => return Err(fail),
                    };

                self.last_status = status;

                Ok(status)
            },
            CompoundCommandKind::While(pair) => {
                let mut status = 0;
                loop {
                    if self.sequence(&pair.guard)? != 0 {
                        break;
                    }

                    status = self.sequence(&pair.body)?;
                }

                Ok(status)
            },
            CompoundCommandKind::Until(pair) => {
                let mut status = 0;
                loop {
                    if self.sequence(&pair.guard)? == 0 {
                        break;
                    }

                    status = self.sequence(&pair.body)?;
                }

                Ok(status)
            },
            CompoundCommandKind::If{conditionals, else_branch} => {
                for pair in conditionals {
                    if self.sequence(&pair.guard)? == 0 {
                        return self.sequence(&pair.body);
                    }
                }

                match else_branch {
                    Some(cmds) => self.sequence(cmds),
                    None => Ok(0),
                }
            },
            CompoundCommandKind::For{var, words, body} => {
                let items =
                    match words {
                        Some(words) => {
                            let mut items = vec![];
                            for word in words {
                                items.push(self.word(word)?);
                            }

                            items
                        },
                        None => self.positional.clone(),
                    };

                let mut status = 0;
                for item in items {
                    self.vars.insert(var.clone(), item);
                    status = self.sequence(body)?;
                }

                Ok(status)
            },
            CompoundCommandKind::Case{word, arms} => {
                let subject = self.word(word)?;

                for arm in arms {
                    for pattern in &arm.patterns {
                        let pattern = self.word(pattern)?;

                        // Patterns support literal matches and the `*`
                        // catch-all; richer globs are out of scope.
                        if pattern == "*" || pattern == subject {
                            return self.sequence(&arm.body);
                        }
                    }
                }

                Ok(0)
            },
        }
    }

    fn simple(&mut self, cmd: &Simple) -> Result<i32, Control> {
        let mut assignments: Vec<(String, String)> = vec![];
        let mut redirects: Vec<&Rdr> = vec![];

        for item in &cmd.redirects_or_env_vars {
            match item {
                RedirectOrEnvVar::EnvVar(name, value) => {
                    let value =
                        match value {
                            Some(word) => self.word(word)?,
                            None => String::new(),
                        };

                    assignments.push((name.clone(), value));
                },
                RedirectOrEnvVar::Redirect(redirect) => {
                    redirects.push(redirect);
                },
            }
        }

        let mut words: Vec<String> = vec![];
        for item in &cmd.redirects_or_cmd_words {
            match item {
                RedirectOrCmdWord::CmdWord(word) => {
                    words.push(self.word(word)?);
                },
                RedirectOrCmdWord::Redirect(redirect) => {
                    redirects.push(redirect);
                },
            }
        }

        // A bare assignment list updates the interpreter's variables.
        if words.is_empty() {
            for (name, value) in assignments {
                self.vars.insert(name, value);
            }

            return Ok(0);
        }

        if BUILTINS.contains(&words[0].as_str()) {
            return self.builtin(&words);
        }

        self.external(&words, &assignments, &redirects)
    }

    fn builtin(&mut self, words: &[String]) -> Result<i32, Control> {
        match words[0].as_str() {
            "cd" => {
                let target =
                    match words.get(1) {
                        Some(dir) => dir.clone(),
                        None => {
                            self.vars
                                .get("HOME")
                                .cloned()
                                .unwrap_or_else(|| ".".to_string())
                        },
                    };

                let path =
                    if PathBuf::from(&target).is_absolute() {
                        PathBuf::from(&target)
                    } else {
                        self.workdir.join(&target)
                    };

                let path = path.canonicalize()
                    .map_err(|source| EvalError::ChangeDirFailed{
                        source,
                        path: target.clone(),
                    })?;

                if !path.is_dir() {
                    let source = IoError::new(
                        ErrorKind::Other,
                        "not a directory",
                    );
                    let e = EvalError::ChangeDirFailed{source, path: target};

                    return Err(Control::Fail(e));
                }

                self.workdir = path;

                Ok(0)
            },
            "export" => {
                for word in &words[1..] {
                    match word.split_once('=') {
                        Some((name, value)) => {
                            self.vars.insert(
                                name.to_string(),
                                value.to_string(),
                            );
                        },
                        None => {
                            self.vars
                                .entry(word.clone())
                                .or_insert_with(String::new);
                        },
                    }
                }

                Ok(0)
            },
            "unset" => {
                for word in &words[1..] {
                    self.vars.remove(word);
                }

                Ok(0)
            },
            "exit" => {
                let code = words
                    .get(1)
                    .and_then(|w| w.parse().ok())
                    .unwrap_or(self.last_status);

                Err(Control::Exit(code))
            },
            "true" | ":" => {
                Ok(0)
            },
            "false" => {
                Ok(1)
            },
            // `BUILTINS` and this match must stay in sync.
            other => {
                panic!("unhandled builtin '{other}'");
            },
        }
    }

    fn external(
        &mut self,
        words: &[String],
        assignments: &[(String, String)],
        redirects: &[&Rdr],
    )
        -> Result<i32, Control>
    {
        let prog = &words[0];

        let mut cmd = StdCommand::new(prog);
        cmd
            .args(&words[1..])
            .env_clear()
            .envs(&self.vars)
            .envs(assignments.iter().cloned())
            .current_dir(&self.workdir)
            .stdin(self.stdin.to_stdio())
            .stdout(self.stdout.to_stdio())
            .stderr(self.stderr.to_stdio());

        self.apply_redirects(&mut cmd, redirects)?;

        let child =
            match cmd.spawn() {
                Ok(child) => {
                    child
                },
                Err(err) => {
                    if err.kind() == ErrorKind::NotFound {
                        let msg =
                            format!("invowk: {prog}: command not found\n");
                        self.stderr.write_all(msg.as_bytes())
                            .map_err(|source| {
                                EvalError::WriteOutputFailed{source}
                            })?;

                        return Ok(127);
                    }

                    let e = EvalError::SpawnFailed{
                        source: err,
                        prog: prog.clone(),
                    };

                    return Err(Control::Fail(e));
                },
            };

        let output = child.wait_with_output()
            .map_err(|source| EvalError::WaitFailed{
                source,
                prog: prog.clone(),
            })?;

        // Only piped (captured) streams produce bytes here; inherited
        // streams were written by the child directly.
        self.stdout.write_all(&output.stdout)
            .map_err(|source| EvalError::WriteOutputFailed{source})?;
        self.stderr.write_all(&output.stderr)
            .map_err(|source| EvalError::WriteOutputFailed{source})?;

        Ok(process::exit_code(output.status))
    }

    fn apply_redirects(&self, cmd: &mut StdCommand, redirects: &[&Rdr])
        -> Result<(), Control>
    {
        for redirect in redirects {
            match redirect {
                Redirect::Read(fd, word) => {
                    if (*fd).unwrap_or(0) != 0 {
                        return Err(Control::Fail(
                            EvalError::UnsupportedConstruct{
                                construct: "read redirection of a \
                                    non-STDIN descriptor",
                            },
                        ));
                    }

                    let path = self.redirect_path(word)?;
                    let file = File::open(&path)
                        .map_err(|source| EvalError::OpenRedirectFailed{
                            source,
                            path: path.display().to_string(),
                        })?;

                    cmd.stdin(Stdio::from(file));
                },
                Redirect::Write(fd, word) | Redirect::Clobber(fd, word) => {
                    let path = self.redirect_path(word)?;
                    let file = File::create(&path)
                        .map_err(|source| EvalError::OpenRedirectFailed{
                            source,
                            path: path.display().to_string(),
                        })?;

                    self.bind_output(cmd, (*fd).unwrap_or(1), file)?;
                },
                Redirect::Append(fd, word) => {
                    let path = self.redirect_path(word)?;
                    let file = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&path)
                        .map_err(|source| EvalError::OpenRedirectFailed{
                            source,
                            path: path.display().to_string(),
                        })?;

                    self.bind_output(cmd, (*fd).unwrap_or(1), file)?;
                },
                Redirect::ReadWrite(..)
                | Redirect::Heredoc(..)
                | Redirect::DupRead(..)
                | Redirect::DupWrite(..) => {
                    return Err(Control::Fail(
                        EvalError::UnsupportedConstruct{
                            construct: "heredocs and descriptor duplication",
                        },
                    ));
                },
            }
        }

        Ok(())
    }

    fn bind_output(&self, cmd: &mut StdCommand, fd: u16, file: File)
        -> Result<(), Control>
    {
        match fd {
            1 => {
                cmd.stdout(Stdio::from(file));

                Ok(())
            },
            2 => {
                cmd.stderr(Stdio::from(file));

                Ok(())
            },
            _ => {
                Err(Control::Fail(EvalError::UnsupportedConstruct{
                    construct: "redirection of a descriptor other than \
                        STDOUT or STDERR",
                }))
            },
        }
    }

    fn redirect_path(&self, word: &TopLevelWord<String>)
        -> Result<PathBuf, Control>
    {
        let target = self.word(word)?;

        if PathBuf::from(&target).is_absolute() {
            Ok(PathBuf::from(target))
        } else {
            Ok(self.workdir.join(target))
        }
    }

    fn pipeline(&mut self, cmds: &[Pipeable]) -> Result<i32, Control> {
        let mut stages = vec![];
        for cmd in cmds {
            match cmd {
                PipeableCommand::Simple(simple) => {
                    stages.push(self.pipeline_stage(simple)?);
                },
                _ => {
                    return Err(Control::Fail(
                        EvalError::UnsupportedConstruct{
                            construct: "a compound command inside a pipeline",
                        },
                    ));
                },
            }
        }

        let last = stages.len() - 1;
        let mut children = vec![];
        let mut prev_stdout = None;

        for (i, (words, assignments)) in stages.iter().enumerate() {
            let mut cmd = StdCommand::new(&words[0]);
            cmd
                .args(&words[1..])
                .env_clear()
                .envs(&self.vars)
                .envs(assignments.iter().cloned())
                .current_dir(&self.workdir)
                .stderr(self.stderr.to_stdio());

            match prev_stdout.take() {
                Some(stdout) => {
                    cmd.stdin(Stdio::from(stdout));
                },
                None => {
                    cmd.stdin(self.stdin.to_stdio());
                },
            }

            if i < last {
                cmd.stdout(Stdio::piped());
            } else {
                cmd.stdout(self.stdout.to_stdio());
            }

            let mut child =
                match cmd.spawn() {
                    Ok(child) => {
                        child
                    },
                    Err(err) => {
                        if err.kind() == ErrorKind::NotFound {
                            let msg = format!(
                                "invowk: {}: command not found\n",
                                words[0],
                            );
                            self.stderr.write_all(msg.as_bytes())
                                .map_err(|source| {
                                    EvalError::WriteOutputFailed{source}
                                })?;

                            // Earlier stages still run to completion; their
                            // output has nowhere to go, as in a shell whose
                            // pipeline tail failed to start.
                            for child in children {
                                let _ = finish_child(
                                    child,
                                    self.stdout,
                                    self.stderr,
                                );
                            }

                            return Ok(127);
                        }

                        let e = EvalError::SpawnFailed{
                            source: err,
                            prog: words[0].clone(),
                        };

                        return Err(Control::Fail(e));
                    },
                };

            if i < last {
                prev_stdout = child.stdout.take();
            }

            children.push(child);
        }

        let mut status = 0;
        for (i, child) in children.into_iter().enumerate() {
            let output = finish_child(child, self.stdout, self.stderr)
                .map_err(|source| EvalError::WaitFailed{
                    source,
                    prog: stages[i].0[0].clone(),
                })?;

            if i == last {
                status = process::exit_code(output);
            }
        }

        Ok(status)
    }

    // `pipeline_stage` expands one pipeline element into its argument vector
    // and assignment prefix. Builtins can't take part in a pipeline because
    // they run in-process, with no descriptors to connect.
    fn pipeline_stage(&mut self, cmd: &Simple)
        -> Result<(Vec<String>, Vec<(String, String)>), Control>
    {
        let mut assignments = vec![];
        let mut words = vec![];

        for item in &cmd.redirects_or_env_vars {
            match item {
                RedirectOrEnvVar::EnvVar(name, value) => {
                    let value =
                        match value {
                            Some(word) => self.word(word)?,
                            None => String::new(),
                        };

                    assignments.push((name.clone(), value));
                },
                RedirectOrEnvVar::Redirect(_) => {
                    return Err(Control::Fail(
                        EvalError::UnsupportedConstruct{
                            construct: "redirection inside a pipeline",
                        },
                    ));
                },
            }
        }

        for item in &cmd.redirects_or_cmd_words {
            match item {
                RedirectOrCmdWord::CmdWord(word) => {
                    words.push(self.word(word)?);
                },
                RedirectOrCmdWord::Redirect(_) => {
                    return Err(Control::Fail(
                        EvalError::UnsupportedConstruct{
                            construct: "redirection inside a pipeline",
                        },
                    ));
                },
            }
        }

        if words.is_empty() || BUILTINS.contains(&words[0].as_str()) {
            return Err(Control::Fail(EvalError::UnsupportedConstruct{
                construct: "a builtin inside a pipeline",
            }));
        }

        Ok((words, assignments))
    }

    fn word(&self, word: &TopLevelWord<String>) -> Result<String, EvalError> {
        match &word.0 {
            ComplexWord::Single(part) => {
                self.word_part(part)
            },
            ComplexWord::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    out += &self.word_part(part)?;
                }

                Ok(out)
            },
        }
    }

    fn word_part<S>(
        &self,
        part: &Word<String, SimpleWord<String, Parameter<String>, S>>,
    )
        -> Result<String, EvalError>
    {
        match part {
            Word::Simple(simple) => {
                self.simple_word(simple)
            },
            Word::DoubleQuoted(parts) => {
                let mut out = String::new();
                for simple in parts {
                    out += &self.simple_word(simple)?;
                }

                Ok(out)
            },
            Word::SingleQuoted(lit) => {
                Ok(lit.clone())
            },
        }
    }

    fn simple_word<S>(
        &self,
        word: &SimpleWord<String, Parameter<String>, S>,
    )
        -> Result<String, EvalError>
    {
        match word {
            SimpleWord::Literal(s) | SimpleWord::Escaped(s) => {
                Ok(s.clone())
            },
            SimpleWord::Param(param) => {
                Ok(self.param(param))
            },
            SimpleWord::Subst(_) => {
                Err(EvalError::UnsupportedConstruct{
                    construct: "command or parameter substitution",
                })
            },
            SimpleWord::Star => Ok("*".to_string()),
            SimpleWord::Question => Ok("?".to_string()),
            SimpleWord::SquareOpen => Ok("[".to_string()),
            SimpleWord::SquareClose => Ok("]".to_string()),
            SimpleWord::Tilde => {
                Ok(self.vars
                    .get("HOME")
                    .cloned()
                    .unwrap_or_else(|| "~".to_string()))
            },
            SimpleWord::Colon => Ok(":".to_string()),
        }
    }

    fn param(&self, param: &Parameter<String>) -> String {
        match param {
            Parameter::At | Parameter::Star => {
                self.positional.join(" ")
            },
            Parameter::Pound => {
                self.positional.len().to_string()
            },
            Parameter::Question => {
                self.last_status.to_string()
            },
            Parameter::Dollar => {
                std::process::id().to_string()
            },
            Parameter::Bang | Parameter::Dash => {
                String::new()
            },
            Parameter::Positional(n) => {
                let i = *n as usize;
                if i == 0 {
                    return "invowk".to_string();
                }

                self.positional
                    .get(i - 1)
                    .cloned()
                    .unwrap_or_default()
            },
            Parameter::Var(name) => {
                self.vars.get(name).cloned().unwrap_or_default()
            },
        }
    }
}

fn finish_child(
    child: std::process::Child,
    stdout: &OutputStream,
    stderr: &OutputStream,
)
    -> Result<std::process::ExitStatus, IoError>
{
    let output = child.wait_with_output()?;

    stdout.write_all(&output.stdout)?;
    stderr.write_all(&output.stderr)?;

    Ok(output.status)
}
