// Copyright 2025 Sean Kelleher. All rights reserved.
// Use of this source code is governed by an MIT
// licence that can be found in the LICENCE file.

//! The runtime contract and the registry that dispatches to it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use snafu::Snafu;

use crate::context::ExecError;
use crate::context::ExecutionContext;
use crate::context::ExecutionResult;
use crate::invowkfile::RuntimeKind;

// Every runtime implements the base operations; the capture and
// prepare-command capabilities are optional and report themselves as absent
// by returning `None`.
pub trait Runtime {
    fn name(&self) -> &'static str;

    // `available` reports whether the runtime can execute on this host, e.g.
    // whether its engine binary is present.
    fn available(&self) -> bool;

    // `validate` checks `ctx` without acquiring any resources; a failure
    // short-circuits dispatch.
    fn validate(&self, ctx: &ExecutionContext) -> Result<(), ExecError>;

    fn execute(&self, ctx: &ExecutionContext) -> ExecutionResult;

    // `execute_capture` runs with a null STDIN and the child's output
    // recorded on the result instead of streamed.
    fn execute_capture(&self, _ctx: &ExecutionContext)
        -> Option<ExecutionResult>
    {
        None
    }

    // `prepare_command` builds, but doesn't invoke, an interactive command
    // that the caller can attach a PTY to.
    fn prepare_command(&self, _ctx: &ExecutionContext)
        -> Option<Result<PreparedCommand, ExecError>>
    {
        None
    }
}

// `PreparedCommand` describes an invocation the caller will spawn itself.
// The caller must run `cleanup` once the command has finished.
pub struct PreparedCommand {
    pub prog: String,
    pub args: Vec<String>,
    pub env: Option<HashMap<String, String>>,
    pub workdir: Option<PathBuf>,
    pub cleanup: Cleanup,
}

// `Cleanup` is a stack of release actions run in reverse order of
// registration. Running it drains the stack, so running it again is a no-op.
#[derive(Default)]
pub struct Cleanup {
    actions: Vec<Box<dyn FnOnce() + Send>>,
}

impl Cleanup {
    pub fn new() -> Self {
        Cleanup{actions: vec![]}
    }

    pub fn push<F: FnOnce() + Send + 'static>(&mut self, action: F) {
        self.actions.push(Box::new(action));
    }

    pub fn extend(&mut self, mut other: Cleanup) {
        self.actions.append(&mut other.actions);
    }

    pub fn run(&mut self) {
        while let Some(action) = self.actions.pop() {
            action();
        }
    }
}

pub struct RuntimeRegistry {
    runtimes: HashMap<RuntimeKind, Box<dyn Runtime>>,
    execution_counter: AtomicU64,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        RuntimeRegistry{
            runtimes: HashMap::new(),
            execution_counter: AtomicU64::new(0),
        }
    }

    pub fn register(&mut self, kind: RuntimeKind, runtime: Box<dyn Runtime>) {
        self.runtimes.insert(kind, runtime);
    }

    pub fn get(&self, kind: RuntimeKind)
        -> Result<&dyn Runtime, GetRuntimeError>
    {
        match self.runtimes.get(&kind) {
            Some(runtime) => Ok(runtime.as_ref()),
            None => Err(GetRuntimeError::NotRegistered{kind}),
        }
    }

    pub fn get_for_context(&self, ctx: &ExecutionContext)
        -> Result<&dyn Runtime, GetRuntimeError>
    {
        self.get(ctx.selected_runtime)
    }

    // `available` returns the registered kinds whose runtimes report
    // themselves available; the order isn't defined.
    pub fn available(&self) -> Vec<RuntimeKind> {
        self.runtimes
            .iter()
            .filter(|(_, runtime)| runtime.available())
            .map(|(kind, _)| *kind)
            .collect()
    }

    // `checked_runtime` resolves the runtime for `ctx` and applies the
    // dispatch gates that every entry point shares: an implementation must
    // be selected, the runtime must be available, and validation must pass
    // before any resource is acquired.
    fn checked_runtime(&self, ctx: &ExecutionContext)
        -> Result<&dyn Runtime, ExecError>
    {
        let runtime =
            match self.get_for_context(ctx) {
                Ok(runtime) => runtime,
                Err(GetRuntimeError::NotRegistered{kind}) => {
                    return Err(ExecError::RuntimeNotRegistered{
                        name: kind.name().to_string(),
                    });
                },
            };

        ctx.implementation()?;

        if !runtime.available() {
            return Err(ExecError::RuntimeNotAvailable{
                name: runtime.name().to_string(),
            });
        }

        runtime.validate(ctx)?;

        Ok(runtime)
    }

    // `execute` dispatches `ctx` to its selected runtime. All failures are
    // reported through the returned result so the caller has a single place
    // to inspect.
    pub fn execute(&self, ctx: &ExecutionContext) -> ExecutionResult {
        match self.checked_runtime(ctx) {
            Ok(runtime) => runtime.execute(ctx),
            Err(e) => ExecutionResult::from_error(e),
        }
    }

    // `execute_capture` is `execute` through the capture capability; a
    // runtime without the capability yields an error result.
    pub fn execute_capture(&self, ctx: &ExecutionContext) -> ExecutionResult {
        let runtime =
            match self.checked_runtime(ctx) {
                Ok(runtime) => runtime,
                Err(e) => return ExecutionResult::from_error(e),
            };

        match runtime.execute_capture(ctx) {
            Some(result) => result,
            None => ExecutionResult::from_error(
                ExecError::CaptureNotSupported{
                    name: runtime.name().to_string(),
                },
            ),
        }
    }

    // `prepare_command` builds, but doesn't invoke, an interactive command
    // through the selected runtime so the caller can attach a PTY.
    pub fn prepare_command(&self, ctx: &ExecutionContext)
        -> Result<PreparedCommand, ExecError>
    {
        let runtime = self.checked_runtime(ctx)?;

        match runtime.prepare_command(ctx) {
            Some(result) => result,
            None => Err(ExecError::InteractiveNotSupported{
                name: runtime.name().to_string(),
            }),
        }
    }

    // `new_execution_id` returns `<nanos>-<counter>`; the counter makes IDs
    // unique even when the clock doesn't advance between calls.
    pub fn new_execution_id(&self) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        let count = self.execution_counter.fetch_add(1, Ordering::SeqCst);

        format!("{nanos}-{count}")
    }
}

impl Default for RuntimeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Snafu)]
pub enum GetRuntimeError {
    #[snafu(display("Runtime '{}' isn't registered", kind))]
    NotRegistered{kind: RuntimeKind},
}
