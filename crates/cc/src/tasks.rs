//! Runners for compiler invocations.

use async_trait::async_trait;
use kubecc_core::{Contexts, Toolchain};
use kubecc_run::{run_process, ProcessOptions, RunResult, Runner, TaskOutput};

use crate::args::{ActionOpt, CcArgs};
use crate::error::ArgsError;

/// Runs the compiler with the parser's current arguments
#[derive(Debug, Clone)]
pub struct CompileRunner {
    options: ProcessOptions,
}

impl CompileRunner {
    /// `options` supplies the environment, working directory and
    /// credentials; its arguments are replaced by `args`.
    pub fn new(args: &CcArgs, options: ProcessOptions) -> Self {
        Self {
            options: options.with_args(args.args().to_vec()),
        }
    }
}

#[async_trait]
impl Runner for CompileRunner {
    async fn run(&self, ctx: &Contexts, toolchain: &Toolchain) -> RunResult<TaskOutput> {
        run_process(ctx, &toolchain.executable, &self.options).await
    }

    fn name(&self) -> &'static str {
        "compile"
    }
}

/// Runs the compiler with `-E`, writing the preprocessed source to stdout
#[derive(Debug, Clone)]
pub struct PreprocessRunner {
    options: ProcessOptions,
}

impl PreprocessRunner {
    pub fn new(args: &CcArgs, options: ProcessOptions) -> Result<Self, ArgsError> {
        let mut args = args.clone();
        args.set_action_opt(ActionOpt::Preprocess)?;
        args.replace_output_path("-")?;
        Ok(Self {
            options: options.with_args(args.into_args()),
        })
    }

    pub fn args(&self) -> &[String] {
        &self.options.args
    }
}

#[async_trait]
impl Runner for PreprocessRunner {
    async fn run(&self, ctx: &Contexts, toolchain: &Toolchain) -> RunResult<TaskOutput> {
        run_process(ctx, &toolchain.executable, &self.options).await
    }

    fn name(&self) -> &'static str {
        "preprocess"
    }
}
