//! Compiler configuration.
//!
//! Options shared between the CLI and library callers, built with the usual
//! builder methods.

use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    /// 0 quiet, 1 statistics, 2 adds postfix and statement dumps.
    pub verbosity: u8,
    /// Object file path; defaults to the source path with "ic" appended.
    pub output: Option<PathBuf>,
    /// User lint configuration (TOML), merged over the embedded defaults.
    pub lint_config: Option<PathBuf>,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn with_lint_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.lint_config = Some(path.into());
        self
    }
}
