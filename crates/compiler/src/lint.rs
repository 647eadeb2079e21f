//! Diagnostics and the warning pass.
//!
//! Errors are collected per source line by the statement parser; warnings
//! come from two places: scope checks during parsing (shadowing, `static` at
//! global scope) and the reference-count pass over the finished program
//! (unused and set-but-never-used symbols). Warning severities are
//! configurable through an embedded TOML file that a user file can override;
//! warnings are never fatal.

use crate::ast::Program;
use crate::symbols::SymbolTable;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Embedded default warning levels.
pub static DEFAULT_LINTS: &str = include_str!("lints.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// The configurable warning kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarnKind {
    UnusedVariable,
    SetNotUsed,
    UnusedFunction,
    UnusedConstant,
    Shadowing,
    StaticGlobal,
}

impl WarnKind {
    pub const ALL: [WarnKind; 6] = [
        WarnKind::UnusedVariable,
        WarnKind::SetNotUsed,
        WarnKind::UnusedFunction,
        WarnKind::UnusedConstant,
        WarnKind::Shadowing,
        WarnKind::StaticGlobal,
    ];

    /// Configuration key of this warning.
    pub fn id(self) -> &'static str {
        match self {
            WarnKind::UnusedVariable => "unused-variable",
            WarnKind::SetNotUsed => "set-not-used",
            WarnKind::UnusedFunction => "unused-function",
            WarnKind::UnusedConstant => "unused-constant",
            WarnKind::Shadowing => "shadowing",
            WarnKind::StaticGlobal => "static-global",
        }
    }
}

/// One diagnostic with its source line.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub line: u32,
    pub severity: Severity,
    /// Set for warnings so the configuration can silence them.
    pub kind: Option<WarnKind>,
    pub message: String,
}

impl Diagnostic {
    pub fn error(line: u32, message: String) -> Self {
        Diagnostic {
            line,
            severity: Severity::Error,
            kind: None,
            message,
        }
    }

    pub fn warning(line: u32, kind: WarnKind, message: String) -> Self {
        Diagnostic {
            line,
            severity: Severity::Warning,
            kind: Some(kind),
            message,
        }
    }
}

/// Render diagnostics one per line, the way they reach stderr.
pub fn format_diagnostics(diags: &[Diagnostic]) -> String {
    let mut out = String::new();
    for d in diags {
        let tag = match d.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        let _ = writeln!(out, "line {}: {}: {}", d.line, tag, d.message);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Allow,
    Warn,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    warnings: HashMap<String, Level>,
}

/// Warning levels, keyed by [`WarnKind`].
#[derive(Debug, Clone)]
pub struct LintConfig {
    levels: HashMap<&'static str, Level>,
}

impl LintConfig {
    /// Parse a configuration from TOML; unknown keys are an error so typos
    /// do not silently keep a warning enabled.
    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        let raw: RawConfig =
            toml::from_str(toml_str).map_err(|e| format!("failed to parse lint config: {}", e))?;
        let mut levels = HashMap::new();
        for (key, level) in raw.warnings {
            let Some(kind) = WarnKind::ALL.iter().find(|k| k.id() == key) else {
                return Err(format!(
                    "unknown warning '{}' in lint config; known warnings: {}",
                    key,
                    WarnKind::ALL
                        .iter()
                        .map(|k| k.id())
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            };
            levels.insert(kind.id(), level);
        }
        Ok(LintConfig { levels })
    }

    /// The embedded defaults.
    pub fn default_config() -> Result<Self, String> {
        Self::from_toml(DEFAULT_LINTS)
    }

    /// Merge another configuration over this one.
    pub fn merge(&mut self, other: LintConfig) {
        for (key, level) in other.levels {
            self.levels.insert(key, level);
        }
    }

    pub fn level(&self, kind: WarnKind) -> Level {
        self.levels.get(kind.id()).copied().unwrap_or(Level::Warn)
    }

    /// Whether a diagnostic survives this configuration.
    pub fn keeps(&self, diag: &Diagnostic) -> bool {
        match diag.kind {
            Some(kind) => self.level(kind) == Level::Warn,
            None => true,
        }
    }
}

/// Reference-count warnings over the finished program.
pub fn check_program(program: &Program) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    let mut check_table = |diags: &mut Vec<Diagnostic>, table: &SymbolTable, what: &str| {
        for sym in &table.entries {
            if sym.used_cnt > 0 {
                continue;
            }
            if sym.set_cnt > 0 {
                diags.push(Diagnostic::warning(
                    sym.line,
                    WarnKind::SetNotUsed,
                    format!("{} '{}' is set but never used", what, sym.name),
                ));
            } else {
                diags.push(Diagnostic::warning(
                    sym.line,
                    WarnKind::UnusedVariable,
                    format!("{} '{}' is never used", what, sym.name),
                ));
            }
        }
    };

    for ty in [
        crate::types::BaseType::Int,
        crate::types::BaseType::Byte,
        crate::types::BaseType::Str,
    ] {
        for array in [false, true] {
            let what = if array { "array" } else { "variable" };
            check_table(&mut diags, program.globals.table(ty, array), what);
            for func in &program.functions {
                check_table(&mut diags, func.locals.table(ty, array), what);
            }
        }
    }

    for c in &program.const_ints {
        if c.used_cnt == 0 {
            diags.push(Diagnostic::warning(
                c.line,
                WarnKind::UnusedConstant,
                format!("constant '{}' is never used", c.name),
            ));
        }
    }
    for c in &program.const_strs {
        if c.used_cnt == 0 {
            diags.push(Diagnostic::warning(
                c.line,
                WarnKind::UnusedConstant,
                format!("constant '{}' is never used", c.name),
            ));
        }
    }

    for func in &program.functions {
        if func.used_cnt == 0 && func.name != "main" {
            diags.push(Diagnostic::warning(
                func.line,
                WarnKind::UnusedFunction,
                format!("function '{}' is never called", func.name),
            ));
        }
    }

    diags
}
