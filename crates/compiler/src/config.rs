//! Compiler configuration.
//!
//! The compiler consumes only a list of pre-declared extern identifier names from the
//! host's core library — there is no stdlib registration inside this crate.
//! `CompilerConfig` models exactly that declaration list plus a handful of
//! host-selectable pipeline toggles (optimizer on/off, debug line table).
//!
//! # Example
//!
//! ```rust,ignore
//! use lumenc::{CompilerConfig, ExternalBuiltin};
//!
//! let config = CompilerConfig::new()
//!     .with_builtin(ExternalBuiltin::new("Socket"))
//!     .with_builtin(ExternalBuiltin::new("File"))
//!     .with_optimize(OptimizationLevel::Peephole);
//! ```

use serde::{Deserialize, Serialize};

/// A core-library identifier the host has pre-declared as `extern` — the compiler
/// treats these as resolvable globals without requiring a matching `var`/`func`
/// declaration in the compiled source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalBuiltin {
    pub name: String,
}

impl ExternalBuiltin {
    pub fn new(name: impl Into<String>) -> Self {
        ExternalBuiltin { name: name.into() }
    }
}

/// How much of the peephole optimizer to run. `None` is useful for
/// debugging codegen output directly; `Peephole` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OptimizationLevel {
    None,
    #[default]
    Peephole,
}

/// Host-selectable compilation options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Names resolvable as `Global` without a matching in-source declaration.
    pub extern_globals: Vec<ExternalBuiltin>,
    pub optimize: OptimizationLevel,
    /// Whether the encoder emits the parallel line-number table.
    pub emit_line_table: bool,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_builtin(mut self, builtin: ExternalBuiltin) -> Self {
        self.extern_globals.push(builtin);
        self
    }

    pub fn with_builtins(mut self, builtins: impl IntoIterator<Item = ExternalBuiltin>) -> Self {
        self.extern_globals.extend(builtins);
        self
    }

    pub fn with_optimize(mut self, level: OptimizationLevel) -> Self {
        self.optimize = level;
        self
    }

    pub fn with_line_table(mut self, enabled: bool) -> Self {
        self.emit_line_table = enabled;
        self
    }

    pub fn is_extern_global(&self, name: &str) -> bool {
        self.extern_globals.iter().any(|b| b.name == name)
    }

    /// Parse a `lumenc.toml` on-disk config.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_builtins() {
        let config = CompilerConfig::new()
            .with_builtin(ExternalBuiltin::new("Socket"))
            .with_builtin(ExternalBuiltin::new("File"))
            .with_optimize(OptimizationLevel::None);
        assert_eq!(config.extern_globals.len(), 2);
        assert!(config.is_extern_global("Socket"));
        assert!(!config.is_extern_global("Nope"));
        assert_eq!(config.optimize, OptimizationLevel::None);
    }

    #[test]
    fn toml_round_trips() {
        let config = CompilerConfig::new()
            .with_builtin(ExternalBuiltin::new("Socket"))
            .with_line_table(true);
        let text = config.to_toml_string().unwrap();
        let parsed = CompilerConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.extern_globals, config.extern_globals);
        assert!(parsed.emit_line_table);
    }
}
