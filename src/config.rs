//! Compiler configuration.
//!
//! Options come from an optional TOML file merged over the defaults, with
//! CLI flags applied on top by the driver.

use serde::Deserialize;

/// Which artifact the driver writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Emit {
    #[default]
    Asm,
    Tac,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// ANSI color in diagnostics.
    pub color: bool,
    /// Exit nonzero when any warning was emitted.
    pub deny_warnings: bool,
    /// Artifact selection.
    pub emit: Emit,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            color: true,
            deny_warnings: false,
            emit: Emit::Asm,
        }
    }
}

impl CompilerConfig {
    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Invalid config: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = CompilerConfig::default();
        assert!(c.color);
        assert!(!c.deny_warnings);
        assert_eq!(c.emit, Emit::Asm);
    }

    #[test]
    fn parses_partial_toml() {
        let c = CompilerConfig::from_toml("deny_warnings = true\nemit = \"tac\"").unwrap();
        assert!(c.deny_warnings);
        assert_eq!(c.emit, Emit::Tac);
        assert!(c.color);
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(CompilerConfig::from_toml("optimize = 3").is_err());
    }
}
