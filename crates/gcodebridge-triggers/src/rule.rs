//! Trigger rules
//!
//! A rule pairs a compiled regular expression with a shell command. Rules
//! are built once from configuration at startup; a pattern that fails to
//! compile aborts startup before any connection is accepted.

use gcodebridge_core::{ConfigError, TriggerConfig};
use regex::Regex;

/// A compiled trigger rule
///
/// Matching is an unanchored regex search against the stripped GCode line,
/// so `M8` matches both `M8` and `GM8X`; anchor explicitly (`^M8$`) for
/// exact matches.
#[derive(Debug, Clone)]
pub struct TriggerRule {
    /// Identifier, unique within the rule set
    pub id: String,
    /// Shell command executed on match
    pub command: String,
    pattern: Regex,
}

impl TriggerRule {
    /// Compile a rule from its configuration entry
    pub fn from_config(config: &TriggerConfig) -> Result<Self, ConfigError> {
        let pattern =
            Regex::new(&config.trigger.pattern).map_err(|e| ConfigError::InvalidTrigger {
                id: config.id.clone(),
                reason: format!("invalid regex pattern '{}': {}", config.trigger.pattern, e),
            })?;

        Ok(Self {
            id: config.id.clone(),
            command: config.command.clone(),
            pattern,
        })
    }

    /// Check whether the given GCode line matches this rule
    pub fn matches(&self, gcode: &str) -> bool {
        self.pattern.is_match(gcode.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcodebridge_core::TriggerMatchConfig;

    fn config(id: &str, pattern: &str) -> TriggerConfig {
        TriggerConfig {
            id: id.to_string(),
            trigger: TriggerMatchConfig {
                kind: "gcode".to_string(),
                pattern: pattern.to_string(),
            },
            command: "true".to_string(),
        }
    }

    #[test]
    fn test_unanchored_search_semantics() {
        let rule = TriggerRule::from_config(&config("air-on", "M8")).unwrap();
        assert!(rule.matches("M8"));
        assert!(rule.matches("GM8X"));
        assert!(rule.matches("  M8  "));
        assert!(!rule.matches("M7"));
    }

    #[test]
    fn test_explicit_anchors_are_exact() {
        let rule = TriggerRule::from_config(&config("air-on", "^M8$")).unwrap();
        assert!(rule.matches("M8"));
        assert!(rule.matches(" M8 "), "line is stripped before matching");
        assert!(!rule.matches("GM8X"));
    }

    #[test]
    fn test_invalid_pattern_is_a_startup_error() {
        let err = TriggerRule::from_config(&config("broken", "[unclosed")).unwrap_err();
        assert!(err.to_string().contains("broken"));
        assert!(err.to_string().contains("invalid regex"));
    }
}
