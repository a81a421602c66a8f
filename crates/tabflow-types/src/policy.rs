//! Per-manager error handling policy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a manager does when one of its entries or steps fails.
///
/// Configuration accepts any string. `skip` continues with the next entry;
/// every other value, including unrecognized ones, aborts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorPolicy {
    /// Log the failure and continue with the next entry.
    Skip,
    /// Log the failure and abort the remaining entries.
    #[default]
    Exit,
}

impl ErrorPolicy {
    /// Parse a configured policy value. Unrecognized values map to [`ErrorPolicy::Exit`].
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "skip" => Self::Skip,
            "exit" => Self::Exit,
            other => {
                tracing::warn!(
                    policy = other,
                    "Unrecognized error_handler value, treating as 'exit'"
                );
                Self::Exit
            }
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Exit => "exit",
        }
    }

    /// Returns `true` if failures should be skipped rather than propagated.
    #[must_use]
    pub fn is_skip(self) -> bool {
        matches!(self, Self::Skip)
    }
}

impl From<String> for ErrorPolicy {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<ErrorPolicy> for String {
    fn from(value: ErrorPolicy) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_values() {
        assert_eq!(ErrorPolicy::parse("skip"), ErrorPolicy::Skip);
        assert_eq!(ErrorPolicy::parse("exit"), ErrorPolicy::Exit);
        assert_eq!(ErrorPolicy::parse(" SKIP "), ErrorPolicy::Skip);
    }

    #[test]
    fn unknown_value_is_exit() {
        assert_eq!(ErrorPolicy::parse("ignore"), ErrorPolicy::Exit);
        assert_eq!(ErrorPolicy::parse(""), ErrorPolicy::Exit);
    }

    #[test]
    fn default_is_exit() {
        assert_eq!(ErrorPolicy::default(), ErrorPolicy::Exit);
    }

    #[test]
    fn serde_roundtrip_through_string() {
        let policy: ErrorPolicy = serde_json::from_str("\"skip\"").unwrap();
        assert_eq!(policy, ErrorPolicy::Skip);
        let policy: ErrorPolicy = serde_json::from_str("\"whatever\"").unwrap();
        assert_eq!(policy, ErrorPolicy::Exit);
        assert_eq!(serde_json::to_string(&ErrorPolicy::Skip).unwrap(), "\"skip\"");
    }
}
