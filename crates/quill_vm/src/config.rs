use std::rc::Rc;

use quill_bytecode::{Environment, DEFAULT_LANGUAGE_VERSION};
use serde::Deserialize;

/// Default limit on nested script calls.
pub const DEFAULT_MAX_CALL_DEPTH: u32 = 3000;

/// Engine settings a host may load from a file.
///
/// Every field is optional in the serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Script call depth past which `InternalError: too much recursion` is
    /// thrown.
    pub max_call_depth: u32,
    /// Instructions between interrupt checks. `None` disables counting.
    pub instruction_threshold: Option<u64>,
    pub language_version: u16,
    pub dynamic_scope: bool,
    pub require_activation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            instruction_threshold: None,
            language_version: DEFAULT_LANGUAGE_VERSION,
            dynamic_scope: false,
            require_activation: false,
        }
    }
}

impl EngineConfig {
    /// Compilation environment matching these settings.
    pub fn environment(&self, source_name: &str) -> Environment {
        Environment {
            language_version: self.language_version,
            dynamic_scope: self.dynamic_scope,
            require_activation: self.require_activation,
            source_name: Rc::from(source_name),
            ..Environment::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{ "max_call_depth": 50 }"#).unwrap();
        assert_eq!(config.max_call_depth, 50);
        assert_eq!(config.instruction_threshold, None);
        assert_eq!(config.language_version, DEFAULT_LANGUAGE_VERSION);
    }

    #[test]
    fn environment_carries_settings() {
        let config = EngineConfig {
            language_version: 120,
            require_activation: true,
            ..EngineConfig::default()
        };
        let env = config.environment("a.js");
        assert_eq!(env.language_version, 120);
        assert!(env.require_activation);
        assert_eq!(&*env.source_name, "a.js");
    }
}
