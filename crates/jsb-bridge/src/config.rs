//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::error::JsbResult;

/// Configuration for a [`ScriptEngine`](crate::ScriptEngine)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Global namespace holding the native-ref functions.
    /// Default: "jsb"
    pub native_ref_namespace: String,

    /// Function called by `Object::attach_object`.
    /// Default: "registerNativeRef"
    pub register_native_ref: String,

    /// Function called by `Object::detach_object`.
    /// Default: "unregisterNativeRef"
    pub unregister_native_ref: String,

    /// Substring the host prints for functions without script source.
    /// Default: "[native code]"
    pub native_code_marker: String,

    /// Keep the global object rooted for the engine's lifetime.
    /// Default: true
    pub root_global: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            native_ref_namespace: "jsb".to_string(),
            register_native_ref: "registerNativeRef".to_string(),
            unregister_native_ref: "unregisterNativeRef".to_string(),
            native_code_marker: "[native code]".to_string(),
            root_global: true,
        }
    }
}

impl EngineConfig {
    /// Create a new engine config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from JSON; missing fields keep their defaults.
    pub fn from_json(text: &str) -> JsbResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Set the global namespace holding the native-ref functions.
    pub fn native_ref_namespace(mut self, name: impl Into<String>) -> Self {
        self.native_ref_namespace = name.into();
        self
    }

    /// Set the register/unregister function names.
    pub fn native_ref_functions(
        mut self,
        register: impl Into<String>,
        unregister: impl Into<String>,
    ) -> Self {
        self.register_native_ref = register.into();
        self.unregister_native_ref = unregister.into();
        self
    }

    /// Set the native-code marker.
    pub fn native_code_marker(mut self, marker: impl Into<String>) -> Self {
        self.native_code_marker = marker.into();
        self
    }

    /// Enable or disable rooting of the global object.
    pub fn root_global(mut self, enabled: bool) -> Self {
        self.root_global = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.native_ref_namespace, "jsb");
        assert_eq!(config.register_native_ref, "registerNativeRef");
        assert_eq!(config.unregister_native_ref, "unregisterNativeRef");
        assert!(config.root_global);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .native_ref_namespace("bridge")
            .native_ref_functions("keep", "forget")
            .root_global(false);
        assert_eq!(config.native_ref_namespace, "bridge");
        assert_eq!(config.register_native_ref, "keep");
        assert_eq!(config.unregister_native_ref, "forget");
        assert!(!config.root_global);
    }

    #[test]
    fn test_from_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"nativeRefNamespace":"ns"}"#).unwrap();
        assert_eq!(config.native_ref_namespace, "ns");
        assert_eq!(config.native_code_marker, "[native code]");

        assert!(EngineConfig::from_json("{").is_err());
    }
}
