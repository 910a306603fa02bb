//! The closed engine tag and MIME-type classification
//!
//! Every polymorphic entity in the bridge (values, states, controllers,
//! debug servers) carries a `ScriptType`. The registry maps `<script
//! type="...">` MIME types onto engines; unrecognized or empty types fall
//! back to JavaScript, matching what browsers have always done.

use rustc_hash::FxHashMap;

/// Which scripting engine a value, state or controller belongs to.
///
/// The set is closed by design: the wire format, the controller map and the
/// debugger all assume exactly these two engines. Adding an engine means a
/// new variant here and a new delegate implementation, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScriptType {
    /// JavaScript (JavaScriptCore-style semantics)
    Js,
    /// Ruby (MRI-style semantics)
    Rb,
}

impl ScriptType {
    /// Every engine, in deterministic dispatch order.
    pub const fn all() -> [ScriptType; 2] {
        [ScriptType::Js, ScriptType::Rb]
    }

    /// Short display tag, used in diagnostics and source labels.
    pub const fn abbreviation(self) -> &'static str {
        match self {
            ScriptType::Js => "JS",
            ScriptType::Rb => "RB",
        }
    }
}

impl std::fmt::Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.abbreviation())
    }
}

/// JavaScript MIME types as registered by the platform MIME registry.
///
/// Hosts with their own registry pass the list to
/// [`ScriptTypeRegistry::with_javascript_mime_types`]; this default matches
/// the set every mainstream registry carries.
pub const DEFAULT_JAVASCRIPT_MIME_TYPES: &[&str] = &[
    "application/ecmascript",
    "application/javascript",
    "application/x-ecmascript",
    "application/x-javascript",
    "text/ecmascript",
    "text/javascript",
    "text/javascript1.0",
    "text/javascript1.1",
    "text/javascript1.2",
    "text/javascript1.3",
    "text/javascript1.4",
    "text/javascript1.5",
    "text/jscript",
    "text/livescript",
    "text/x-ecmascript",
    "text/x-javascript",
];

const RUBY_MIME_TYPES: &[&str] = &["text/ruby", "application/ruby"];

/// MIME type → engine map with an explicit construction lifecycle.
///
/// Owned by the runtime instance rather than hiding behind a lazily
/// initialized file-static, so hosts control when the platform MIME list is
/// sampled and the map dies with its owner.
#[derive(Debug, Clone)]
pub struct ScriptTypeRegistry {
    mime_type_to_script_type: FxHashMap<String, ScriptType>,
}

impl ScriptTypeRegistry {
    /// Build the registry from the default JavaScript MIME list.
    pub fn new() -> Self {
        Self::with_javascript_mime_types(DEFAULT_JAVASCRIPT_MIME_TYPES.iter().copied())
    }

    /// Build the registry from the host MIME registry's JavaScript list.
    ///
    /// The Ruby types are built in; they are not negotiable per host.
    pub fn with_javascript_mime_types<'a, I>(javascript_mime_types: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut map = FxHashMap::default();
        for mime in javascript_mime_types {
            map.insert(mime.to_ascii_lowercase(), ScriptType::Js);
        }
        for mime in RUBY_MIME_TYPES {
            map.insert((*mime).to_string(), ScriptType::Rb);
        }
        Self {
            mime_type_to_script_type: map,
        }
    }

    /// Classify a script MIME type.
    ///
    /// Empty and unrecognized types default to JavaScript.
    pub fn script_type_from_mime_type(&self, mime_type: &str) -> ScriptType {
        if mime_type.is_empty() {
            return ScriptType::Js;
        }
        self.mime_type_to_script_type
            .get(&mime_type.to_ascii_lowercase())
            .copied()
            .unwrap_or(ScriptType::Js)
    }

    /// True if the MIME type names an engine either controller can run.
    pub fn is_supported_script_mime_type(&self, mime_type: &str) -> bool {
        if mime_type.is_empty() {
            return false;
        }
        self.mime_type_to_script_type
            .contains_key(&mime_type.to_ascii_lowercase())
    }
}

impl Default for ScriptTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbreviations() {
        assert_eq!(ScriptType::Js.abbreviation(), "JS");
        assert_eq!(ScriptType::Rb.abbreviation(), "RB");
    }

    #[test]
    fn test_ruby_mime_types() {
        let registry = ScriptTypeRegistry::new();
        assert_eq!(
            registry.script_type_from_mime_type("text/ruby"),
            ScriptType::Rb
        );
        assert_eq!(
            registry.script_type_from_mime_type("application/ruby"),
            ScriptType::Rb
        );
    }

    #[test]
    fn test_javascript_and_fallback() {
        let registry = ScriptTypeRegistry::new();
        assert_eq!(
            registry.script_type_from_mime_type("text/javascript"),
            ScriptType::Js
        );
        assert_eq!(registry.script_type_from_mime_type(""), ScriptType::Js);
        assert_eq!(
            registry.script_type_from_mime_type("text/vbscript"),
            ScriptType::Js
        );
    }

    #[test]
    fn test_supported_mime_types() {
        let registry = ScriptTypeRegistry::new();
        assert!(registry.is_supported_script_mime_type("text/ruby"));
        assert!(registry.is_supported_script_mime_type("application/javascript"));
        assert!(!registry.is_supported_script_mime_type("text/vbscript"));
        assert!(!registry.is_supported_script_mime_type(""));
    }

    #[test]
    fn test_host_supplied_javascript_list() {
        let registry = ScriptTypeRegistry::with_javascript_mime_types(["text/custom-js"]);
        assert_eq!(
            registry.script_type_from_mime_type("text/custom-js"),
            ScriptType::Js
        );
        assert!(!registry.is_supported_script_mime_type("text/javascript"));
        // Ruby types survive a custom JS list.
        assert!(registry.is_supported_script_mime_type("text/ruby"));
    }
}
