use serde::{Deserialize, Serialize};

use crate::parser::ParserStrategy;

/// How `save` lays out its output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    /// Original bytes followed by changed objects and a new xref section
    #[default]
    Incremental,
    /// Every live object rewritten with a single xref table
    Full,
}

/// Annotation subtypes the host application draws itself
pub const DEFAULT_SUPPORTED_SUBTYPES: [&str; 5] = ["Ink", "Stamp", "Text", "Square", "Circle"];

/// Configuration of a [`DocumentEngine`](super::DocumentEngine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineOptions {
    pub parser_strategy: ParserStrategy,
    /// Stamped as `/T` on imported annotations that carry no author
    pub author: Option<String>,
    pub supported_subtypes: Vec<String>,
    pub save_mode: SaveMode,
    /// Oldest undo records are dropped past this depth
    pub undo_limit: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            parser_strategy: ParserStrategy::Auto,
            author: None,
            supported_subtypes: DEFAULT_SUPPORTED_SUBTYPES.iter().map(|s| s.to_string()).collect(),
            save_mode: SaveMode::Incremental,
            undo_limit: 100,
        }
    }
}

impl EngineOptions {
    pub fn is_supported(&self, subtype: &str) -> bool {
        self.supported_subtypes.iter().any(|s| s == subtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_log::test;

    #[test]
    fn test_partial_json_uses_defaults() {
        let options: EngineOptions =
            serde_json::from_str(r#"{"parserStrategy": "sync", "author": "dana", "saveMode": "full"}"#).unwrap();
        assert_eq!(options.parser_strategy, ParserStrategy::Sync);
        assert_eq!(options.author.as_deref(), Some("dana"));
        assert_eq!(options.save_mode, SaveMode::Full);
        assert_eq!(options.undo_limit, 100);
        assert!(options.is_supported("Ink"));
        assert!(!options.is_supported("Widget"));
    }

    #[test]
    fn test_round_trip() {
        let options = EngineOptions {
            supported_subtypes: vec!["Highlight".into()],
            ..EngineOptions::default()
        };
        let json = serde_json::to_string(&options).unwrap();
        assert_eq!(serde_json::from_str::<EngineOptions>(&json).unwrap(), options);
    }
}
