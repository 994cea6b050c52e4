use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tokenization profile for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Maximum combined prompt + completion tokens the model accepts.
    pub context_window: usize,
    /// Average characters per token for this model's tokenizer.
    pub chars_per_token: f32,
}

/// Maps model identifiers to their [`ModelSpec`].
///
/// Lookup is exact-name first, then longest matching family prefix, then
/// a conservative default so unknown models still get a usable budget.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: HashMap<String, ModelSpec>,
    default: ModelSpec,
}

impl ModelCatalog {
    /// Catalog pre-populated with common model families.
    pub fn builtin() -> Self {
        let mut models = HashMap::new();
        models.insert(
            "claude-sonnet-4".to_string(),
            ModelSpec {
                context_window: 200_000,
                chars_per_token: 3.8,
            },
        );
        models.insert(
            "claude-haiku-3".to_string(),
            ModelSpec {
                context_window: 200_000,
                chars_per_token: 3.8,
            },
        );
        models.insert(
            "gpt-4o".to_string(),
            ModelSpec {
                context_window: 128_000,
                chars_per_token: 4.0,
            },
        );
        models.insert(
            "gpt-4o-mini".to_string(),
            ModelSpec {
                context_window: 128_000,
                chars_per_token: 4.0,
            },
        );
        models.insert(
            "llama-3.1-70b".to_string(),
            ModelSpec {
                context_window: 131_072,
                chars_per_token: 3.5,
            },
        );
        Self {
            models,
            default: ModelSpec {
                context_window: 8_192,
                chars_per_token: 4.0,
            },
        }
    }

    /// Empty catalog with the given default spec. Useful in tests that
    /// need small, predictable windows.
    pub fn with_default(default: ModelSpec) -> Self {
        Self {
            models: HashMap::new(),
            default,
        }
    }

    /// Register or override a model.
    pub fn insert(&mut self, name: impl Into<String>, spec: ModelSpec) {
        self.models.insert(name.into(), spec);
    }

    /// Resolve a model identifier to its spec.
    pub fn spec(&self, model: &str) -> ModelSpec {
        if let Some(spec) = self.models.get(model) {
            return *spec;
        }
        // Versioned ids like "claude-sonnet-4-20250514" resolve to their
        // family entry.
        self.models
            .iter()
            .filter(|(name, _)| model.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, spec)| *spec)
            .unwrap_or(self.default)
    }

    /// Whether the model resolves to a registered entry (not the default).
    pub fn contains(&self, model: &str) -> bool {
        self.models.contains_key(model)
            || self
                .models
                .keys()
                .any(|name| model.starts_with(name.as_str()))
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
