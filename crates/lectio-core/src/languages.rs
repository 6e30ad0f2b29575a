//! Language allow-list and per-language model tables.
//!
//! Passed by value into the generation stages at construction; nothing here is global.

use std::collections::{BTreeSet, HashMap};

pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_GENERATION_MODEL: &str = "google/flan-t5-base";
pub const DEFAULT_QA_MODEL: &str = "deepset/roberta-base-squad2";
pub const DEFAULT_SUMMARIZATION_MODEL: &str = "facebook/bart-large-cnn";

/// Two-letter lower-case code for a language tag such as `en-US`; `"en"` when absent.
pub fn language_code(tag: Option<&str>) -> String {
    match tag.map(str::trim).filter(|t| !t.is_empty()) {
        Some(tag) => tag.chars().take(2).collect::<String>().to_lowercase(),
        None => DEFAULT_LANGUAGE.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LanguageModels {
    pub supported_languages: BTreeSet<String>,
    /// Question generation model per language code.
    pub generation_models: HashMap<String, String>,
    /// Extractive question answering model per language code.
    pub qa_models: HashMap<String, String>,
    pub default_generation_model: String,
    pub default_qa_model: String,
    pub summarization_model: String,
}

impl Default for LanguageModels {
    fn default() -> Self {
        let supported_languages: BTreeSet<String> =
            ["en", "es", "fr"].iter().map(|s| s.to_string()).collect();

        let generation_models = supported_languages
            .iter()
            .map(|lang| (lang.clone(), DEFAULT_GENERATION_MODEL.to_string()))
            .collect();

        let qa_models = [
            ("en", "deepset/roberta-base-squad2"),
            ("es", "deepset/roberta-base-squad2-distilled"),
            ("fr", "etalab-ia/camembert-base-squadFR-fquad-piaf"),
        ]
        .iter()
        .map(|(lang, model)| (lang.to_string(), model.to_string()))
        .collect();

        Self {
            supported_languages,
            generation_models,
            qa_models,
            default_generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            default_qa_model: DEFAULT_QA_MODEL.to_string(),
            summarization_model: DEFAULT_SUMMARIZATION_MODEL.to_string(),
        }
    }
}

impl LanguageModels {
    pub fn is_supported(&self, code: &str) -> bool {
        self.supported_languages.contains(code)
    }

    pub fn generation_model(&self, code: &str) -> &str {
        self.generation_models
            .get(code)
            .map(String::as_str)
            .unwrap_or(&self.default_generation_model)
    }

    pub fn qa_model(&self, code: &str) -> &str {
        self.qa_models
            .get(code)
            .map(String::as_str)
            .unwrap_or(&self.default_qa_model)
    }
}
