//! Language detection over extracted text.

use lectio_core::DetectionConfig;
use regex::Regex;
use serde::Serialize;

pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// Confidence above which a detected language counts as reliable.
pub const RELIABLE_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageDetection {
    /// ISO 639-1 code, or `"unknown"`.
    pub language: String,
    pub confidence: f64,
    pub method: Option<&'static str>,
    pub reason: Option<String>,
}

impl LanguageDetection {
    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            language: UNKNOWN_LANGUAGE.to_string(),
            confidence: 0.0,
            method: None,
            reason: Some(reason.into()),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.language == UNKNOWN_LANGUAGE
    }

    pub fn is_reliable(&self) -> bool {
        !self.is_unknown() && self.confidence > RELIABLE_CONFIDENCE
    }
}

/// Never fails: problems are reported as an `unknown` result with a reason.
pub trait LanguageDetector: Send + Sync {
    fn detect(&self, text: &str) -> LanguageDetection;
}

/// Strips content that skews n-gram detection.
struct TextCleaner {
    urls: Regex,
    emails: Regex,
    long_numbers: Regex,
    symbols: Regex,
    whitespace: Regex,
}

impl TextCleaner {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            urls: Regex::new(r"https?://[\w.-]+(?:/[\w.-]*)*(?:\?[\w&=%.-]*)?")?,
            emails: Regex::new(r"[\w.-]+@[\w.-]+\.[a-zA-Z]{2,}")?,
            long_numbers: Regex::new(r"\b\d{4,}\b")?,
            symbols: Regex::new(r"[^\p{L}\p{N}\s[:punct:]]")?,
            whitespace: Regex::new(r"\s+")?,
        })
    }

    fn clean(&self, text: &str) -> String {
        let text = self.urls.replace_all(text, " ");
        let text = self.emails.replace_all(&text, " ");
        let text = self.long_numbers.replace_all(&text, " ");
        let text = self.symbols.replace_all(&text, " ");
        let text = self.whitespace.replace_all(&text, " ");
        text.trim().to_string()
    }
}

/// [`LanguageDetector`] backed by `whatlang` trigram profiles.
pub struct WhatlangDetector {
    config: DetectionConfig,
    cleaner: Option<TextCleaner>,
}

impl WhatlangDetector {
    pub fn new(config: DetectionConfig) -> Self {
        let cleaner = match TextCleaner::new() {
            Ok(cleaner) => Some(cleaner),
            Err(e) => {
                tracing::warn!(error = %e, "Language detector not available");
                None
            }
        };
        Self { config, cleaner }
    }
}

impl LanguageDetector for WhatlangDetector {
    fn detect(&self, text: &str) -> LanguageDetection {
        if text.trim().is_empty() {
            return LanguageDetection::unknown("Text is empty");
        }

        let Some(cleaner) = &self.cleaner else {
            return LanguageDetection::unknown("Language detector not available");
        };

        let clean = cleaner.clean(text);
        let length = clean.chars().count();
        if length < self.config.min_text_length {
            return LanguageDetection::unknown(format!(
                "Text too short ({} chars), minimum required: {}",
                length, self.config.min_text_length
            ));
        }

        let Some(info) = whatlang::detect(&clean) else {
            return LanguageDetection::unknown("No language matched");
        };

        let confidence = info.confidence();
        tracing::debug!(
            language = info.lang().code(),
            confidence,
            "Language detected"
        );

        if confidence < self.config.confidence_threshold {
            return LanguageDetection::unknown(format!(
                "Low confidence: {:.2} (threshold: {:.2})",
                confidence, self.config.confidence_threshold
            ));
        }

        LanguageDetection {
            language: iso_639_1(info.lang().code()).to_string(),
            confidence,
            method: Some("whatlang"),
            reason: None,
        }
    }
}

/// Two-letter code for a `whatlang` ISO 639-3 code. Languages without a two-letter
/// code keep their three-letter one.
fn iso_639_1(code: &'static str) -> &'static str {
    match code {
        "afr" => "af",
        "aka" => "ak",
        "amh" => "am",
        "ara" => "ar",
        "aze" => "az",
        "bel" => "be",
        "ben" => "bn",
        "bul" => "bg",
        "cat" => "ca",
        "ces" => "cs",
        "cmn" => "zh",
        "dan" => "da",
        "deu" => "de",
        "ell" => "el",
        "eng" => "en",
        "epo" => "eo",
        "est" => "et",
        "fin" => "fi",
        "fra" => "fr",
        "guj" => "gu",
        "heb" => "he",
        "hin" => "hi",
        "hrv" => "hr",
        "hun" => "hu",
        "hye" => "hy",
        "ind" => "id",
        "ita" => "it",
        "jav" => "jv",
        "jpn" => "ja",
        "kan" => "kn",
        "kat" => "ka",
        "khm" => "km",
        "kor" => "ko",
        "lat" => "la",
        "lav" => "lv",
        "lit" => "lt",
        "mal" => "ml",
        "mar" => "mr",
        "mkd" => "mk",
        "mya" => "my",
        "nep" => "ne",
        "nld" => "nl",
        "nob" => "nb",
        "ori" => "or",
        "pan" => "pa",
        "pes" => "fa",
        "pol" => "pl",
        "por" => "pt",
        "ron" => "ro",
        "rus" => "ru",
        "sin" => "si",
        "slk" => "sk",
        "slv" => "sl",
        "sna" => "sn",
        "spa" => "es",
        "srp" => "sr",
        "swe" => "sv",
        "tam" => "ta",
        "tel" => "te",
        "tgl" => "tl",
        "tha" => "th",
        "tuk" => "tk",
        "tur" => "tr",
        "ukr" => "uk",
        "urd" => "ur",
        "uzb" => "uz",
        "vie" => "vi",
        "yid" => "yi",
        "zul" => "zu",
        other => other,
    }
}
