//! Topic assignment for prompts.
//!
//! Classifiers are pure functions of the prompt text and an optional hint.
//! They return `None` when they cannot place a prompt so that they can be
//! chained; the consolidator falls back to [`UNCLASSIFIED_TOPIC`].
//!
//! [`UNCLASSIFIED_TOPIC`]: crate::models::UNCLASSIFIED_TOPIC

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::warn;

pub trait TopicClassifier {
    fn classify(&self, prompt_text: &str, hint: Option<&str>) -> Option<String>;
}

impl<F> TopicClassifier for F
where
    F: Fn(&str, Option<&str>) -> Option<String>,
{
    fn classify(&self, prompt_text: &str, hint: Option<&str>) -> Option<String> {
        self(prompt_text, hint)
    }
}

/// Trusts a non-empty hint carried by the record or prompt source
#[derive(Debug, Clone, Copy, Default)]
pub struct HintClassifier;

impl TopicClassifier for HintClassifier {
    fn classify(&self, _prompt_text: &str, hint: Option<&str>) -> Option<String> {
        hint.map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
    }
}

/// First classifier with an answer wins
#[derive(Default)]
pub struct ChainClassifier {
    links: Vec<Box<dyn TopicClassifier>>,
}

impl ChainClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, classifier: impl TopicClassifier + 'static) -> Self {
        self.links.push(Box::new(classifier));
        self
    }
}

impl TopicClassifier for ChainClassifier {
    fn classify(&self, prompt_text: &str, hint: Option<&str>) -> Option<String> {
        self.links
            .iter()
            .find_map(|link| link.classify(prompt_text, hint))
    }
}

enum Matcher {
    Exact(String),
    Substring(String),
    Pattern(Regex),
}

struct Rule {
    matcher: Matcher,
    topic: String,
}

/// Operator-supplied rules, evaluated in file order
pub struct RuleClassifier {
    rules: Vec<Rule>,
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    pattern: String,
    #[serde(rename = "type")]
    topic: String,
    #[serde(default)]
    regex: bool,
    #[serde(default)]
    flags: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuleFile {
    List(Vec<RuleSpec>),
    /// exact prompt text -> topic
    Map(BTreeMap<String, String>),
}

impl RuleClassifier {
    /// Load rules from JSON: either a list of `{pattern, type, regex?, flags?}`
    /// objects or an object mapping exact prompt texts to topics
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read topic rules: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse topic rules: {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: RuleFile = serde_json::from_str(content)?;
        let rules = match file {
            RuleFile::List(specs) => specs.into_iter().filter_map(compile_rule).collect(),
            RuleFile::Map(map) => map
                .into_iter()
                .map(|(text, topic)| Rule {
                    matcher: Matcher::Exact(text),
                    topic,
                })
                .collect(),
        };
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile_rule(spec: RuleSpec) -> Option<Rule> {
    let matcher = if spec.regex {
        let compiled = RegexBuilder::new(&spec.pattern)
            .case_insensitive(spec.flags.to_lowercase().contains('i'))
            .build();
        match compiled {
            Ok(regex) => Matcher::Pattern(regex),
            Err(err) => {
                warn!(pattern = %spec.pattern, error = %err, "skipping topic rule with invalid regex");
                return None;
            }
        }
    } else {
        Matcher::Substring(spec.pattern.to_lowercase())
    };
    Some(Rule {
        matcher,
        topic: spec.topic,
    })
}

impl TopicClassifier for RuleClassifier {
    fn classify(&self, prompt_text: &str, _hint: Option<&str>) -> Option<String> {
        let text = prompt_text.trim();
        let lowered = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| match &rule.matcher {
                Matcher::Exact(exact) => exact == text,
                Matcher::Substring(needle) => lowered.contains(needle.as_str()),
                Matcher::Pattern(regex) => regex.is_match(text),
            })
            .map(|rule| rule.topic.clone())
    }
}

const KEYWORD_TOPICS: &[(&str, &[&str])] = &[
    (
        "financial_receipt",
        &["receipt", "invoice", "bill", "grocery", "restaurant", "total", "subtotal", "tax"],
    ),
    (
        "bank_statement",
        &["bank transaction", "statement", "transaction", "balance", "debit", "credit"],
    ),
    (
        "sensor_logs",
        &["sensor", "iot", "temperature", "humidity", "meter reading", "kwh", "mwh"],
    ),
    (
        "csv_table",
        &["csv", "comma separated", "rows", "columns", "table", "product_id", "sku", "donation", "donor"],
    ),
    ("reviews", &["review", "product review", "star rating", "helpful"]),
    (
        "narrative",
        &[
            "news", "report", "paragraph", "itinerary", "narrative", "story", "summary",
            "travelogue", "funding", "valuation", "series a", "series b",
        ],
    ),
    ("medical", &["medical", "lab", "prescription", "patient", "test result"]),
];

/// Default vocabulary-based heuristic; topics are tried in a fixed priority order
pub struct KeywordClassifier {
    topics: Vec<(String, Regex)>,
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self::with_vocabulary(KEYWORD_TOPICS.iter().map(|(topic, words)| (*topic, *words)))
    }

    /// Custom vocabulary; each keyword matches whole words, case-insensitively
    pub fn with_vocabulary<'a>(vocabulary: impl IntoIterator<Item = (&'a str, &'a [&'a str])>) -> Self {
        let topics = vocabulary
            .into_iter()
            .filter(|(_, words)| !words.is_empty())
            .map(|(topic, words)| {
                let alternation = words
                    .iter()
                    .map(|w| regex::escape(w))
                    .collect::<Vec<_>>()
                    .join("|");
                let regex = RegexBuilder::new(&format!(r"\b(?:{alternation})\b"))
                    .case_insensitive(true)
                    .build()
                    .expect("escaped keyword alternation is a valid pattern");
                (topic.to_string(), regex)
            })
            .collect();
        Self { topics }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicClassifier for KeywordClassifier {
    fn classify(&self, prompt_text: &str, _hint: Option<&str>) -> Option<String> {
        self.topics
            .iter()
            .find(|(_, regex)| regex.is_match(prompt_text))
            .map(|(topic, _)| topic.clone())
    }
}

/// Explicit topic assignments that take precedence over every classifier
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicOverrides {
    #[serde(default)]
    pub prompt_ids: HashMap<String, String>,
    #[serde(default)]
    pub prompt_texts: HashMap<String, String>,
}

impl TopicOverrides {
    /// Load from TOML with `[prompt_ids]` and `[prompt_texts]` tables
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read topic overrides: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse topic overrides: {}", path.display()))
    }

    pub fn lookup(&self, prompt_id: &str, prompt_text: Option<&str>) -> Option<&str> {
        self.prompt_ids
            .get(prompt_id)
            .or_else(|| prompt_text.and_then(|text| self.prompt_texts.get(text.trim())))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_keyword_classifier_default_vocabulary() {
        let classifier = KeywordClassifier::new();
        assert_eq!(
            classifier.classify("Write a grocery receipt with 8 items", None).as_deref(),
            Some("financial_receipt")
        );
        assert_eq!(
            classifier.classify("Generate IoT sensor readings", None).as_deref(),
            Some("sensor_logs")
        );
        assert_eq!(
            classifier.classify("Write a short news story", None).as_deref(),
            Some("narrative")
        );
        assert_eq!(classifier.classify("Compose a haiku", None), None);
    }

    #[test]
    fn test_keyword_classifier_matches_whole_words() {
        let classifier = KeywordClassifier::new();
        // "labyrinth" contains "lab" but is not the keyword
        assert_eq!(classifier.classify("Describe a labyrinth", None), None);
    }

    #[test]
    fn test_keyword_priority_order() {
        let classifier = KeywordClassifier::new();
        // mentions both a receipt and a table; receipts come first
        assert_eq!(
            classifier.classify("Put the receipt into a table", None).as_deref(),
            Some("financial_receipt")
        );
    }

    #[test]
    fn test_rule_list_first_match_wins() {
        let classifier = RuleClassifier::from_json(
            r#"[
                {"pattern": "^write a poem", "type": "poetry", "regex": true, "flags": "i"},
                {"pattern": "Poem", "type": "verse"},
                {"pattern": "([", "type": "broken", "regex": true}
            ]"#,
        )
        .unwrap();

        assert_eq!(classifier.len(), 2);
        assert_eq!(
            classifier.classify("Write a poem about 7 cats", None).as_deref(),
            Some("poetry")
        );
        assert_eq!(
            classifier.classify("A short POEM please", None).as_deref(),
            Some("verse")
        );
        assert_eq!(classifier.classify("List primes", None), None);
    }

    #[test]
    fn test_rule_map_is_exact_match() {
        let classifier =
            RuleClassifier::from_json(r#"{"List ten primes": "math"}"#).unwrap();
        assert_eq!(
            classifier.classify("  List ten primes ", None).as_deref(),
            Some("math")
        );
        assert_eq!(classifier.classify("List ten primes please", None), None);
    }

    #[test]
    fn test_chain_uses_hint_before_heuristics() {
        let chain = ChainClassifier::new()
            .then(HintClassifier)
            .then(KeywordClassifier::new());

        assert_eq!(
            chain.classify("Write a receipt", Some("custom")).as_deref(),
            Some("custom")
        );
        assert_eq!(
            chain.classify("Write a receipt", Some("  ")).as_deref(),
            Some("financial_receipt")
        );
        assert_eq!(chain.classify("Compose a haiku", None), None);
    }

    #[test]
    fn test_closures_are_classifiers() {
        let by_length = |text: &str, _hint: Option<&str>| {
            Some(if text.len() > 10 { "long" } else { "short" }.to_string())
        };
        let chain = ChainClassifier::new().then(by_length);
        assert_eq!(chain.classify("tiny", None).as_deref(), Some("short"));
    }

    #[test]
    fn test_overrides_from_toml() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[prompt_ids]
"p-0001" = "bank_statement"

[prompt_texts]
"Write a haiku" = "poetry"
"#
        )
        .unwrap();

        let overrides = TopicOverrides::from_file(file.path()).unwrap();
        assert_eq!(overrides.lookup("p-0001", None), Some("bank_statement"));
        assert_eq!(overrides.lookup("p-9", Some("Write a haiku")), Some("poetry"));
        assert_eq!(overrides.lookup("p-9", Some("Write a limerick")), None);
    }
}
