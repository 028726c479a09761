//! Keyword-based intent classification.
//!
//! Each label carries weighted patterns. A label's confidence is the noisy-OR
//! of its matched pattern weights, so several weak hints add up while no
//! number of hints exceeds 1.0. The highest-confidence label wins; ties go to
//! the more severe label.

use regex::Regex;
use serde::Serialize;

use super::policy::IntentLabel;

/// Result of classifying one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentClassification {
    pub label: IntentLabel,
    /// In `[0, 1]`.
    pub confidence: f64,
    /// Source patterns that matched for the winning label.
    pub matched: Vec<String>,
}

impl IntentClassification {
    pub fn normal() -> Self {
        Self {
            label: IntentLabel::Normal,
            confidence: 1.0,
            matched: Vec::new(),
        }
    }
}

struct Rule {
    label: IntentLabel,
    pattern: Regex,
    weight: f64,
}

/// Rule-based classifier over the task text.
pub struct IntentClassifier {
    rules: Vec<Rule>,
}

const RULES: &[(IntentLabel, &str, f64)] = &[
    (IntentLabel::Destructive, r"\brm\s+-(rf|fr)\b", 0.9),
    (IntentLabel::Destructive, r"\bmkfs(\.\w+)?\b|\bdd\s+if=", 0.9),
    (IntentLabel::Destructive, r"\bdrop\s+(table|database|schema)\b|\btruncate\s+table\b", 0.85),
    (IntentLabel::Destructive, r"\bformat\s+(the\s+)?(disk|drive|partition)\b", 0.85),
    (
        IntentLabel::Destructive,
        r"\b(delete|wipe|erase|destroy|nuke|purge)\b.{0,40}\b(all|everything|database|repo(sitory)?|disk|drive|home|production|prod)\b",
        0.7,
    ),
    (IntentLabel::Destructive, r"\bforce[- ]push\b|\bpush\s+(-f|--force)\b|\breset\s+--hard\b", 0.5),
    (IntentLabel::Exfiltration, r"\bexfiltrat\w*", 0.9),
    (
        IntentLabel::Exfiltration,
        r"\b(api[_ ]?keys?|secrets?|credentials?|passwords?|private[_ ]keys?|ssh[_ ]keys?|access[_ ]tokens?)\b|\.env\b",
        0.45,
    ),
    (
        IntentLabel::Exfiltration,
        r"\b(send|upload|post|leak|email|forward)\b.{0,40}\b(external|remote|pastebin|webhook|server|attacker)\b",
        0.5,
    ),
    (
        IntentLabel::BrowserAccess,
        r"\b(open|browse|navigate|visit|click|log\s?in(to)?)\b.{0,40}\b(browser|web\s?page|page|website|site|tab)\b",
        0.7,
    ),
    (IntentLabel::BrowserAccess, r"\b(screenshot|headless|playwright|puppeteer|selenium)\b", 0.6),
    (
        IntentLabel::Research,
        r"\b(research|investigate|look\s+up|find\s+out|compare|survey|sources?|cite|citations?)\b",
        0.5,
    ),
    (IntentLabel::Research, r"\b(latest|news|documentation|docs|benchmarks?)\b", 0.3),
];

impl IntentClassifier {
    pub fn new() -> Self {
        let rules = RULES
            .iter()
            .map(|(label, pattern, weight)| Rule {
                label: *label,
                pattern: Regex::new(&format!("(?i){}", pattern)).expect("intent pattern is valid"),
                weight: *weight,
            })
            .collect();
        Self { rules }
    }

    /// Classify `text`. Text with no matching rule is `Normal` with full confidence.
    pub fn classify(&self, text: &str) -> IntentClassification {
        let mut best: Option<IntentClassification> = None;

        for label in [
            IntentLabel::Research,
            IntentLabel::BrowserAccess,
            IntentLabel::Destructive,
            IntentLabel::Exfiltration,
        ] {
            let mut miss = 1.0;
            let mut matched = Vec::new();
            for rule in self.rules.iter().filter(|r| r.label == label) {
                if rule.pattern.is_match(text) {
                    miss *= 1.0 - rule.weight;
                    matched.push(rule.pattern.as_str().to_string());
                }
            }
            if matched.is_empty() {
                continue;
            }
            let candidate = IntentClassification {
                label,
                confidence: (1.0 - miss).clamp(0.0, 1.0),
                matched,
            };
            let better = match &best {
                None => true,
                Some(current) => {
                    candidate.confidence > current.confidence
                        || (candidate.confidence == current.confidence
                            && label.severity() > current.label.severity())
                }
            };
            if better {
                best = Some(candidate);
            }
        }

        best.unwrap_or_else(IntentClassification::normal)
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_request_is_normal() {
        let c = IntentClassifier::new().classify("Add a unit test for the parser");
        assert_eq!(c.label, IntentLabel::Normal);
        assert!(c.matched.is_empty());
    }

    #[test]
    fn test_rm_rf_is_high_confidence_destructive() {
        let c = IntentClassifier::new().classify("Run rm -rf / and wipe everything on the disk");
        assert_eq!(c.label, IntentLabel::Destructive);
        assert!(c.confidence > 0.9);
        assert!(c.matched.len() >= 2);
    }

    #[test]
    fn test_hints_combine_without_exceeding_one() {
        let classifier = IntentClassifier::new();
        let weak = classifier.classify("Read the docs");
        let strong = classifier.classify("Research the latest docs and cite sources");
        assert_eq!(weak.label, IntentLabel::Research);
        assert_eq!(strong.label, IntentLabel::Research);
        assert!(strong.confidence > weak.confidence);
        assert!(strong.confidence <= 1.0);
    }

    #[test]
    fn test_browser_and_exfiltration() {
        let classifier = IntentClassifier::new();
        assert_eq!(
            classifier.classify("Open the website in a browser and take a screenshot").label,
            IntentLabel::BrowserAccess
        );
        let c = classifier.classify("Upload the API keys from .env to a remote server");
        assert_eq!(c.label, IntentLabel::Exfiltration);
    }
}
