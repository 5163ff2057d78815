// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Subprocess Output Classifier
 * Turns raw subprocess console lines into lifecycle events
 *
 * Features:
 * - Ordered substring marker tables kept as pure data
 * - Severity split tables for the injection tool's WARNING/CRITICAL lines
 * - Best-effort heuristics: unmatched lines produce no event
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use crate::events::ScanEvent;

/// One substring-to-event rule
#[derive(Debug, Clone)]
pub struct MarkerRule {
    pub needle: String,
    pub event: ScanEvent,
}

/// Ordered list of substring markers for a tool's console format.
///
/// The markers are fixed, case-sensitive substrings taken from the external
/// tool's own output. A line emits at most one event: the first rule whose
/// needle it contains wins. The table is data so it can be swapped when the
/// tool's console format changes, without touching control flow.
#[derive(Debug, Clone)]
pub struct MarkerTable {
    rules: Vec<MarkerRule>,
}

impl MarkerTable {
    pub fn new(rules: Vec<MarkerRule>) -> Self {
        Self { rules }
    }

    /// Marker table for the scanner tool's quick-progress console output.
    pub fn scanner_default() -> Self {
        Self::new(vec![
            MarkerRule {
                needle: "Spidering".to_string(),
                event: ScanEvent::Spidering,
            },
            MarkerRule {
                needle: "Active scanning".to_string(),
                event: ScanEvent::ActiveScan,
            },
            MarkerRule {
                needle: "Attack complete".to_string(),
                event: ScanEvent::AttackComplete,
            },
        ])
    }

    /// Classify one console line. Unrecognized lines yield `None`.
    pub fn classify(&self, line: &str) -> Option<ScanEvent> {
        self.rules
            .iter()
            .find(|rule| line.contains(&rule.needle))
            .map(|rule| rule.event.clone())
    }
}

/// Severity split rule for tools that tag lines with a severity marker and
/// whose harmless messages are only recognizable by substring.
#[derive(Debug, Clone)]
pub struct SeverityRule {
    /// Severity tag, e.g. `[WARNING]`
    pub tag: String,
    /// Messages containing any of these are routine tool chatter
    pub safe_needles: Vec<String>,
    pub safe_event: ScanEvent,
    pub real_event: ScanEvent,
}

/// Classifier for the injection tool's console output.
///
/// Lines without a known severity tag are ignored; tagged lines carry the
/// text after the tag as the event payload.
#[derive(Debug, Clone)]
pub struct InjectionClassifier {
    rules: Vec<SeverityRule>,
}

impl Default for InjectionClassifier {
    fn default() -> Self {
        Self {
            rules: vec![
                SeverityRule {
                    tag: "[WARNING]".to_string(),
                    safe_needles: vec![
                        "does not seem to be injectable".to_string(),
                        "does not appear to be dynamic".to_string(),
                        "might not be injectable".to_string(),
                        "using unescaped version of the test".to_string(),
                    ],
                    safe_event: ScanEvent::InjectionWarningSafe,
                    real_event: ScanEvent::InjectionWarningReal,
                },
                SeverityRule {
                    tag: "[CRITICAL]".to_string(),
                    safe_needles: vec![
                        "all tested parameters appear to be not injectable".to_string(),
                    ],
                    safe_event: ScanEvent::InjectionCriticalSafe,
                    real_event: ScanEvent::InjectionCriticalReal,
                },
            ],
        }
    }
}

impl InjectionClassifier {
    pub fn new(rules: Vec<SeverityRule>) -> Self {
        Self { rules }
    }

    /// Classify one console line into a severity event plus the message text
    /// after the severity tag.
    pub fn classify(&self, line: &str) -> Option<(ScanEvent, String)> {
        for rule in &self.rules {
            if let Some(idx) = line.find(&rule.tag) {
                let message = line[idx + rule.tag.len()..].trim().to_string();
                let event = if rule.safe_needles.iter().any(|n| line.contains(n)) {
                    rule.safe_event.clone()
                } else {
                    rule.real_event.clone()
                };
                return Some((event, message));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scanner_phases_in_order() {
        let table = MarkerTable::scanner_default();
        let lines = [
            "ZAP 2.x started",
            "Spidering http://example.com",
            "Active scanning http://example.com",
            "Attack complete",
        ];

        let events: Vec<ScanEvent> =
            lines.iter().filter_map(|l| table.classify(l)).collect();

        assert_eq!(
            events,
            vec![
                ScanEvent::Spidering,
                ScanEvent::ActiveScan,
                ScanEvent::AttackComplete,
            ]
        );
    }

    #[test]
    fn test_classifier_emits_per_matching_line() {
        // The classifier is stateless: a repeated marker line emits again.
        let table = MarkerTable::scanner_default();
        let events: Vec<ScanEvent> = ["Spidering a", "Spidering b"]
            .iter()
            .filter_map(|l| table.classify(l))
            .collect();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_unrecognized_line_is_ignored() {
        let table = MarkerTable::scanner_default();
        assert_eq!(table.classify("Loading add-ons..."), None);
        assert_eq!(table.classify(""), None);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let table = MarkerTable::new(vec![
            MarkerRule {
                needle: "scan".to_string(),
                event: ScanEvent::ActiveScan,
            },
            MarkerRule {
                needle: "scanning".to_string(),
                event: ScanEvent::Spidering,
            },
        ]);
        assert_eq!(table.classify("scanning now"), Some(ScanEvent::ActiveScan));
    }

    #[test]
    fn test_injection_warning_split() {
        let classifier = InjectionClassifier::default();

        let (event, message) = classifier
            .classify("[12:00:01] [WARNING] GET parameter 'id' does not seem to be injectable")
            .unwrap();
        assert_eq!(event, ScanEvent::InjectionWarningSafe);
        assert!(message.contains("does not seem to be injectable"));

        let (event, _) = classifier
            .classify("[12:00:02] [WARNING] reflective value(s) found and filtering out")
            .unwrap();
        assert_eq!(event, ScanEvent::InjectionWarningReal);
    }

    #[test]
    fn test_injection_critical_split() {
        let classifier = InjectionClassifier::default();

        let (event, _) = classifier
            .classify("[CRITICAL] all tested parameters appear to be not injectable")
            .unwrap();
        assert_eq!(event, ScanEvent::InjectionCriticalSafe);

        let (event, message) = classifier
            .classify("[CRITICAL] unable to connect to the target URL")
            .unwrap();
        assert_eq!(event, ScanEvent::InjectionCriticalReal);
        assert_eq!(message, "unable to connect to the target URL");
    }

    #[test]
    fn test_injection_untagged_line_ignored() {
        let classifier = InjectionClassifier::default();
        assert_eq!(classifier.classify("[INFO] testing connection"), None);
    }
}
