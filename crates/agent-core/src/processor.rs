//! Per-run loop guards.

use serde_json::Value;

/// Default number of identical consecutive calls treated as a loop
pub const DOOM_LOOP_THRESHOLD: usize = 3;

/// Detects a model calling the same tool with the same arguments over and over.
///
/// Arguments are compared as canonical JSON, so key order and whitespace do not
/// matter. The same tool with different arguments is normal repetition.
#[derive(Clone, Debug)]
pub struct DoomLoopDetector {
    threshold: usize,
    history: Vec<(String, String)>,
}

impl Default for DoomLoopDetector {
    fn default() -> Self {
        Self::new(DOOM_LOOP_THRESHOLD)
    }
}

impl DoomLoopDetector {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            history: Vec::new(),
        }
    }

    /// Record a call; true when the last `threshold` calls are identical
    pub fn record(&mut self, tool_name: &str, arguments_json: &str) -> bool {
        self.history
            .push((tool_name.to_string(), canonical(arguments_json)));

        if self.history.len() < self.threshold {
            return false;
        }
        let recent = &self.history[self.history.len() - self.threshold..];
        recent.iter().all(|call| call == &recent[0])
    }
}

fn canonical(arguments_json: &str) -> String {
    if arguments_json.trim().is_empty() {
        return "{}".into();
    }
    // serde_json maps are sorted by key
    serde_json::from_str::<Value>(arguments_json)
        .map_or_else(|_| arguments_json.trim().to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_calls_trip_at_threshold() {
        let mut detector = DoomLoopDetector::default();
        assert!(!detector.record("todo_read", "{}"));
        assert!(!detector.record("todo_read", ""));
        assert!(detector.record("todo_read", " { } "));
    }

    #[test]
    fn test_key_order_is_ignored() {
        let mut detector = DoomLoopDetector::new(2);
        assert!(!detector.record("search", r#"{"q":"x","n":1}"#));
        assert!(detector.record("search", r#"{"n":1,"q":"x"}"#));
    }

    #[test]
    fn test_different_arguments_reset_the_run() {
        let mut detector = DoomLoopDetector::new(3);
        assert!(!detector.record("search", r#"{"q":"a"}"#));
        assert!(!detector.record("search", r#"{"q":"a"}"#));
        assert!(!detector.record("search", r#"{"q":"b"}"#));
        assert!(!detector.record("search", r#"{"q":"b"}"#));
        assert!(!detector.record("other", r#"{"q":"b"}"#));
    }
}
