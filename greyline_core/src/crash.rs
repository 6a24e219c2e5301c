use log::info;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Tracks failing executions and deduplicates them by result signature.
///
/// The map goes input id to signature, so the same input reported twice
/// never inflates the count, and uniqueness is measured over distinct
/// signatures rather than distinct inputs.
#[derive(Debug, Default)]
pub struct CrashRegistry {
    results: HashMap<String, String>,
}

impl CrashRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failing input and its signature. Returns true when the
    /// signature was not represented before this call.
    pub fn record(&mut self, input_id: &str, signature: &str) -> bool {
        let before = self.unique_count();
        self.results
            .insert(input_id.to_string(), signature.to_string());
        let is_new = self.unique_count() > before;
        if is_new {
            info!("new unique crash signature: {signature}");
        }
        is_new
    }

    /// Number of distinct crash signatures seen so far.
    pub fn unique_count(&self) -> usize {
        self.results.values().collect::<HashSet<_>>().len()
    }

    /// Distinct signatures in stable order, for the end-of-run summary.
    pub fn signatures(&self) -> BTreeSet<String> {
        self.results.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_signature_is_new() {
        let mut registry = CrashRegistry::new();
        assert!(registry.record("input-a", "index out of bounds"));
        assert_eq!(registry.unique_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn repeated_signature_from_different_inputs_is_not_new() {
        let mut registry = CrashRegistry::new();
        assert!(registry.record("input-a", "divide by zero"));
        assert!(!registry.record("input-b", "divide by zero"));
        assert_eq!(registry.unique_count(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn distinct_signatures_each_count_once() {
        let mut registry = CrashRegistry::new();
        registry.record("a", "sig-1");
        registry.record("b", "sig-2");
        registry.record("c", "sig-1");
        assert_eq!(registry.unique_count(), 2);
        assert_eq!(
            registry.signatures().into_iter().collect::<Vec<_>>(),
            vec!["sig-1".to_string(), "sig-2".to_string()]
        );
    }

    #[test]
    fn re_recording_an_input_overwrites_its_signature() {
        let mut registry = CrashRegistry::new();
        registry.record("a", "sig-1");
        // The overwrite replaces the only signature, so the distinct set
        // stays at one and nothing is newly unique.
        assert!(!registry.record("a", "sig-2"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.unique_count(), 1);
        assert_eq!(
            registry.signatures().into_iter().collect::<Vec<_>>(),
            vec!["sig-2".to_string()]
        );
    }
}
