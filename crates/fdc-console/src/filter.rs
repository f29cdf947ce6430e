use std::collections::HashSet;

use crate::registry::{EntityRecord, Registry};

/// Search-time visibility filter layered on top of the registry.
///
/// Filtering never deletes: hidden entities keep receiving status merges, so
/// clearing the filter restores full visibility without a re-fetch.
#[derive(Debug, Default)]
pub struct FilterEngine {
    /// `None` means unfiltered, everything visible.
    allow: Option<HashSet<String>>,
}

impl FilterEngine {
    /// Replaces the allow-set and recomputes visibility for every record.
    /// The single operation allowed to rescan the whole registry.
    pub fn set_filter(&mut self, allow: Option<HashSet<String>>, registry: &mut Registry) {
        self.allow = allow;
        for record in registry.all_mut() {
            record.visible = match &self.allow {
                None => true,
                Some(allowed) => allowed.contains(&record.identity),
            };
        }
        registry.mark_all_dirty();
    }

    /// Pure query, no side effect.
    pub fn visibility_of(&self, identity: &str) -> bool {
        match &self.allow {
            None => true,
            Some(allowed) => allowed.contains(identity),
        }
    }

    /// Computes visibility for a record that just entered the registry.
    pub fn refresh(&self, record: &mut EntityRecord) {
        record.visible = self.visibility_of(&record.identity);
    }

    pub fn is_active(&self) -> bool {
        self.allow.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdc_core::wire::EntityPayload;
    use serde_json::json;

    fn registry_with(identities: &[&str]) -> Registry {
        let mut registry = Registry::default();
        for identity in identities {
            let mut attributes = serde_json::Map::new();
            attributes.insert("game".to_string(), json!("tanks"));
            registry.upsert(&EntityPayload {
                identity: identity.to_string(),
                status: None,
                attributes,
            });
        }
        registry
    }

    #[test]
    fn allow_set_hides_without_removing() {
        let mut registry = registry_with(&["a", "b"]);
        let mut filter = FilterEngine::default();

        filter.set_filter(Some(HashSet::from(["a".to_string()])), &mut registry);
        assert!(registry.get("a").unwrap().visible);
        assert!(!registry.get("b").unwrap().visible);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("b").unwrap().attribute_str("game"), Some("tanks"));
    }

    #[test]
    fn clearing_filter_restores_visibility_with_no_data_loss() {
        let mut registry = registry_with(&["a", "b"]);
        let mut filter = FilterEngine::default();
        filter.set_filter(Some(HashSet::from(["a".to_string()])), &mut registry);

        filter.set_filter(None, &mut registry);
        assert!(registry.get("b").unwrap().visible);
        assert_eq!(registry.get("b").unwrap().attribute_str("game"), Some("tanks"));
        assert!(!filter.is_active());
    }

    #[test]
    fn visibility_of_is_side_effect_free() {
        let mut registry = registry_with(&["a"]);
        let mut filter = FilterEngine::default();
        filter.set_filter(Some(HashSet::from(["other".to_string()])), &mut registry);

        assert!(!filter.visibility_of("a"));
        assert!(filter.visibility_of("other"));
        // the query changed nothing
        assert!(!registry.get("a").unwrap().visible);
    }

    #[test]
    fn late_arrivals_respect_the_active_filter() {
        let mut registry = registry_with(&["a"]);
        let mut filter = FilterEngine::default();
        filter.set_filter(Some(HashSet::from(["a".to_string()])), &mut registry);

        let record = registry.upsert(&EntityPayload {
            identity: "late".to_string(),
            status: None,
            attributes: serde_json::Map::new(),
        });
        filter.refresh(record);
        assert!(!registry.get("late").unwrap().visible);
    }
}
