use std::collections::HashMap;

use automaton_browser_worker::ElementInfo;
use automaton_core_types::ActionKind;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// Caches tier 3 results per `(instruction, content-hash of snapshot)` for
/// the session lifetime.
#[derive(Default)]
pub struct PlannerCache {
    entries: Mutex<HashMap<(String, String), Vec<ActionKind>>>,
}

fn snapshot_hash(elements: &[ElementInfo]) -> String {
    let mut hasher = Sha256::new();
    for element in elements {
        hasher.update(element.selector.as_bytes());
        hasher.update([0u8]);
        hasher.update(element.text.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

impl PlannerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, instruction: &str, elements: &[ElementInfo]) -> Option<Vec<ActionKind>> {
        let key = (instruction.to_string(), snapshot_hash(elements));
        self.entries.lock().get(&key).cloned()
    }

    pub fn put(&self, instruction: &str, elements: &[ElementInfo], plan: Vec<ActionKind>) {
        let key = (instruction.to_string(), snapshot_hash(elements));
        self.entries.lock().insert(key, plan);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn element(selector: &str) -> ElementInfo {
        ElementInfo {
            selector: selector.to_string(),
            tag: "div".to_string(),
            role: None,
            accessible_name: None,
            aria_label: None,
            placeholder: None,
            text: String::new(),
            attrs: Map::new(),
            visible: true,
            area: 1.0,
            document_order: 0,
        }
    }

    #[test]
    fn identical_snapshot_hits_cache() {
        let cache = PlannerCache::new();
        let elements = vec![element("#a")];
        cache.put("do the thing", &elements, vec![]);
        assert!(cache.get("do the thing", &elements).is_some());
    }

    #[test]
    fn changed_snapshot_misses_cache() {
        let cache = PlannerCache::new();
        cache.put("do the thing", &[element("#a")], vec![]);
        assert!(cache.get("do the thing", &[element("#b")]).is_none());
    }
}
