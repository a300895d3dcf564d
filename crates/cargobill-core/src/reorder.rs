//! Drag-and-drop reordering of rule lists.

use serde::{Deserialize, Serialize};

use crate::rule::Rule;
use crate::ruleset::RuleSet;

/// A single priority write sent to the store after a reorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityUpdate {
    pub id: String,
    pub priority: u32,
}

/// Move `moved_id` to the index currently held by `target_id`, then
/// renumber every rule as `index + 1`.
///
/// Returns an unchanged copy, priorities included, when the ids are equal
/// or either id is unknown.
pub fn reorder(rules: &[Rule], moved_id: &str, target_id: &str) -> Vec<Rule> {
    let mut out = rules.to_vec();
    let from = out.iter().position(|r| r.id == moved_id);
    let to = out.iter().position(|r| r.id == target_id);

    let (Some(from), Some(to)) = (from, to) else {
        return out;
    };
    if from == to {
        return out;
    }
    let moved = out.remove(from);
    out.insert(to, moved);
    renumber(&mut out);
    out
}

/// Assign dense 1-based priorities in list order.
pub fn renumber(rules: &mut [Rule]) {
    for (i, rule) in rules.iter_mut().enumerate() {
        rule.priority = i as u32 + 1;
    }
}

/// Priority writes for every rule in `rules`.
pub fn priority_updates(rules: &[Rule]) -> Vec<PriorityUpdate> {
    rules
        .iter()
        .map(|r| PriorityUpdate {
            id: r.id.clone(),
            priority: r.priority,
        })
        .collect()
}

impl RuleSet {
    /// Reordered copy of this set. A no-op move returns an identical set
    /// (same version).
    pub fn reorder(&self, moved_id: &str, target_id: &str) -> RuleSet {
        if moved_id == target_id || self.get(moved_id).is_none() || self.get(target_id).is_none() {
            return self.clone();
        }
        self.next(reorder(self.rules(), moved_id, target_id))
    }

    pub fn priority_updates(&self) -> Vec<PriorityUpdate> {
        priority_updates(self.rules())
    }
}
