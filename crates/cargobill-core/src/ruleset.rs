//! First-match-wins resolution over a priority-ordered rule list, and the
//! session-owned [`RuleSet`] that carries the list between edits.
//!
//! A `RuleSet` is never mutated in place. Every edit (reorder, add, update,
//! remove, toggle) returns a new set with `version + 1`, so a caller can keep
//! the previous set as a snapshot and restore it if persistence fails.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::Record;
use crate::rule::Rule;

/// Outcome of resolving one record against a rule list.
///
/// `matched_rule_id == None` means no active rule matched; the record stays
/// unassigned. That is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentResult {
    pub matched_rule_id: Option<String>,
    pub target_id: Option<String>,
    pub computed_value: f64,
}

impl AssignmentResult {
    pub fn unassigned() -> Self {
        Self {
            matched_rule_id: None,
            target_id: None,
            computed_value: 0.0,
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.matched_rule_id.is_some()
    }
}

/// The first rule, in ascending priority order, that matches `record`.
///
/// Rules sharing a priority keep their list order. Scanning stops at the
/// first match; lower-precedence rules are not evaluated.
pub fn resolve_rule<'a>(record: &Record, rules: &'a [Rule]) -> Option<&'a Rule> {
    let mut ordered: Vec<&Rule> = rules.iter().collect();
    ordered.sort_by_key(|r| r.priority);
    ordered.into_iter().find(|r| r.matches(record))
}

/// Resolve `record` against `rules`. Never fails.
pub fn resolve(record: &Record, rules: &[Rule]) -> AssignmentResult {
    match resolve_rule(record, rules) {
        Some(rule) => AssignmentResult {
            matched_rule_id: Some(rule.id.clone()),
            target_id: Some(rule.assignment.target_id.clone()),
            computed_value: 0.0,
        },
        None => AssignmentResult::unassigned(),
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleSetError {
    #[error("rule not found: {0}")]
    NotFound(String),

    #[error("duplicate rule id: {0}")]
    DuplicateId(String),
}

/// A versioned, in-memory rule list owned by the session that fetched it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub version: u64,
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Wrap a fetched or imported list. Rules are ordered by priority (ties
    /// keep list order) and renumbered densely from 1, so gaps and shared
    /// priorities in stored data never change which rule is appended last.
    pub fn new(mut rules: Vec<Rule>) -> Result<Self, RuleSetError> {
        {
            let mut seen = HashSet::new();
            if let Some(dup) = rules.iter().find(|r| !seen.insert(r.id.as_str())) {
                return Err(RuleSetError::DuplicateId(dup.id.clone()));
            }
        }
        rules.sort_by_key(|r| r.priority);
        crate::reorder::renumber(&mut rules);
        Ok(Self { version: 0, rules })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn resolve(&self, record: &Record) -> AssignmentResult {
        resolve(record, &self.rules)
    }

    pub fn resolve_rule(&self, record: &Record) -> Option<&Rule> {
        resolve_rule(record, &self.rules)
    }

    pub(crate) fn next(&self, rules: Vec<Rule>) -> Self {
        Self {
            version: self.version + 1,
            rules,
        }
    }

    /// Append a rule at the lowest precedence.
    pub fn with_rule(&self, mut rule: Rule) -> Result<Self, RuleSetError> {
        if self.get(&rule.id).is_some() {
            return Err(RuleSetError::DuplicateId(rule.id));
        }
        rule.priority = self.rules.iter().map(|r| r.priority).max().unwrap_or(0) + 1;
        let mut rules = self.rules.clone();
        rules.push(rule);
        Ok(self.next(rules))
    }

    /// Replace the rule with the same id. Its position and priority are kept.
    pub fn with_updated_rule(&self, mut rule: Rule) -> Result<Self, RuleSetError> {
        let idx = self.index_of(&rule.id)?;
        let mut rules = self.rules.clone();
        rule.priority = rules[idx].priority;
        rules[idx] = rule;
        Ok(self.next(rules))
    }

    /// Remove a rule and close the gap in priorities.
    pub fn without_rule(&self, id: &str) -> Result<Self, RuleSetError> {
        let idx = self.index_of(id)?;
        let mut rules = self.rules.clone();
        rules.remove(idx);
        crate::reorder::renumber(&mut rules);
        Ok(self.next(rules))
    }

    pub fn with_active(&self, id: &str, active: bool) -> Result<Self, RuleSetError> {
        let idx = self.index_of(id)?;
        let mut rules = self.rules.clone();
        rules[idx].is_active = active;
        Ok(self.next(rules))
    }

    fn index_of(&self, id: &str) -> Result<usize, RuleSetError> {
        self.rules
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| RuleSetError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, Operator};
    use crate::rule::Logic;
    use crate::rule::tests::rule;

    fn defra_record() -> Record {
        Record::new("r1").with("orig_oe", "DEFRA").with("total_kg", 30.0)
    }

    #[test]
    fn later_rule_matches_when_earlier_fails() {
        let rules = vec![
            rule(
                "heavy",
                1,
                vec![Condition::new("total_kg", Operator::GreaterThan, "50")],
                Logic::And,
            ),
            rule(
                "defra",
                2,
                vec![Condition::new("orig_oe", Operator::Equals, "DEFRA")],
                Logic::And,
            ),
        ];
        let result = resolve(&defra_record(), &rules);
        assert_eq!(result.matched_rule_id.as_deref(), Some("defra"));
        assert_eq!(result.target_id.as_deref(), Some("target-defra"));
    }

    #[test]
    fn lowest_priority_number_wins() {
        let a = rule(
            "a",
            1,
            vec![Condition::new("orig_oe", Operator::Equals, "DEFRA")],
            Logic::And,
        );
        let b = rule(
            "b",
            2,
            vec![Condition::new("total_kg", Operator::LessThan, "100")],
            Logic::And,
        );
        // List order must not matter; priority does.
        let result = resolve(&defra_record(), &[b.clone(), a.clone()]);
        assert_eq!(result.matched_rule_id.as_deref(), Some("a"));
        let result = resolve(&defra_record(), &[a, b]);
        assert_eq!(result.matched_rule_id.as_deref(), Some("a"));
    }

    #[test]
    fn inactive_higher_priority_rule_is_skipped() {
        let mut a = rule(
            "a",
            1,
            vec![Condition::new("orig_oe", Operator::Equals, "DEFRA")],
            Logic::And,
        );
        a.is_active = false;
        let b = rule(
            "b",
            2,
            vec![Condition::new("orig_oe", Operator::NotEmpty, "")],
            Logic::And,
        );
        let result = resolve(&defra_record(), &[a, b]);
        assert_eq!(result.matched_rule_id.as_deref(), Some("b"));
    }

    #[test]
    fn no_match_is_unassigned() {
        let rules = vec![rule(
            "a",
            1,
            vec![Condition::new("orig_oe", Operator::Equals, "GBLHRA")],
            Logic::And,
        )];
        let result = resolve(&defra_record(), &rules);
        assert_eq!(result, AssignmentResult::unassigned());
        assert!(!result.is_assigned());
        assert_eq!(resolve(&defra_record(), &[]), AssignmentResult::unassigned());
    }

    #[test]
    fn catch_all_rule_without_conditions_is_ignored() {
        let rules = vec![rule("empty", 1, vec![], Logic::Or)];
        assert!(!resolve(&defra_record(), &rules).is_assigned());
    }

    #[test]
    fn crud_bumps_version_and_keeps_priorities_dense() {
        let set = RuleSet::new(vec![
            rule("a", 1, vec![], Logic::And),
            rule("b", 2, vec![], Logic::And),
        ])
        .unwrap();
        let set = set.with_rule(rule("c", 99, vec![], Logic::And)).unwrap();
        assert_eq!(set.version, 1);
        assert_eq!(set.get("c").unwrap().priority, 3);

        let set = set.without_rule("a").unwrap();
        assert_eq!(set.version, 2);
        let priorities: Vec<_> = set.rules().iter().map(|r| (r.id.as_str(), r.priority)).collect();
        assert_eq!(priorities, vec![("b", 1), ("c", 2)]);

        let set = set.with_active("b", false).unwrap();
        assert!(!set.get("b").unwrap().is_active);
    }

    #[test]
    fn update_keeps_position() {
        let set = RuleSet::new(vec![
            rule("a", 1, vec![], Logic::And),
            rule("b", 2, vec![], Logic::And),
        ])
        .unwrap();
        let mut edited = rule("a", 7, vec![], Logic::Or);
        edited.name = "renamed".into();
        let set = set.with_updated_rule(edited).unwrap();
        let a = set.get("a").unwrap();
        assert_eq!(a.priority, 1);
        assert_eq!(a.name, "renamed");
    }

    #[test]
    fn crud_errors() {
        let set = RuleSet::new(vec![rule("a", 1, vec![], Logic::And)]).unwrap();
        assert_eq!(
            set.with_rule(rule("a", 1, vec![], Logic::And)),
            Err(RuleSetError::DuplicateId("a".into()))
        );
        assert_eq!(
            set.without_rule("zzz"),
            Err(RuleSetError::NotFound("zzz".into()))
        );
        assert_eq!(set.version, 0);
    }

    #[test]
    fn sparse_import_is_renumbered_and_add_goes_last() {
        let set = RuleSet::new(vec![
            rule(
                "b",
                5,
                vec![Condition::new("orig_oe", Operator::Equals, "DEFRA")],
                Logic::And,
            ),
            rule(
                "a",
                1,
                vec![Condition::new("orig_oe", Operator::Equals, "GBLHRA")],
                Logic::And,
            ),
        ])
        .unwrap();
        let priorities: Vec<_> = set.rules().iter().map(|r| (r.id.as_str(), r.priority)).collect();
        assert_eq!(priorities, vec![("a", 1), ("b", 2)]);

        let set = set
            .with_rule(rule(
                "new",
                1,
                vec![Condition::new("orig_oe", Operator::Equals, "DEFRA")],
                Logic::And,
            ))
            .unwrap();
        assert_eq!(set.get("new").unwrap().priority, 3);
        assert_eq!(set.resolve(&defra_record()).matched_rule_id.as_deref(), Some("b"));
    }

    #[test]
    fn shared_priorities_keep_list_order() {
        let set = RuleSet::new(vec![
            rule("x", 4, vec![], Logic::And),
            rule("y", 4, vec![], Logic::And),
            rule("z", 2, vec![], Logic::And),
        ])
        .unwrap();
        let priorities: Vec<_> = set.rules().iter().map(|r| (r.id.as_str(), r.priority)).collect();
        assert_eq!(priorities, vec![("z", 1), ("x", 2), ("y", 3)]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        assert_eq!(
            RuleSet::new(vec![
                rule("a", 1, vec![], Logic::And),
                rule("a", 2, vec![], Logic::And),
            ]),
            Err(RuleSetError::DuplicateId("a".into()))
        );
    }
}
