//! Plain-text tables for rule lists, assignment plans, and cache usage.

use cargobill_cache::{CacheEntryMeta, CleanupReport, QuotaStatus};
use cargobill_core::{Condition, RateDefinition, RuleListKind, RuleSet};
use cargobill_store::{AssignmentPlan, AssignmentStatus, BulkUpdateReport};

const MAX_ROWS: usize = 50;

// ── Rules and rates ──

pub fn print_rules(kind: RuleListKind, rules: &RuleSet) {
    println!("=== {kind} rules (version {}) ===", rules.version);
    if rules.is_empty() {
        println!("  (none)");
        return;
    }
    println!(
        "  {:>4}  {:<20} {:<6} {:<24} {}",
        "prio", "id", "active", "target", "conditions"
    );
    for rule in rules.rules() {
        let target = match &rule.assignment.rate_definition_id {
            Some(rate) => format!("{} @ {rate}", rule.assignment.target_id),
            None => rule.assignment.target_id.clone(),
        };
        let joiner = format!(" {} ", serde_plain(&rule.logic));
        let conditions: Vec<String> = rule.conditions.iter().map(describe_condition).collect();
        println!(
            "  {:>4}  {:<20} {:<6} {:<24} {}",
            rule.priority,
            truncate(&rule.id, 20),
            if rule.is_active { "yes" } else { "no" },
            truncate(&target, 24),
            if conditions.is_empty() {
                "(never matches)".to_string()
            } else {
                conditions.join(&joiner)
            }
        );
    }
}

pub fn print_rates(rates: &[RateDefinition]) {
    println!("=== rates ===");
    for rate in rates {
        let multiplier = rate
            .multiplier
            .map(|m| format!(" x{m}"))
            .unwrap_or_default();
        println!(
            "  {:<20} {:<12} {:>10.2} {}{}",
            truncate(&rate.id, 20),
            rate.rate_type.to_string(),
            rate.base_rate,
            rate.currency,
            multiplier
        );
    }
}

fn describe_condition(c: &Condition) -> String {
    let op = serde_plain(&c.operator);
    match &c.value2 {
        Some(upper) => format!("{} {op} {}..{upper}", c.field, c.value),
        None if c.value.is_empty() => format!("{} {op}", c.field),
        None => format!("{} {op} {}", c.field, c.value),
    }
}

/// The serde name of a unit enum variant, without quotes.
fn serde_plain<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .map(|s| s.trim_matches('"').to_string())
        .unwrap_or_default()
}

// ── Assignments ──

pub fn print_plan(plan: &AssignmentPlan) {
    println!(
        "  {:<38} {:<20} {:<24} {:>10}  {}",
        "record", "rule", "target", "value", "status"
    );
    for row in plan.rows.iter().take(MAX_ROWS) {
        println!(
            "  {:<38} {:<20} {:<24} {:>10.2}  {}",
            truncate(&row.record_id, 38),
            truncate(row.matched_rule_id.as_deref().unwrap_or("-"), 20),
            truncate(row.target_id.as_deref().unwrap_or("-"), 24),
            row.computed_value,
            serde_plain(&row.status)
        );
    }
    if plan.rows.len() > MAX_ROWS {
        println!("  ... and {} more", plan.rows.len() - MAX_ROWS);
    }
    println!();
    println!(
        "  assigned {}, needs manual rate {}, unassigned {}",
        plan.count(AssignmentStatus::Assigned),
        plan.count(AssignmentStatus::NeedsManualRate),
        plan.count(AssignmentStatus::Unassigned)
    );
}

pub fn print_update_report(report: &BulkUpdateReport) {
    println!(
        "  updated {}, failed {}",
        report.total_updated, report.total_failed
    );
    for failure in report.errors.iter().take(MAX_ROWS) {
        println!("    {}: {}", failure.id, failure.message);
    }
}

// ── Cache ──

pub fn print_quota(status: &QuotaStatus, quota_bytes: u64) {
    println!("=== cache ===");
    println!(
        "  {:<26} {} / {}",
        "used",
        human_bytes(status.used_bytes),
        human_bytes(quota_bytes)
    );
    println!("  {:<26} {}", "available", human_bytes(status.available_bytes));
    println!("  {:<26} {:.1}%", "percentage", status.percentage);
    let state = if status.is_full {
        "full"
    } else if status.is_near_limit {
        "near limit"
    } else {
        "ok"
    };
    println!("  {:<26} {state}", "state");
}

pub fn print_entries(entries: &[CacheEntryMeta]) {
    if entries.is_empty() {
        return;
    }
    println!();
    for entry in entries.iter().take(MAX_ROWS) {
        println!(
            "  {:<48} {:>10}  {}",
            truncate(&entry.key, 48),
            human_bytes(entry.size),
            entry.stored_at.format("%Y-%m-%d %H:%M")
        );
    }
}

pub fn print_cleanup(report: &CleanupReport) {
    println!(
        "  strategies run: {}",
        if report.strategies_used.is_empty() {
            "(none)".to_string()
        } else {
            report.strategies_used.join(", ")
        }
    );
    println!("  items removed:  {}", report.total_items_removed);
    if let Some(status) = &report.final_status {
        println!("  now at:         {:.1}%", status.percentage);
    }
    if !report.success {
        println!("  cache is still full");
    }
}

fn human_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KIB * KIB {
        format!("{:.1} MiB", b / (KIB * KIB))
    } else if b >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}
