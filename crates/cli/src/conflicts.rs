//! Printing merge decisions and their conflicts.

use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use serde_json::Value;

use nodetree_core::merge::{NodeMergeChange, ValueConflict};

use crate::style;

/// Lines of a conflict preview before truncation.
const PREVIEW_LINES: usize = 40;

/// Table of every merge decision.
pub fn print_changes(changes: &[NodeMergeChange]) {
    if changes.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Status", "Path", "Type", "Conflicts"]);

    for change in changes {
        let unresolved = change.unresolved_conflicts().count();
        table.add_row(vec![
            Cell::new(style::merge_status(change.status())),
            Cell::new(change.path()),
            Cell::new(change.merged().type_name()),
            Cell::new(if unresolved == 0 {
                "—".to_string()
            } else {
                unresolved.to_string()
            }),
        ]);
    }

    println!("{}", table);
    println!();
}

/// Details of every conflicted decision, with a diff of each side.
pub fn print_conflicts(changes: &[NodeMergeChange]) {
    let conflicted: Vec<&NodeMergeChange> = changes
        .iter()
        .filter(|c| c.status().is_conflict())
        .collect();
    if conflicted.is_empty() {
        return;
    }

    println!(
        "{}",
        style::header(&format!("Conflicts ({})", conflicted.len()))
    );
    println!();

    for change in conflicted {
        println!("{} {}", style::merge_status(change.status()), change.path());

        if let Some(root) = change.our_root_deleted_parent() {
            println!("  deleted on this side under {}", root);
        }
        if let Some(root) = change.their_root_deleted_parent() {
            println!("  deleted on the other side under {}", root);
        }
        for orphan in change.orphaned_additions() {
            println!("  added under the deletion: {}", orphan);
        }

        for conflict in change.unresolved_conflicts() {
            print_value_conflict(conflict);
        }
        println!();
    }
}

fn print_value_conflict(conflict: &ValueConflict) {
    println!("  property {}", style::header(conflict.property()));
    if let Some(ancestor) = conflict.ancestor() {
        println!("    {} {}", style::dim("ancestor:"), compact(ancestor));
    }

    let ours = pretty(conflict.ours());
    let theirs = pretty(conflict.theirs());
    let patch = diffy::create_patch(&ours, &theirs).to_string();
    for line in patch.lines().skip(2).take(PREVIEW_LINES) {
        println!("    {}", line);
    }
    if patch.lines().count() > PREVIEW_LINES + 2 {
        println!("    {}", style::dim("[preview truncated]"));
    }
}

fn pretty(value: &Value) -> String {
    let mut text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    text.push('\n');
    text
}

fn compact(value: &Value) -> String {
    let mut text = value.to_string();
    if text.len() > 80 {
        let mut end = 77;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        text.push_str("...");
    }
    text
}
