//! `nodetree diff`: node-level changes between two commits.

use anyhow::{Context, Result};
use chrono::Local;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use serde::Serialize;

use nodetree_core::config::AppConfig;
use nodetree_core::diff::{ChangeStatus, FieldDifference, NodeChange};
use nodetree_core::store::NodeStore;

use crate::style;

/// One change as printed with `--json`.
#[derive(Debug, Serialize)]
struct DiffEntry<'a> {
    status: ChangeStatus,
    path: String,
    node_type: &'a str,
    differences: &'a [FieldDifference],
}

pub fn run_diff(
    config: &AppConfig,
    store: &NodeStore,
    old: &str,
    new: &str,
    filter: Option<&str>,
    json: bool,
) -> Result<()> {
    let git = store.git();
    let old_commit = git
        .resolve_commit(old)
        .with_context(|| format!("failed to resolve '{}'", old))?;
    let new_commit = git
        .resolve_commit(new)
        .with_context(|| format!("failed to resolve '{}'", new))?;

    let policy = config.comparison_policy();
    let changes = store
        .diff_commits(old_commit, new_commit, &policy)
        .context("failed to diff commits")?;

    let shown: Vec<&NodeChange> = changes
        .iter()
        .filter(|c| !c.is_noop())
        .filter(|c| match filter {
            Some(pattern) => glob_match::glob_match(pattern, c.path().folder_path()),
            None => true,
        })
        .collect();

    if json {
        let entries: Vec<DiffEntry<'_>> = shown
            .iter()
            .map(|c| DiffEntry {
                status: c.status(),
                path: c.path().to_string(),
                node_type: c.node().map(|n| n.type_name()).unwrap_or_default(),
                differences: c.differences(),
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).context("failed to encode changes")?
        );
        return Ok(());
    }

    let old_info = git.commit_info(old_commit)?;
    let new_info = git.commit_info(new_commit)?;
    println!();
    println!(
        "{}",
        style::header(&format!(
            "{} {} → {} {}",
            style::short_id(old_commit),
            old,
            style::short_id(new_commit),
            new
        ))
    );
    println!(
        "{}",
        style::dim(&format!(
            "{} ({})  →  {} ({})",
            old_info.summary(),
            old_info.authored_at().with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            new_info.summary(),
            new_info.authored_at().with_timezone(&Local).format("%Y-%m-%d %H:%M"),
        ))
    );
    println!();

    if shown.is_empty() {
        println!("{}", style::success("No node changes"));
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Status", "Path", "Type", "Changed properties"]);

    for change in &shown {
        let properties = change
            .differences()
            .iter()
            .map(|d| d.property.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            Cell::new(style::change_status(change.status())),
            Cell::new(change.path()),
            Cell::new(change.node().map(|n| n.type_name()).unwrap_or("—")),
            Cell::new(if properties.is_empty() {
                "—".to_string()
            } else {
                properties
            }),
        ]);
    }

    println!("{}", table);
    println!();
    println!(
        "{} added, {} modified, {} deleted",
        shown
            .iter()
            .filter(|c| c.status() == ChangeStatus::Add)
            .count(),
        shown
            .iter()
            .filter(|c| c.status() == ChangeStatus::Edit)
            .count(),
        shown
            .iter()
            .filter(|c| c.status() == ChangeStatus::Delete)
            .count(),
    );

    Ok(())
}
