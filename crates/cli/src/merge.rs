//! `nodetree merge` and `nodetree rebase`.
//!
//! Both run to completion or stop at the first conflicts. A stopped command
//! leaves the branch untouched; rerun it with a strategy that settles the
//! reported conflicts.

use anyhow::{Context, Result};
use chrono::Local;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use nodetree_core::config::AppConfig;
use nodetree_core::merge::{
    ConflictStrategy, MergePolicy, MergeStatus, NodeMerge, NodeRebase, RebaseStatus,
};
use nodetree_core::store::NodeStore;

use crate::{commit_signature, conflicts, style};

fn policy(config: &AppConfig, strategy: Option<ConflictStrategy>) -> MergePolicy {
    let policy = config.merge_policy();
    match strategy {
        Some(strategy) => policy.with_strategy(strategy),
        None => policy,
    }
}

pub fn run_merge(
    config: &AppConfig,
    store: &NodeStore,
    branch: &str,
    upstream: Option<&str>,
    strategy: Option<ConflictStrategy>,
) -> Result<()> {
    let mut merge = NodeMerge::new(store, branch, upstream, policy(config, strategy))
        .with_context(|| format!("failed to prepare merge into '{}'", branch))?;

    println!();
    println!(
        "{}",
        style::header(&format!(
            "Merging {} ({}) into {} ({})",
            merge.upstream_name(),
            style::short_id(merge.upstream()),
            branch,
            style::short_id(merge.branch_tip())
        ))
    );
    println!(
        "{}",
        style::dim(&format!("merge base {}", style::short_id(merge.merge_base())))
    );
    println!();

    let status = merge.start().context("failed to compute merge")?;
    conflicts::print_changes(merge.changes());

    if status == MergeStatus::Conflicts {
        conflicts::print_conflicts(merge.changes());
        anyhow::bail!(
            "merge has {} conflicted node(s); '{}' was not changed",
            merge.conflicts().count(),
            branch
        );
    }

    let signature = commit_signature(store)?;
    let tip = merge
        .commit(&signature, &signature)
        .context("failed to commit merge")?;

    let summary = match merge.status() {
        MergeStatus::UpToDate => format!("{} is already up to date", branch),
        MergeStatus::FastForward => {
            format!("Fast-forwarded {} to {}", branch, style::short_id(tip))
        }
        _ => format!(
            "Merged {} node change(s) into {} as {}",
            merge.changes().len(),
            branch,
            style::short_id(tip)
        ),
    };
    println!("{}", style::success(&summary));
    println!();
    Ok(())
}

pub fn run_rebase(
    config: &AppConfig,
    store: &NodeStore,
    branch: &str,
    upstream: Option<&str>,
    strategy: Option<ConflictStrategy>,
) -> Result<()> {
    let mut rebase = NodeRebase::new(store, branch, upstream, policy(config, strategy))
        .with_context(|| format!("failed to prepare rebase of '{}'", branch))?;

    println!();
    println!(
        "{}",
        style::header(&format!(
            "Rebasing {} ({} commit(s)) onto {} ({})",
            branch,
            rebase.replayed().len(),
            rebase.upstream_name(),
            style::short_id(rebase.upstream())
        ))
    );
    println!();

    let status = rebase.start().context("failed to rebase")?;

    if status == RebaseStatus::Conflicts {
        let stopped_at = rebase
            .current_commit()
            .map(|oid| {
                let summary = store
                    .git()
                    .commit_info(oid)
                    .map(|info| info.summary().to_string())
                    .unwrap_or_default();
                format!("{} {}", style::short_id(oid), summary)
            })
            .unwrap_or_default();
        println!(
            "{}",
            style::warn(&format!(
                "Stopped at commit {} of {}: {}",
                rebase.completed().len() + 1,
                rebase.replayed().len(),
                stopped_at
            ))
        );
        println!();
        conflicts::print_changes(rebase.current_changes());
        conflicts::print_conflicts(rebase.current_changes());
        anyhow::bail!("rebase stopped on conflicts; '{}' was not changed", branch);
    }

    if rebase.completed().is_empty() {
        println!(
            "{}",
            style::success(&format!(
                "Nothing to replay; {} now points at {}",
                branch,
                style::short_id(rebase.head())
            ))
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Original", "Rewritten", "Date", "Summary"]);

    for completed in rebase.completed() {
        let info = store.git().commit_info(completed.original)?;
        let rewritten = match completed.rewritten {
            Some(oid) => style::short_id(oid),
            None => style::dim("skipped"),
        };
        table.add_row(vec![
            Cell::new(style::short_id(completed.original)),
            Cell::new(rewritten),
            Cell::new(info.authored_at().with_timezone(&Local).format("%Y-%m-%d %H:%M")),
            Cell::new(info.summary()),
        ]);
    }

    println!("{}", table);
    println!();
    println!(
        "{}",
        style::success(&format!(
            "Rebased {} onto {}; head is {}",
            branch,
            rebase.upstream_name(),
            style::short_id(rebase.head())
        ))
    );
    println!();
    Ok(())
}
