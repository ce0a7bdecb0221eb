//! Shared styling utilities for CLI output.

use console::Style;

use nodetree_core::diff::ChangeStatus;
use nodetree_core::merge::MergeChangeStatus;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Colored label for a node change.
pub fn change_status(status: ChangeStatus) -> String {
    let style = match status {
        ChangeStatus::Add => Style::new().green(),
        ChangeStatus::Edit => Style::new().yellow(),
        ChangeStatus::Delete => Style::new().red(),
    };
    style.apply_to(status.to_string()).to_string()
}

/// Colored label for a merge decision; conflicts are bold red.
pub fn merge_status(status: MergeChangeStatus) -> String {
    let style = match status {
        MergeChangeStatus::Add => Style::new().green(),
        MergeChangeStatus::Edit => Style::new().yellow(),
        MergeChangeStatus::Delete => Style::new().red(),
        MergeChangeStatus::EditConflict | MergeChangeStatus::TreeConflict => {
            Style::new().red().bold()
        }
    };
    style.apply_to(status.to_string()).to_string()
}

/// Abbreviated commit id.
pub fn short_id(oid: git2::Oid) -> String {
    let mut id = oid.to_string();
    id.truncate(8);
    id
}
