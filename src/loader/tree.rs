//! Plain-text rendering of a checkout's directory tree.

use std::path::Path;

use anyhow::{Context, Result};

/// Render `root` as a tree headed by its directory name, one entry per
/// line with no trailing newline.
///
/// Entries are sorted by name; `.git` is listed but not descended into and
/// symlinked directories are not followed.
pub fn render_tree(root: &Path) -> Result<String> {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string());
    let mut lines = vec![name];
    walk(root, "", &mut lines)?;
    Ok(lines.join("\n"))
}

fn walk(dir: &Path, prefix: &str, lines: &mut Vec<String>) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .filter_map(|e| e.ok())
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let count = entries.len();
    for (i, entry) in entries.iter().enumerate() {
        let last = i + 1 == count;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        let connector = if last { "└── " } else { "├── " };
        lines.push(format!("{prefix}{connector}{name}"));

        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir && name != ".git" {
            let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
            walk(&entry.path(), &child_prefix, lines)?;
        }
    }
    Ok(())
}
