//! Share daemon configuration (smb.conf) reconciliation.
//!
//! A share block starts at a `[name]` header and runs to the next blank line
//! (or the next header). Existing blocks are never merged field by field: a
//! block with the requested name is removed whole and a fresh one is appended.
//! Section names are matched case-insensitively, as the share daemon does.

use std::ops::Range;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Default share daemon configuration path.
pub const SMB_CONF_PATH: &str = "/etc/samba/smb.conf";

/// Longest share name accepted.
const MAX_SHARE_NAME_LEN: usize = 80;

/// Section names with special meaning to the share daemon.
const RESERVED_SECTIONS: &[&str] = &["global", "homes", "printers", "print$"];

pub const CREATE_MASK: &str = "0664";
pub const DIRECTORY_MASK: &str = "0775";

/// Desired state of one network share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareDeclaration {
    pub share_name: String,
    pub path: PathBuf,
    pub permitted_user: String,
}

impl ShareDeclaration {
    /// Creates a declaration after validating the share name and path.
    pub fn new(
        share_name: impl Into<String>,
        path: impl Into<PathBuf>,
        permitted_user: impl Into<String>,
    ) -> Result<Self> {
        let declaration = Self {
            share_name: share_name.into(),
            path: path.into(),
            permitted_user: permitted_user.into(),
        };
        validate_share_name(&declaration.share_name)?;
        if !declaration.path.is_absolute() {
            return Err(Error::invalid(
                "share path",
                format!("{} is not absolute", declaration.path.display()),
            ));
        }
        if declaration.permitted_user.trim().is_empty() {
            return Err(Error::invalid("user", "must not be empty"));
        }
        Ok(declaration)
    }

    /// Renders the share block, terminated by a newline.
    pub fn to_block(&self) -> String {
        let fields = [
            ("path", self.path.display().to_string()),
            ("available", "yes".to_string()),
            ("valid users", self.permitted_user.clone()),
            ("read only", "no".to_string()),
            ("browsable", "yes".to_string()),
            ("create mask", CREATE_MASK.to_string()),
            ("directory mask", DIRECTORY_MASK.to_string()),
        ];

        let mut block = format!("[{}]\n", self.share_name);
        for (key, value) in fields {
            block.push_str(&format!("    {} = {}\n", key, value));
        }
        block
    }
}

/// Validates a share name.
pub fn validate_share_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid("share name", "must not be empty"));
    }
    if name != name.trim() {
        return Err(Error::invalid(
            "share name",
            "must not start or end with whitespace",
        ));
    }
    if name.chars().count() > MAX_SHARE_NAME_LEN {
        return Err(Error::invalid(
            "share name",
            format!("must be at most {} characters", MAX_SHARE_NAME_LEN),
        ));
    }
    if name.chars().any(|c| c == '[' || c == ']' || c.is_control()) {
        return Err(Error::invalid(
            "share name",
            "must not contain brackets or control characters",
        ));
    }
    if RESERVED_SECTIONS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
    {
        return Err(Error::invalid(
            "share name",
            format!("'{}' is a reserved section", name),
        ));
    }
    Ok(())
}

/// A named section located in the configuration text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareBlock {
    pub name: String,
    /// Line range covered by the block, including its terminating blank line.
    pub lines: Range<usize>,
}

/// Edit that brings the share store to the desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharePlan {
    /// No block with this name exists.
    AppendOnly { block: String },
    /// One or more blocks with this name exist and are replaced.
    RemoveThenAppend {
        existing: Vec<ShareBlock>,
        block: String,
    },
}

impl SharePlan {
    /// Returns true if the plan discards an existing share definition.
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, SharePlan::RemoveThenAppend { .. })
    }

    /// Applies the plan to the snapshot it was computed from.
    ///
    /// Returns None if the blocks carrying the share name in `store` are not
    /// the ones the plan was computed against.
    pub fn apply(&self, store: &str) -> Option<String> {
        let (kept, block) = match self {
            SharePlan::AppendOnly { block } => {
                let name = block.lines().next().and_then(section_name)?;
                if !blocks_named(store, &[name]).is_empty() {
                    return None;
                }
                (store.to_string(), block)
            }
            SharePlan::RemoveThenAppend { existing, block } => {
                let names: Vec<&str> = existing.iter().map(|b| b.name.as_str()).collect();
                if blocks_named(store, &names) != *existing {
                    return None;
                }
                (remove_line_ranges(store, existing), block)
            }
        };

        let mut output = kept;
        if !output.is_empty() {
            if !output.ends_with('\n') {
                output.push('\n');
            }
            if !output.ends_with("\n\n") {
                output.push('\n');
            }
        }
        output.push_str(block);
        Some(output)
    }
}

/// Computes the plan that reconciles `store` with `desired`.
pub fn reconcile(desired: &ShareDeclaration, store: &str) -> SharePlan {
    let block = desired.to_block();
    let existing = blocks_named(store, &[desired.share_name.as_str()]);

    if existing.is_empty() {
        SharePlan::AppendOnly { block }
    } else {
        SharePlan::RemoveThenAppend { existing, block }
    }
}

/// Locates every section in the store.
pub fn find_blocks(store: &str) -> Vec<ShareBlock> {
    let lines: Vec<&str> = store.lines().collect();
    let mut blocks = Vec::new();
    let mut index = 0;

    while index < lines.len() {
        let Some(name) = section_name(lines[index]) else {
            index += 1;
            continue;
        };

        let start = index;
        index += 1;
        while index < lines.len() {
            if lines[index].trim().is_empty() {
                // The separator belongs to the block
                index += 1;
                break;
            }
            if section_name(lines[index]).is_some() {
                break;
            }
            index += 1;
        }

        blocks.push(ShareBlock {
            name: name.to_string(),
            lines: start..index,
        });
    }

    blocks
}

/// Blocks whose name matches any of `names`, ignoring ASCII case.
fn blocks_named(store: &str, names: &[&str]) -> Vec<ShareBlock> {
    find_blocks(store)
        .into_iter()
        .filter(|b| names.iter().any(|n| b.name.eq_ignore_ascii_case(n)))
        .collect()
}

fn section_name(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
}

fn remove_line_ranges(store: &str, blocks: &[ShareBlock]) -> String {
    store
        .split_inclusive('\n')
        .enumerate()
        .filter(|(i, _)| !blocks.iter().any(|b| b.lines.contains(i)))
        .map(|(_, line)| line)
        .collect()
}
