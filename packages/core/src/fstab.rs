//! Fstab parsing and reconciliation module.
//!
//! This module parses `/etc/fstab` records and computes the minimal edit
//! needed to bring the table in line with a desired [`MountDeclaration`].
//! Reconciliation is pure: it takes a snapshot of the table text and returns
//! a [`TablePlan`]. Applying a plan to the same snapshot rewrites at most one
//! line and leaves every other line byte-for-byte intact.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::Error;
use crate::error::Result;
use crate::preset::{self, FilesystemKind};

/// Default fstab path.
pub const FSTAB_PATH: &str = "/etc/fstab";

/// Options written when every option of a record was stripped.
const FALLBACK_OPTIONS: &str = "defaults";

/// Represents a single fstab entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    /// The device identifier (e.g., "UUID=xxx").
    pub fs_spec: String,
    /// Mount point path.
    pub mount_point: PathBuf,
    /// Filesystem type (e.g., "ext4", "ntfs3").
    pub vfs_type: String,
    /// Mount options.
    pub mount_options: Vec<String>,
    /// This field is used by dump(8) to determine which filesystems need to be dumped.
    pub dump: u8,
    /// This field is used by fsck(8) to determine the order in which filesystem checks are done at boot time.
    pub fsck_order: u16,
}

impl FstabEntry {
    /// Formats the entry as an fstab line.
    pub fn to_fstab_line(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.fs_spec,
            escape_fstab_path(&self.mount_point.to_string_lossy()),
            self.vfs_type,
            self.mount_options.join(","),
            self.dump,
            self.fsck_order
        )
    }

    /// Parses a single fstab line into an entry.
    ///
    /// Returns None for comments and empty lines. A record with fewer than
    /// four or more than six fields is an error. Missing dump/pass fields
    /// default to 0.
    pub fn from_line(line: &str) -> Result<Option<Self>> {
        let line = line.trim();

        // Skip comments and empty lines
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 || parts.len() > 6 {
            return Err(Error::FstabParse {
                line: line.to_string(),
                message: format!("expected 4 to 6 fields, found {}", parts.len()),
            });
        }

        let mount_options: Vec<String> = parts[3].split(',').map(|s| s.to_string()).collect();
        let dump = match parts.get(4) {
            Some(field) => field.parse::<u8>().map_err(|e| Error::FstabParse {
                line: line.to_string(),
                message: format!("dump field: {}", e),
            })?,
            None => 0,
        };
        let fsck_order = match parts.get(5) {
            Some(field) => field.parse::<u16>().map_err(|e| Error::FstabParse {
                line: line.to_string(),
                message: format!("pass field: {}", e),
            })?,
            None => 0,
        };

        Ok(Some(Self {
            fs_spec: parts[0].to_string(),
            mount_point: PathBuf::from(unescape_fstab_path(parts[1])),
            vfs_type: parts[2].to_string(),
            mount_options,
            dump,
            fsck_order,
        }))
    }

    /// Returns the volume UUID if the entry is keyed by `UUID=`.
    pub fn volume_id(&self) -> Option<&str> {
        let value = self.fs_spec.strip_prefix("UUID=")?;
        Some(
            value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value),
        )
    }
}

/// Desired state of one mount slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountDeclaration {
    /// Filesystem UUID of the volume.
    pub volume_id: String,
    /// Absolute mount point.
    pub target_path: PathBuf,
    pub kind: FilesystemKind,
    pub options: Vec<String>,
    pub dump: u8,
    pub pass: u16,
}

impl MountDeclaration {
    pub fn new(
        volume_id: impl Into<String>,
        target_path: impl Into<PathBuf>,
        kind: FilesystemKind,
        options: Vec<String>,
    ) -> Self {
        Self {
            volume_id: volume_id.into(),
            target_path: target_path.into(),
            kind,
            options,
            dump: 0,
            pass: 0,
        }
    }

    /// Returns the fstab device identifier.
    pub fn fs_spec(&self) -> String {
        format!("UUID={}", self.volume_id)
    }

    pub fn to_entry(&self) -> FstabEntry {
        FstabEntry {
            fs_spec: self.fs_spec(),
            mount_point: self.target_path.clone(),
            vfs_type: self.kind.table_name().to_string(),
            mount_options: self.options.clone(),
            dump: self.dump,
            fsck_order: self.pass,
        }
    }

    /// Formats the declaration as a complete fstab line.
    pub fn to_fstab_line(&self) -> String {
        self.to_entry().to_fstab_line()
    }
}

/// Conflict shapes that require a caller decision before replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableConflict {
    /// The volume is already declared at a different mount point.
    VolumeMovedPath { existing_path: PathBuf },
    /// The mount point is already bound to a different volume.
    PathOccupiedByOtherVolume { existing_spec: String },
}

/// Minimal edit to bring the table to the desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TablePlan {
    /// The table already holds the desired record.
    NoOp { line_index: usize },
    /// The desired record exists but carries options invalid for its kind.
    StripInvalidOptions {
        line_index: usize,
        original: String,
        replacement: String,
        removed: Vec<String>,
    },
    /// An existing record conflicts and must be rewritten.
    ReplaceLine {
        line_index: usize,
        conflict: TableConflict,
        original: String,
        replacement: String,
    },
    /// No record references the volume or the mount point.
    AppendLine { line: String },
}

impl TablePlan {
    /// Returns true if the plan changes the table.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, TablePlan::NoOp { .. })
    }

    /// Returns true if the plan overwrites a record the caller did not ask to edit.
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, TablePlan::ReplaceLine { .. })
    }

    /// Applies the plan to the snapshot it was computed from.
    ///
    /// Returns None if the line the plan rewrites no longer holds the
    /// record it was computed against.
    pub fn apply(&self, table: &str) -> Option<String> {
        match self {
            TablePlan::NoOp { .. } => Some(table.to_string()),
            TablePlan::StripInvalidOptions {
                line_index,
                original,
                replacement,
                ..
            }
            | TablePlan::ReplaceLine {
                line_index,
                original,
                replacement,
                ..
            } => replace_line(table, *line_index, original, replacement),
            TablePlan::AppendLine { line } => {
                let mut output = String::with_capacity(table.len() + line.len() + 2);
                output.push_str(table);
                if !table.is_empty() && !table.ends_with('\n') {
                    output.push('\n');
                }
                output.push_str(line);
                output.push('\n');
                Some(output)
            }
        }
    }
}

/// Computes the plan that reconciles `table` with `desired`.
///
/// Matching priority (first hit wins across the whole table):
/// 1. same volume and same mount point
/// 2. same volume, different mount point
/// 3. same mount point, different volume
pub fn reconcile(desired: &MountDeclaration, table: &str) -> TablePlan {
    let records = parse_records(table);

    let same_volume = |entry: &FstabEntry| entry.volume_id() == Some(desired.volume_id.as_str());
    let same_path = |entry: &FstabEntry| same_mount_point(&entry.mount_point, &desired.target_path);

    if let Some((index, original, entry)) = records
        .iter()
        .find(|(_, _, entry)| same_volume(entry) && same_path(entry))
    {
        let removed = preset::invalid_options(&desired.kind, &entry.mount_options);
        if removed.is_empty() {
            debug!(line = index, "fstab already holds the desired record");
            return TablePlan::NoOp { line_index: *index };
        }

        let kept: Vec<&str> = entry
            .mount_options
            .iter()
            .map(String::as_str)
            .filter(|o| !removed.contains(o))
            .collect();
        let options = if kept.is_empty() {
            FALLBACK_OPTIONS.to_string()
        } else {
            kept.join(",")
        };

        return TablePlan::StripInvalidOptions {
            line_index: *index,
            original: original.to_string(),
            replacement: replace_options_field(original, &options),
            removed: removed.into_iter().map(str::to_string).collect(),
        };
    }

    if let Some((index, original, entry)) = records.iter().find(|(_, _, entry)| same_volume(entry)) {
        return TablePlan::ReplaceLine {
            line_index: *index,
            conflict: TableConflict::VolumeMovedPath {
                existing_path: entry.mount_point.clone(),
            },
            original: original.to_string(),
            replacement: desired.to_fstab_line(),
        };
    }

    if let Some((index, original, entry)) = records.iter().find(|(_, _, entry)| same_path(entry)) {
        return TablePlan::ReplaceLine {
            line_index: *index,
            conflict: TableConflict::PathOccupiedByOtherVolume {
                existing_spec: entry.fs_spec.clone(),
            },
            original: original.to_string(),
            replacement: desired.to_fstab_line(),
        };
    }

    TablePlan::AppendLine {
        line: desired.to_fstab_line(),
    }
}

/// Parses every record of the table, keeping its line index and raw text.
///
/// Unparseable lines are skipped; they are never matched or rewritten.
fn parse_records(table: &str) -> Vec<(usize, &str, FstabEntry)> {
    table
        .lines()
        .enumerate()
        .filter_map(|(index, line)| match FstabEntry::from_line(line) {
            Ok(Some(entry)) => Some((index, line, entry)),
            Ok(None) => None,
            Err(e) => {
                warn!(line = index, error = %e, "skipping unparseable fstab line");
                None
            }
        })
        .collect()
}

/// Mount points compare by path components, so a trailing slash is ignored
/// but `/mnt/data` never matches `/mnt/data2`.
fn same_mount_point(a: &Path, b: &Path) -> bool {
    a == b
}

/// Replaces line `index` of `table`, keeping the original line terminator.
///
/// Returns None unless that line still reads `expected`.
fn replace_line(table: &str, index: usize, expected: &str, replacement: &str) -> Option<String> {
    let mut output = String::with_capacity(table.len() + replacement.len());
    let mut replaced = false;
    for (i, line) in table.split_inclusive('\n').enumerate() {
        if i == index {
            let body = line.trim_end_matches(['\n', '\r']);
            if body != expected {
                return None;
            }
            output.push_str(replacement);
            output.push_str(&line[body.len()..]);
            replaced = true;
        } else {
            output.push_str(line);
        }
    }
    replaced.then_some(output)
}

/// Rewrites only the fourth whitespace-separated field of `line`.
fn replace_options_field(line: &str, options: &str) -> String {
    match field_spans(line).get(3) {
        Some(&(start, end)) => format!("{}{}{}", &line[..start], options, &line[end..]),
        None => line.to_string(),
    }
}

/// Byte ranges of the whitespace-separated fields in `line`.
fn field_spans(line: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in line.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push((s, i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, line.len()));
    }
    spans
}

/// Escapes special characters in fstab paths using octal sequences.
///
/// Handles space (\040), tab (\011), newline (\012), and backslash (\134).
fn escape_fstab_path(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            ' ' => encoded.push_str(r"\040"),
            '\t' => encoded.push_str(r"\011"),
            '\n' => encoded.push_str(r"\012"),
            '\\' => encoded.push_str(r"\134"),
            _ => encoded.push(c),
        }
    }
    encoded
}

/// Unescapes octal sequences in fstab paths.
///
/// Escaped bytes are reassembled before UTF-8 decoding, so multi-byte
/// characters written as `\303\251` come back intact.
fn unescape_fstab_path(input: &str) -> String {
    let mut bytes = Vec::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('\\') {
        bytes.extend_from_slice(rest[..pos].as_bytes());
        let tail = &rest[pos + 1..];
        let digits = tail.get(..3).filter(|d| d.bytes().all(|b| (b'0'..=b'7').contains(&b)));
        match digits.and_then(|d| u8::from_str_radix(d, 8).ok()) {
            Some(byte) => {
                bytes.push(byte);
                rest = &tail[3..];
            }
            None => {
                bytes.push(b'\\');
                rest = tail;
            }
        }
    }
    bytes.extend_from_slice(rest.as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}
