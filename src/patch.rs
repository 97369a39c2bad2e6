//! Line-oriented patching of shell-style configuration files.
//!
//! `/etc/default/grub` and `/etc/mkinitcpio.conf` are sequences of
//! `KEY=value` lines mixed with comments. Every mutation here is a pure
//! function of the current contents, touches only the lines it targets and
//! is idempotent: applying the same patch twice leaves the file
//! byte-identical to applying it once.
//!
//! Writes go through `write_atomic` (temp file in the same directory, fsync,
//! rename), so a crash mid-write leaves either the old or the new file.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{ProvisionError, Result};

// ============================================================================
// Line model
// ============================================================================

/// A file split on `\n`, remembering whether the last line was terminated.
///
/// Lines are kept byte-for-byte (no `\r` stripping), so untouched lines are
/// written back exactly as read.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Lines {
    lines: Vec<String>,
    trailing_newline: bool,
}

impl Lines {
    fn parse(contents: &str) -> Self {
        if contents.is_empty() {
            return Self {
                lines: Vec::new(),
                trailing_newline: false,
            };
        }
        let trailing_newline = contents.ends_with('\n');
        let body = contents.strip_suffix('\n').unwrap_or(contents);
        Self {
            lines: body.split('\n').map(str::to_string).collect(),
            trailing_newline,
        }
    }

    fn push(&mut self, line: String) {
        self.lines.push(line);
        // An appended line always ends the file properly
        self.trailing_newline = true;
    }

    fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }
}

fn assignment_prefix(key: &str) -> String {
    format!("{}=", key)
}

/// Reject values that would not survive a round trip through one
/// `KEY="value"` line.
fn check_value(key: &str, value: &str) -> Result<()> {
    if value.contains(['\n', '\r', '"']) {
        return Err(ProvisionError::validation(format!(
            "Value for {} must not contain newlines or double quotes: {:?}",
            key, value
        )));
    }
    Ok(())
}

/// A shell assignment's value split into its parts, so trailing text such
/// as `# comment` is written back untouched.
#[derive(Debug, PartialEq, Eq)]
struct Assignment<'a> {
    quote: Option<char>,
    inner: &'a str,
    suffix: &'a str,
}

/// Split the text after `KEY=`: a quoted value runs to its closing quote,
/// an unquoted one to the first whitespace.
fn split_value(raw: &str) -> Assignment<'_> {
    for quote in ['"', '\''] {
        if let Some(rest) = raw.strip_prefix(quote) {
            if let Some(close) = rest.find(quote) {
                return Assignment {
                    quote: Some(quote),
                    inner: &rest[..close],
                    suffix: &rest[close + 1..],
                };
            }
        }
    }
    let end = raw.find(char::is_whitespace).unwrap_or(raw.len());
    Assignment {
        quote: None,
        inner: &raw[..end],
        suffix: &raw[end..],
    }
}

// ============================================================================
// Pure transformations
// ============================================================================

/// Replace every `key=...` line with `key="value"`, or append one.
pub fn set_or_append_key(contents: &str, key: &str, value: &str) -> Result<String> {
    check_value(key, value)?;
    let prefix = assignment_prefix(key);
    let wanted = format!("{}\"{}\"", prefix, value);
    let mut doc = Lines::parse(contents);

    let mut matched = false;
    for line in doc.lines.iter_mut().filter(|l| l.starts_with(&prefix)) {
        *line = wanted.clone();
        matched = true;
    }
    if !matched {
        doc.push(wanted);
    }
    Ok(doc.render())
}

/// Put `token` at the front of the value on every `key=` line that does not
/// already contain it. Appends `key="token"` when the key is absent.
///
/// The presence check is a plain substring test, so `quiet` is considered
/// present in `"quiet splash"` and also in `"notquiet"`.
pub fn insert_token_into_value(contents: &str, key: &str, token: &str) -> Result<String> {
    check_value(key, token)?;
    let prefix = assignment_prefix(key);
    let mut doc = Lines::parse(contents);

    let mut matched = false;
    for line in doc.lines.iter_mut().filter(|l| l.starts_with(&prefix)) {
        matched = true;
        let value = split_value(&line[prefix.len()..]);
        if value.inner.contains(token) {
            continue;
        }
        let updated = if value.inner.trim().is_empty() {
            token.to_string()
        } else {
            format!("{} {}", token, value.inner)
        };
        let quote = value.quote.unwrap_or('"');
        let rebuilt = format!("{}{}{}{}{}", prefix, quote, updated, quote, value.suffix);
        *line = rebuilt;
    }
    if !matched {
        doc.push(format!("{}\"{}\"", prefix, token));
    }
    Ok(doc.render())
}

/// Add missing `items` to a parenthesised `key=(a b c)` list.
///
/// New items go before `before` when that anchor is in the list, otherwise
/// at the end, keeping the order given. Items are compared as whole words.
/// Anything after the closing parenthesis (a trailing comment) is kept.
/// Appends `key=(items)` when the key is absent.
///
/// Only single-line lists are edited; a list that continues onto the next
/// line is a `Validation` error rather than a silent no-op.
pub fn add_list_items(
    contents: &str,
    key: &str,
    items: &[&str],
    before: Option<&str>,
) -> Result<String> {
    if let Some(bad) = items
        .iter()
        .find(|item| item.is_empty() || item.contains(|c: char| c.is_whitespace() || "()#\"".contains(c)))
    {
        return Err(ProvisionError::validation(format!(
            "Invalid list item {:?} for {}",
            bad, key
        )));
    }
    let prefix = format!("{}(", assignment_prefix(key));
    let mut doc = Lines::parse(contents);

    let mut matched = false;
    for line in doc.lines.iter_mut().filter(|l| l.starts_with(&prefix)) {
        matched = true;
        let body = &line[prefix.len()..];
        // A `)` after `#` belongs to a comment, not to the list
        let code_end = body.find('#').unwrap_or(body.len());
        let Some(close) = body[..code_end].find(')') else {
            return Err(ProvisionError::validation(format!(
                "{} spans several lines; add {} to it by hand",
                key,
                items.join(" ")
            )));
        };
        let inner = &body[..close];
        let suffix = &body[close + 1..];
        let mut current: Vec<&str> = inner.split_whitespace().collect();
        let missing: Vec<&str> = items
            .iter()
            .copied()
            .filter(|item| !current.contains(item))
            .collect();
        if missing.is_empty() {
            continue;
        }

        let at = before
            .and_then(|anchor| current.iter().position(|c| *c == anchor))
            .unwrap_or(current.len());
        for (offset, item) in missing.into_iter().enumerate() {
            current.insert(at + offset, item);
        }
        let rebuilt = format!("{}{}){}", prefix, current.join(" "), suffix);
        *line = rebuilt;
    }
    if !matched {
        doc.push(format!("{}{})", prefix, items.join(" ")));
    }
    Ok(doc.render())
}

/// Index-aligned line diff (`-old` / `+new`).
///
/// Every transformation in this module edits lines in place or appends,
/// so comparing by position is exact.
pub fn line_diff(before: &str, after: &str) -> Vec<String> {
    let old = Lines::parse(before).lines;
    let new = Lines::parse(after).lines;
    let mut diff = Vec::new();
    for i in 0..old.len().max(new.len()) {
        match (old.get(i), new.get(i)) {
            (Some(a), Some(b)) if a == b => {}
            (Some(a), Some(b)) => {
                diff.push(format!("-{}", a));
                diff.push(format!("+{}", b));
            }
            (Some(a), None) => diff.push(format!("-{}", a)),
            (None, Some(b)) => diff.push(format!("+{}", b)),
            (None, None) => {}
        }
    }
    diff
}

// ============================================================================
// Atomic write
// ============================================================================

/// Replace `path` with `contents` atomically.
///
/// The temp file is created next to `path` so the final rename never
/// crosses a filesystem. Permissions come from `mode` when given, else from
/// the existing file, else 0644.
pub fn write_atomic(path: &Path, contents: &str, mode: Option<u32>) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let permissions = match mode {
        Some(m) => fs::Permissions::from_mode(m),
        None => fs::metadata(path)
            .map(|m| m.permissions())
            .unwrap_or_else(|_| fs::Permissions::from_mode(0o644)),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ProvisionError::from_io(path, e))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| ProvisionError::from_io(path, e))?;
    tmp.as_file()
        .set_permissions(permissions)
        .map_err(|e| ProvisionError::from_io(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| ProvisionError::from_io(path, e))?;
    tmp.persist(path)
        .map_err(|e| ProvisionError::from_io(path, e.error))?;

    debug!("Wrote {} ({} bytes)", path.display(), contents.len());
    Ok(())
}

// ============================================================================
// ConfigFilePatcher
// ============================================================================

/// What a patch did to a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Desired state already present; the file was not rewritten
    Unchanged,
    /// The file was rewritten (or would have been, in dry-run mode)
    Changed { diff: Vec<String> },
}

impl PatchOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Applies the pure transformations above to files on disk.
///
/// In dry-run mode the diff is computed and logged but nothing is written,
/// and a missing file is treated as empty (the target is usually not
/// installed yet).
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigFilePatcher {
    dry_run: bool,
}

impl ConfigFilePatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }

    /// Follow the runner's mode: a dry-run runner gets a dry-run patcher
    pub fn with_dry_run(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub fn set_or_append_key(&self, path: &Path, key: &str, value: &str) -> Result<PatchOutcome> {
        self.apply(path, |c| set_or_append_key(c, key, value))
    }

    pub fn insert_token_into_value(
        &self,
        path: &Path,
        key: &str,
        token: &str,
    ) -> Result<PatchOutcome> {
        self.apply(path, |c| insert_token_into_value(c, key, token))
    }

    pub fn add_list_items(
        &self,
        path: &Path,
        key: &str,
        items: &[&str],
        before: Option<&str>,
    ) -> Result<PatchOutcome> {
        self.apply(path, |c| add_list_items(c, key, items, before))
    }

    fn apply(
        &self,
        path: &Path,
        transform: impl FnOnce(&str) -> Result<String>,
    ) -> Result<PatchOutcome> {
        let current = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if self.dry_run && e.kind() == std::io::ErrorKind::NotFound => {
                warn!("[dry-run] {} does not exist yet, patching empty content", path.display());
                String::new()
            }
            Err(e) => return Err(ProvisionError::from_io(path, e)),
        };

        let updated = transform(&current)?;
        if updated == current {
            debug!("{} already up to date", path.display());
            return Ok(PatchOutcome::Unchanged);
        }

        let diff = line_diff(&current, &updated);
        let prefix = if self.dry_run { "[dry-run] " } else { "" };
        info!("{}Patching {}", prefix, path.display());
        for line in &diff {
            info!("  {}", line);
        }

        if !self.dry_run {
            write_atomic(path, &updated, None)?;
        }
        Ok(PatchOutcome::Changed { diff })
    }
}
