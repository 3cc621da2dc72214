//! ParsedDiff data model.

/// One line within a hunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Added(String),
    Removed(String),
}

/// One `@@ -s,c +s,c @@` hunk and its body lines.
#[derive(Debug, Clone)]
pub struct Hunk {
    pub old_start: u64,
    pub old_count: u64,
    pub new_start: u64,
    pub new_count: u64,
    pub lines: Vec<HunkLine>,
    /// Whether the diff's final line for this hunk carried a
    /// "\ No newline at end of file" marker.
    pub no_newline_at_eof: bool,
}

/// One file entry within a parsed unified diff.
#[derive(Debug, Clone)]
pub struct FileDiff {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
    pub additions: usize,
    pub deletions: usize,
    pub is_create: bool,
    pub is_delete: bool,
    pub is_rename: bool,
    pub has_mode_change: bool,
}

impl FileDiff {
    /// The path this entry should be keyed by for allowlist/scope checks:
    /// the new path for creates/updates/renames, the old path for pure
    /// deletes.
    pub fn effective_path(&self) -> Option<&str> {
        if self.is_delete {
            self.old_path.as_deref()
        } else {
            self.new_path.as_deref().or(self.old_path.as_deref())
        }
    }
}

/// Ordered list of per-file entries.
#[derive(Debug, Clone, Default)]
pub struct ParsedDiff {
    pub files: Vec<FileDiff>,
}

impl ParsedDiff {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
