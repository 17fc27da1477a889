//! Three-way merge engine.
//!
//! Diffs the ancestor against each side independently and walks both edit
//! scripts over ancestor line positions, emitting an ordered list of clean
//! and conflicting hunks.

use std::ops::Range;

use tracing::debug;

use crate::conflict::diff::{diff, EditOp};
use crate::models::Hunk;

/// The result of a three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// Hunks in ancestor-line order.
    pub hunks: Vec<Hunk>,
    /// Whether at least one hunk is a conflict.
    pub has_conflicts: bool,
}

impl MergeResult {
    fn from_hunks(hunks: Vec<Hunk>) -> Self {
        let has_conflicts = hunks.iter().any(Hunk::is_conflict);
        Self {
            hunks,
            has_conflicts,
        }
    }

    /// The merged lines when no hunk conflicts.
    pub fn clean_lines(&self) -> Option<Vec<String>> {
        let mut out = Vec::new();
        for hunk in &self.hunks {
            match hunk {
                Hunk::Clean { resolved_lines } => out.extend(resolved_lines.iter().cloned()),
                Hunk::Conflict { .. } => return None,
            }
        }
        Some(out)
    }
}

/// One side's replacement of an ancestor range.
#[derive(Debug, Clone)]
struct Change {
    ancestor: Range<usize>,
    lines: Vec<String>,
}

/// Stateless three-way merge engine.
pub struct Merger;

impl Merger {
    /// Merge `base` and `head`, both descended from `ancestor`.
    ///
    /// Regions changed by one side only are taken from that side. Regions
    /// changed by both sides over overlapping (or touching) ancestor ranges
    /// become conflicts, unless both sides produced identical text there.
    pub fn merge(ancestor: &[String], base: &[String], head: &[String]) -> MergeResult {
        // Fast path: if either side is identical to the ancestor, the other
        // side wins cleanly.
        if base == ancestor {
            debug!("base == ancestor, head wins cleanly");
            return MergeResult::from_hunks(whole(head));
        }
        if head == ancestor || base == head {
            debug!("head == ancestor or both sides identical, base wins cleanly");
            return MergeResult::from_hunks(whole(base));
        }

        let base_changes = changes(ancestor, base);
        let head_changes = changes(ancestor, head);

        let mut hunks = Vec::new();
        let mut pos = 0;
        let (mut bi, mut hi) = (0, 0);

        while bi < base_changes.len() || hi < head_changes.len() {
            // Start a group at the change with the lowest ancestor position.
            let start = match (base_changes.get(bi), head_changes.get(hi)) {
                (Some(b), Some(h)) => b.ancestor.start.min(h.ancestor.start),
                (Some(b), None) => b.ancestor.start,
                (None, Some(h)) => h.ancestor.start,
                (None, None) => break,
            };
            let (b_first, h_first) = (bi, hi);
            let mut end = start;

            // Absorb every change that overlaps or touches the group.
            loop {
                let mut grew = false;
                while let Some(c) = base_changes.get(bi) {
                    if c.ancestor.start > end {
                        break;
                    }
                    end = end.max(c.ancestor.end);
                    bi += 1;
                    grew = true;
                }
                while let Some(c) = head_changes.get(hi) {
                    if c.ancestor.start > end {
                        break;
                    }
                    end = end.max(c.ancestor.end);
                    hi += 1;
                    grew = true;
                }
                if !grew {
                    break;
                }
            }

            if pos < start {
                hunks.push(Hunk::clean(ancestor[pos..start].to_vec()));
            }

            let base_group = &base_changes[b_first..bi];
            let head_group = &head_changes[h_first..hi];
            let hunk = match (base_group.is_empty(), head_group.is_empty()) {
                (false, true) => Hunk::clean(apply(ancestor, start..end, base_group)),
                (true, false) => Hunk::clean(apply(ancestor, start..end, head_group)),
                _ => {
                    let base_lines = apply(ancestor, start..end, base_group);
                    let head_lines = apply(ancestor, start..end, head_group);
                    if base_lines == head_lines {
                        debug!(start, end, "convergent edit, treated as clean");
                        Hunk::clean(base_lines)
                    } else {
                        Hunk::Conflict {
                            base_lines,
                            head_lines,
                        }
                    }
                }
            };
            hunks.push(hunk);
            pos = end;
        }

        if pos < ancestor.len() {
            hunks.push(Hunk::clean(ancestor[pos..].to_vec()));
        }

        let hunks = coalesce(hunks);
        let result = MergeResult::from_hunks(hunks);
        debug!(
            hunks = result.hunks.len(),
            has_conflicts = result.has_conflicts,
            "three-way merge complete"
        );
        result
    }

    /// Quick check: can these three versions be merged without conflicts?
    pub fn can_auto_merge(ancestor: &[String], base: &[String], head: &[String]) -> bool {
        if base == ancestor || head == ancestor || base == head {
            return true;
        }
        !Self::merge(ancestor, base, head).has_conflicts
    }
}

fn whole(lines: &[String]) -> Vec<Hunk> {
    if lines.is_empty() {
        Vec::new()
    } else {
        vec![Hunk::clean(lines.to_vec())]
    }
}

/// Collapse an edit script into replacements of ancestor ranges.
///
/// A delete directly followed by an insert at the same ancestor position is a
/// single replacement.
fn changes(ancestor: &[String], side: &[String]) -> Vec<Change> {
    let script = diff(ancestor, side);
    let mut out: Vec<Change> = Vec::new();
    for op in script.ops {
        match op {
            EditOp::Keep { .. } => {}
            EditOp::Delete { a, .. } => out.push(Change {
                ancestor: a,
                lines: Vec::new(),
            }),
            EditOp::Insert { a_at, b } => {
                let lines = side[b].to_vec();
                match out.last_mut() {
                    Some(prev) if prev.ancestor.end == a_at && prev.lines.is_empty() => {
                        prev.lines = lines;
                    }
                    _ => out.push(Change {
                        ancestor: a_at..a_at,
                        lines,
                    }),
                }
            }
        }
    }
    out
}

/// Rebuild one side's text over `range` of the ancestor.
fn apply(ancestor: &[String], range: Range<usize>, group: &[Change]) -> Vec<String> {
    let mut out = Vec::new();
    let mut pos = range.start;
    for change in group {
        out.extend_from_slice(&ancestor[pos..change.ancestor.start]);
        out.extend(change.lines.iter().cloned());
        pos = change.ancestor.end;
    }
    out.extend_from_slice(&ancestor[pos..range.end]);
    out
}

/// Merge adjacent clean hunks and drop empty ones. Conflicts are never
/// merged with each other.
fn coalesce(hunks: Vec<Hunk>) -> Vec<Hunk> {
    let mut out: Vec<Hunk> = Vec::with_capacity(hunks.len());
    for hunk in hunks {
        match hunk {
            Hunk::Clean { resolved_lines } if resolved_lines.is_empty() => {}
            Hunk::Clean { resolved_lines } => match out.last_mut() {
                Some(Hunk::Clean {
                    resolved_lines: prev,
                }) => prev.extend(resolved_lines),
                _ => out.push(Hunk::Clean { resolved_lines }),
            },
            conflict => out.push(conflict),
        }
    }
    out
}
