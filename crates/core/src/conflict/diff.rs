//! Line differencer.
//!
//! Produces an edit script between two line sequences. Matching follows
//! longest-common-subsequence semantics, built greedily from the longest
//! contiguous run of equal lines: the longest run in the current window is
//! kept, then the windows to its left and right are matched recursively.
//! This keeps coincidentally-equal lines (blank lines, closing braces) from
//! being aligned across large shifted regions.

use std::collections::HashMap;
use std::ops::Range;

/// One step of an edit script.
///
/// Ranges index into the two input sequences. `Delete` carries the position
/// in `b` it happens at, and `Insert` the position in `a`, so both index
/// spaces can be replayed independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOp {
    Keep { a: Range<usize>, b: Range<usize> },
    Delete { a: Range<usize>, b_at: usize },
    Insert { a_at: usize, b: Range<usize> },
}

/// An ordered list of edit operations turning `a` into `b`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EditScript {
    pub ops: Vec<EditOp>,
}

impl EditScript {
    /// Replay the script over `a`'s index space.
    pub fn replay_a<'s>(&self, a: &'s [String]) -> Vec<&'s str> {
        let mut out = Vec::with_capacity(a.len());
        for op in &self.ops {
            match op {
                EditOp::Keep { a: r, .. } | EditOp::Delete { a: r, .. } => {
                    out.extend(a[r.clone()].iter().map(String::as_str))
                }
                EditOp::Insert { .. } => {}
            }
        }
        out
    }

    /// Replay the script over `b`'s index space.
    pub fn replay_b<'s>(&self, b: &'s [String]) -> Vec<&'s str> {
        let mut out = Vec::with_capacity(b.len());
        for op in &self.ops {
            match op {
                EditOp::Keep { b: r, .. } | EditOp::Insert { b: r, .. } => {
                    out.extend(b[r.clone()].iter().map(String::as_str))
                }
                EditOp::Delete { .. } => {}
            }
        }
        out
    }

    /// Whether the script contains anything but keeps.
    pub fn is_identity(&self) -> bool {
        self.ops.iter().all(|op| matches!(op, EditOp::Keep { .. }))
    }
}

/// Compute an edit script turning `a` into `b`.
pub fn diff(a: &[String], b: &[String]) -> EditScript {
    let mut matches = Vec::new();
    let index = index_lines(b);
    match_window(a, b, &index, 0..a.len(), 0..b.len(), &mut matches);
    EditScript {
        ops: script_from_matches(&matches, a.len(), b.len()),
    }
}

/// A run of equal lines: `a[a_start..a_start+len] == b[b_start..b_start+len]`.
#[derive(Debug, Clone, Copy)]
struct Block {
    a_start: usize,
    b_start: usize,
    len: usize,
}

fn index_lines(b: &[String]) -> HashMap<&str, Vec<usize>> {
    let mut index: HashMap<&str, Vec<usize>> = HashMap::new();
    for (j, line) in b.iter().enumerate() {
        index.entry(line.as_str()).or_default().push(j);
    }
    index
}

/// Collect matching blocks for a window, in ascending order.
fn match_window(
    a: &[String],
    b: &[String],
    index: &HashMap<&str, Vec<usize>>,
    mut ar: Range<usize>,
    mut br: Range<usize>,
    out: &mut Vec<Block>,
) {
    // Common prefix and suffix are always kept; trimming them first keeps
    // the common case (small edit in a large file) linear.
    let mut prefix = 0;
    while ar.start + prefix < ar.end
        && br.start + prefix < br.end
        && a[ar.start + prefix] == b[br.start + prefix]
    {
        prefix += 1;
    }
    let prefix_block = Block {
        a_start: ar.start,
        b_start: br.start,
        len: prefix,
    };
    ar.start += prefix;
    br.start += prefix;

    let mut suffix = 0;
    while ar.end - suffix > ar.start
        && br.end - suffix > br.start
        && a[ar.end - suffix - 1] == b[br.end - suffix - 1]
    {
        suffix += 1;
    }
    let suffix_block = Block {
        a_start: ar.end - suffix,
        b_start: br.end - suffix,
        len: suffix,
    };
    ar.end -= suffix;
    br.end -= suffix;

    if prefix_block.len > 0 {
        out.push(prefix_block);
    }
    if let Some(block) = longest_block(a, index, ar.clone(), br.clone()) {
        match_window(a, b, index, ar.start..block.a_start, br.start..block.b_start, out);
        out.push(block);
        match_window(
            a,
            b,
            index,
            block.a_start + block.len..ar.end,
            block.b_start + block.len..br.end,
            out,
        );
    }
    if suffix_block.len > 0 {
        out.push(suffix_block);
    }
}

/// Longest run of equal lines inside the window. Ties go to the earliest
/// position in `a`, then in `b`.
fn longest_block(
    a: &[String],
    index: &HashMap<&str, Vec<usize>>,
    ar: Range<usize>,
    br: Range<usize>,
) -> Option<Block> {
    if ar.is_empty() || br.is_empty() {
        return None;
    }
    let mut best = Block {
        a_start: ar.start,
        b_start: br.start,
        len: 0,
    };
    // run_len[j] = length of the run of equal lines ending at (i - 1, j).
    let mut run_len: HashMap<usize, usize> = HashMap::new();
    for i in ar.clone() {
        let mut next: HashMap<usize, usize> = HashMap::new();
        if let Some(positions) = index.get(a[i].as_str()) {
            for &j in positions {
                if j < br.start {
                    continue;
                }
                if j >= br.end {
                    break;
                }
                let len = j
                    .checked_sub(1)
                    .and_then(|p| run_len.get(&p))
                    .copied()
                    .unwrap_or(0)
                    + 1;
                next.insert(j, len);
                if len > best.len {
                    best = Block {
                        a_start: i + 1 - len,
                        b_start: j + 1 - len,
                        len,
                    };
                }
            }
        }
        run_len = next;
    }
    (best.len > 0).then_some(best)
}

fn script_from_matches(blocks: &[Block], a_len: usize, b_len: usize) -> Vec<EditOp> {
    let mut ops = Vec::new();
    let (mut i, mut j) = (0, 0);
    let tail = Block {
        a_start: a_len,
        b_start: b_len,
        len: 0,
    };
    for block in blocks.iter().chain(std::iter::once(&tail)) {
        if block.a_start > i {
            ops.push(EditOp::Delete {
                a: i..block.a_start,
                b_at: j,
            });
        }
        if block.b_start > j {
            ops.push(EditOp::Insert {
                a_at: block.a_start,
                b: j..block.b_start,
            });
        }
        if block.len > 0 {
            let a = block.a_start..block.a_start + block.len;
            let b = block.b_start..block.b_start + block.len;
            // Adjacent keeps (prefix followed by a recursive match) are merged.
            match ops.last_mut() {
                Some(EditOp::Keep { a: pa, b: pb }) if pa.end == a.start && pb.end == b.start => {
                    pa.end = a.end;
                    pb.end = b.end;
                }
                _ => ops.push(EditOp::Keep { a, b }),
            }
        }
        i = block.a_start + block.len;
        j = block.b_start + block.len;
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn kept(script: &EditScript) -> usize {
        script
            .ops
            .iter()
            .map(|op| match op {
                EditOp::Keep { a, .. } => a.len(),
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn test_identical_is_all_keep() {
        let a = lines(&["a", "b", "c"]);
        let script = diff(&a, &a);
        assert_eq!(script.ops, vec![EditOp::Keep { a: 0..3, b: 0..3 }]);
        assert!(script.is_identity());
    }

    #[test]
    fn test_empty_inputs() {
        let a = lines(&["a", "b"]);
        let empty: Vec<String> = Vec::new();

        assert_eq!(
            diff(&empty, &a).ops,
            vec![EditOp::Insert { a_at: 0, b: 0..2 }]
        );
        assert_eq!(
            diff(&a, &empty).ops,
            vec![EditOp::Delete { a: 0..2, b_at: 0 }]
        );
        assert!(diff(&empty, &empty).ops.is_empty());
    }

    #[test]
    fn test_single_replacement() {
        let a = lines(&["a", "b", "c"]);
        let b = lines(&["a", "X", "c"]);
        assert_eq!(
            diff(&a, &b).ops,
            vec![
                EditOp::Keep { a: 0..1, b: 0..1 },
                EditOp::Delete { a: 1..2, b_at: 1 },
                EditOp::Insert { a_at: 2, b: 1..2 },
                EditOp::Keep { a: 2..3, b: 2..3 },
            ]
        );
    }

    #[test]
    fn test_prefers_long_runs_over_coincidental_lines() {
        // The "}" lines match coincidentally; the long run must win.
        let a = lines(&["}", "fn a() {", "x", "y", "z", "}"]);
        let b = lines(&["fn b() {", "}", "fn a() {", "x", "y", "z", "}"]);
        let script = diff(&a, &b);
        assert_eq!(kept(&script), 6);
        assert_eq!(script.replay_a(&a), a);
        assert_eq!(script.replay_b(&b), b);
    }

    #[test]
    fn test_moved_block_keeps_largest_run() {
        let a = lines(&["1", "2", "3", "4", "5", "a", "b"]);
        let b = lines(&["a", "b", "1", "2", "3", "4", "5"]);
        let script = diff(&a, &b);
        assert_eq!(kept(&script), 5);
    }

    #[test]
    fn test_trailing_empty_line_is_a_line() {
        let a = lines(&["a", ""]);
        let b = lines(&["a"]);
        assert_eq!(
            diff(&a, &b).ops,
            vec![
                EditOp::Keep { a: 0..1, b: 0..1 },
                EditOp::Delete { a: 1..2, b_at: 1 },
            ]
        );
    }

    #[test]
    fn test_diff_is_deterministic() {
        let a = lines(&["x", "a", "x", "b", "x"]);
        let b = lines(&["a", "x", "x", "b"]);
        assert_eq!(diff(&a, &b), diff(&a, &b));
    }

    fn small_lines() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "", "}"]), 0..24)
            .prop_map(|v| v.into_iter().map(String::from).collect())
    }

    proptest! {
        #[test]
        fn prop_replay_reconstructs_both_sides(a in small_lines(), b in small_lines()) {
            let script = diff(&a, &b);
            prop_assert_eq!(script.replay_a(&a), a.iter().map(String::as_str).collect::<Vec<_>>());
            prop_assert_eq!(script.replay_b(&b), b.iter().map(String::as_str).collect::<Vec<_>>());
        }

        #[test]
        fn prop_ranges_are_contiguous(a in small_lines(), b in small_lines()) {
            let script = diff(&a, &b);
            let (mut i, mut j) = (0, 0);
            for op in &script.ops {
                match op {
                    EditOp::Keep { a: ra, b: rb } => {
                        prop_assert_eq!(ra.start, i);
                        prop_assert_eq!(rb.start, j);
                        prop_assert_eq!(ra.len(), rb.len());
                        prop_assert_eq!(&a[ra.clone()], &b[rb.clone()]);
                        i = ra.end;
                        j = rb.end;
                    }
                    EditOp::Delete { a: ra, b_at } => {
                        prop_assert_eq!(ra.start, i);
                        prop_assert_eq!(*b_at, j);
                        i = ra.end;
                    }
                    EditOp::Insert { a_at, b: rb } => {
                        prop_assert_eq!(*a_at, i);
                        prop_assert_eq!(rb.start, j);
                        j = rb.end;
                    }
                }
            }
            prop_assert_eq!(i, a.len());
            prop_assert_eq!(j, b.len());
        }
    }
}
