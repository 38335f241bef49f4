//! Line-based unified diff.
//!
//! Produces the same layout as a classic `diff -u` with three lines of
//! context: `---`/`+++` headers followed by `@@ -a,b +c,d @@` hunks. Lines are
//! joined with `\n` and carry no trailing newline.

/// Lines of context around each change.
const CONTEXT: usize = 3;

/// Above this many cells the LCS table is skipped and the changed middle is
/// emitted as one replacement block.
const MAX_LCS_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Equal,
    Delete,
    Insert,
}

/// One line of the edit script, with its position in both texts.
#[derive(Debug, Clone, Copy)]
struct Op<'a> {
    tag: Tag,
    line: &'a str,
    old: usize,
    new: usize,
}

/// Renders the unified diff from `original` to `changed`.
///
/// Identical inputs produce an empty string.
pub fn unified_diff(original: &str, changed: &str, from_file: &str, to_file: &str) -> String {
    let a: Vec<&str> = original.lines().collect();
    let b: Vec<&str> = changed.lines().collect();

    let ops = edit_script(&a, &b);
    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| op.tag != Tag::Equal)
        .map(|(i, _)| i)
        .collect();
    if changes.is_empty() {
        return String::new();
    }

    let mut out = vec![format!("--- {from_file}"), format!("+++ {to_file}")];

    let mut group_start = changes[0];
    let mut group_end = changes[0];
    for &index in &changes[1..] {
        if index - group_end > 2 * CONTEXT {
            render_hunk(&ops, group_start, group_end, &mut out);
            group_start = index;
        }
        group_end = index;
    }
    render_hunk(&ops, group_start, group_end, &mut out);

    out.join("\n")
}

fn render_hunk(ops: &[Op<'_>], first_change: usize, last_change: usize, out: &mut Vec<String>) {
    let start = first_change.saturating_sub(CONTEXT);
    let end = (last_change + CONTEXT + 1).min(ops.len());
    let hunk = &ops[start..end];

    let old_len = hunk.iter().filter(|op| op.tag != Tag::Insert).count();
    let new_len = hunk.iter().filter(|op| op.tag != Tag::Delete).count();
    out.push(format!(
        "@@ -{} +{} @@",
        format_range(hunk[0].old, old_len),
        format_range(hunk[0].new, new_len)
    ));

    for op in hunk {
        let prefix = match op.tag {
            Tag::Equal => ' ',
            Tag::Delete => '-',
            Tag::Insert => '+',
        };
        out.push(format!("{prefix}{}", op.line));
    }
}

/// `start` is zero-based; empty ranges point at the line before.
fn format_range(start: usize, len: usize) -> String {
    match len {
        0 => format!("{start},0"),
        1 => format!("{}", start + 1),
        _ => format!("{},{len}", start + 1),
    }
}

fn edit_script<'a>(a: &[&'a str], b: &[&'a str]) -> Vec<Op<'a>> {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mid_a = &a[prefix..a.len() - suffix];
    let mid_b = &b[prefix..b.len() - suffix];

    let mut ops = Vec::with_capacity(a.len() + b.len());
    let (mut old, mut new) = (0, 0);
    let mut push = |tag: Tag, line: &'a str, ops: &mut Vec<Op<'a>>| {
        ops.push(Op { tag, line, old, new });
        match tag {
            Tag::Equal => {
                old += 1;
                new += 1;
            }
            Tag::Delete => old += 1,
            Tag::Insert => new += 1,
        }
    };

    for &line in &a[..prefix] {
        push(Tag::Equal, line, &mut ops);
    }

    if mid_a.len().saturating_mul(mid_b.len()) > MAX_LCS_CELLS {
        for &line in mid_a {
            push(Tag::Delete, line, &mut ops);
        }
        for &line in mid_b {
            push(Tag::Insert, line, &mut ops);
        }
    } else {
        let (n, m) = (mid_a.len(), mid_b.len());
        // lcs[i][j] = LCS length of mid_a[i..] and mid_b[j..]
        let mut lcs = vec![vec![0u32; m + 1]; n + 1];
        for i in (0..n).rev() {
            for j in (0..m).rev() {
                lcs[i][j] = if mid_a[i] == mid_b[j] {
                    lcs[i + 1][j + 1] + 1
                } else {
                    lcs[i + 1][j].max(lcs[i][j + 1])
                };
            }
        }

        let (mut i, mut j) = (0, 0);
        while i < n || j < m {
            if i < n && j < m && mid_a[i] == mid_b[j] {
                push(Tag::Equal, mid_a[i], &mut ops);
                i += 1;
                j += 1;
            } else if j == m || (i < n && lcs[i + 1][j] >= lcs[i][j + 1]) {
                push(Tag::Delete, mid_a[i], &mut ops);
                i += 1;
            } else {
                push(Tag::Insert, mid_b[j], &mut ops);
                j += 1;
            }
        }
    }

    for &line in &a[a.len() - suffix..] {
        push(Tag::Equal, line, &mut ops);
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_texts_have_no_diff() {
        assert_eq!(unified_diff("a\nb\n", "a\nb\n", "x", "y"), "");
        assert_eq!(unified_diff("", "", "x", "y"), "");
    }

    #[test]
    fn test_single_line_change() {
        let diff = unified_diff("a\nb\nc\n", "a\nB\nc\n", "original/f.py", "suggested/f.py");
        assert_eq!(
            diff,
            "--- original/f.py\n+++ suggested/f.py\n@@ -1,3 +1,3 @@\n a\n-b\n+B\n c"
        );
        assert_eq!(diff.matches("\n-").count(), 1);
        assert_eq!(diff.matches("\n+").count(), 2); // header and the added line
    }

    #[test]
    fn test_distant_changes_make_two_hunks() {
        let original: String = (1..=20).map(|i| format!("line{i}\n")).collect();
        let changed = original
            .replace("line2\n", "LINE2\n")
            .replace("line18\n", "LINE18\n");

        let diff = unified_diff(&original, &changed, "a", "b");
        let hunks: Vec<&str> = diff.lines().filter(|l| l.starts_with("@@")).collect();
        assert_eq!(hunks, vec!["@@ -1,5 +1,5 @@", "@@ -15,6 +15,6 @@"]);
    }

    #[test]
    fn test_close_changes_share_a_hunk() {
        let original: String = (1..=10).map(|i| format!("{i}\n")).collect();
        let changed = original.replace("3\n", "x\n").replace("8\n", "y\n");

        let diff = unified_diff(&original, &changed, "a", "b");
        assert_eq!(diff.lines().filter(|l| l.starts_with("@@")).count(), 1);
        assert!(diff.contains("@@ -1,10 +1,10 @@"));
    }

    #[test]
    fn test_insert_into_empty() {
        let diff = unified_diff("", "new\n", "a", "b");
        assert_eq!(diff, "--- a\n+++ b\n@@ -0,0 +1 @@\n+new");
    }

    #[test]
    fn test_delete_everything() {
        let diff = unified_diff("x\ny\n", "", "a", "b");
        assert_eq!(diff, "--- a\n+++ b\n@@ -1,2 +0,0 @@\n-x\n-y");
    }

    #[test]
    fn test_replacement_lists_deletions_first() {
        let diff = unified_diff("keep\nold1\nold2\n", "keep\nnew1\nnew2\n", "a", "b");
        let body: Vec<&str> = diff.lines().skip(3).collect();
        assert_eq!(body, vec![" keep", "-old1", "-old2", "+new1", "+new2"]);
    }
}
