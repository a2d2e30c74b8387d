use similar::{ChangeTag, TextDiff};

/// Regroup added diff lines into logical `<tr>...</tr>` row strings.
///
/// Rows are buffered from a line containing `<tr` up to the line containing
/// `</tr>`; lines outside an open row are ignored. When no complete row is
/// found, blank-line-separated chunks that contain a `<td` are used instead.
///
/// Best-effort: two rows whose lines interleave inside one hunk, or nested
/// tables, are not reconstructed correctly.
pub fn reconstruct_rows(added_lines: &[String]) -> Vec<String> {
    let mut rows = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    let mut collecting = false;

    for raw in added_lines {
        let line = raw.trim();
        let lower = line.to_lowercase();

        if lower.contains("<tr") {
            collecting = true;
            buffer.clear();
            buffer.push(line);
        } else if collecting {
            buffer.push(line);
        } else {
            continue;
        }

        if lower.contains("</tr>") {
            rows.push(buffer.join(" "));
            buffer.clear();
            collecting = false;
        }
    }

    if !rows.is_empty() {
        return rows;
    }

    chunk_fallback(added_lines)
}

fn chunk_fallback(added_lines: &[String]) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let mut flush = |current: &mut Vec<&str>| {
        if current.is_empty() {
            return;
        }
        let chunk = current.join(" ");
        if chunk.to_lowercase().contains("<td") {
            chunks.push(chunk);
        }
        current.clear();
    };

    for raw in added_lines {
        let line = raw.trim();
        if line.is_empty() {
            flush(&mut current);
        } else {
            current.push(line);
        }
    }
    flush(&mut current);

    chunks
}

/// Added lines of a unified-diff patch, without the leading `+`.
pub fn added_lines_from_patch(patch: &str) -> Vec<String> {
    patch
        .lines()
        .filter(|l| !l.starts_with("+++"))
        .filter_map(|l| l.strip_prefix('+'))
        .map(str::to_string)
        .collect()
}

/// Lines inserted going from `old` to `new`, from a full-content line diff.
/// Compares line contents only, so a missing final newline on either side
/// does not count as a change.
pub fn added_lines_between(old: &str, new: &str) -> Vec<String> {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    TextDiff::from_slices(&old_lines, &new_lines)
        .iter_all_changes()
        .filter(|c| c.tag() == ChangeTag::Insert)
        .map(|c| c.value().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_input() {
        assert!(reconstruct_rows(&[]).is_empty());
    }

    #[test]
    fn row_split_over_three_lines() {
        let rows = reconstruct_rows(&lines(&[
            "  <tr>",
            "<td>Acme</td><td>SWE Intern</td>",
            "</tr>",
        ]));
        assert_eq!(rows, vec!["<tr> <td>Acme</td><td>SWE Intern</td> </tr>"]);
    }

    #[test]
    fn single_line_rows_keep_order() {
        let rows = reconstruct_rows(&lines(&[
            "| stray markdown |",
            "<TR><td>A</td></TR>",
            "noise between rows",
            "<tr><td>B</td></tr>",
        ]));
        assert_eq!(rows, vec!["<TR><td>A</td></TR>", "<tr><td>B</td></tr>"]);
    }

    #[test]
    fn unterminated_row_is_dropped() {
        let rows = reconstruct_rows(&lines(&["<tr><td>A</td></tr>", "<tr>", "<td>B</td>"]));
        assert_eq!(rows, vec!["<tr><td>A</td></tr>"]);
    }

    #[test]
    fn reopened_row_restarts_buffer() {
        let rows = reconstruct_rows(&lines(&["<tr>", "<td>lost</td>", "<tr>", "<td>B</td>", "</tr>"]));
        assert_eq!(rows, vec!["<tr> <td>B</td> </tr>"]);
    }

    #[test]
    fn chunk_fallback_without_row_markers() {
        let rows = reconstruct_rows(&lines(&[
            "<td>A</td>",
            "<td>Intern</td>",
            "",
            "plain text only",
            "",
            "<td>B</td>",
        ]));
        assert_eq!(rows, vec!["<td>A</td> <td>Intern</td>", "<td>B</td>"]);
    }

    #[test]
    fn patch_added_lines() {
        let patch = "@@ -1,2 +1,3 @@\n context\n-removed\n+<tr><td>A</td></tr>\n+++ not a header in hunks\n+\n";
        assert_eq!(added_lines_from_patch(patch), lines(&["<tr><td>A</td></tr>", ""]));
    }

    #[test]
    fn full_content_diff() {
        let old = "header\n<tr><td>A</td></tr>\nfooter\n";
        let new = "header\n<tr><td>B</td></tr>\n<tr><td>A</td></tr>\nfooter";
        let added = added_lines_between(old, new);
        assert_eq!(added, lines(&["<tr><td>B</td></tr>"]));
    }

    #[test]
    fn unchanged_last_line_without_newline_is_not_added() {
        let old = "header\n<tr><td>Old</td><td>x</td><td>y</td></tr>";
        let new = "header\n<tr><td>Old</td><td>x</td><td>y</td></tr>\n<tr><td>New</td></tr>\n";
        let rows = reconstruct_rows(&added_lines_between(old, new));
        assert_eq!(rows, vec!["<tr><td>New</td></tr>"]);
    }
}
