use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use super::links::{is_valid_apply_link, normalize};

static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).unwrap());
static APPLY_ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)<a[^>]+href\s*=\s*["']([^"']+)["'][^>]*>\s*(?:<img[^>]*alt\s*=\s*["']Apply["']|Apply\b)"#,
    )
    .unwrap()
});
static CELL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<td[^>]*>(.*?)</td>").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
pub(crate) static AGE_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(\d+)\s*(h|d|w|mo)\s*$").unwrap());

/// Column holding the "posted N ago" token in the SimplifyJobs table:
/// Company | Role | Location | Application | Age.
pub const AGE_CELL_INDEX: usize = 4;

/// First href in the row that normalizes and passes the validity filter.
/// Anchors labelled "Apply" (text or `<img alt="Apply">`) are tried before
/// any other href in the row.
pub fn extract_apply_link(row: &str) -> Option<String> {
    let apply_anchors = APPLY_ANCHOR_RE.captures_iter(row).map(|c| c[1].to_string());
    let all_hrefs = HREF_RE.captures_iter(row).map(|c| c[1].to_string());

    apply_anchors
        .chain(all_hrefs)
        .filter_map(|href| normalize(&href))
        .find(|url| is_valid_apply_link(url))
}

/// Positional (company, role, location) from the first three `<td>` cells.
pub fn extract_company_role_location(row: &str) -> (Option<String>, Option<String>, Option<String>) {
    let cells = cells(row);
    let at = |i: usize| cells.get(i).cloned().filter(|c| !c.is_empty());
    (at(0), at(1), at(2))
}

/// Relative age token ("0d", "3d", "1w", "2mo") from the age column.
pub fn extract_posted_age(row: &str) -> Option<String> {
    let cells = cells(row);
    let age = cells.get(AGE_CELL_INDEX)?;
    if age.is_empty() {
        return None;
    }
    if !AGE_TOKEN_RE.is_match(age) {
        warn!(
            cell = %age,
            "Age column does not hold an age token; table layout may have changed"
        );
        return None;
    }
    Some(age.to_lowercase())
}

fn cells(row: &str) -> Vec<String> {
    CELL_RE
        .captures_iter(row)
        .map(|c| clean_text(&c[1]))
        .collect()
}

/// Strip tags, decode entities, collapse whitespace.
pub fn clean_text(raw: &str) -> String {
    let untagged = TAG_RE.replace_all(raw, " ");
    let decoded = html_escape::decode_html_entities(&untagged);
    SPACE_RE.replace_all(&decoded, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROW: &str = r#"<tr> <td><strong><a href="https://simplify.jobs/c/Acme?utm_source=GHList">Acme</a></strong></td> <td>Software Engineer Intern</td> <td>NYC</td> <td><div align="center"><a href="https://boards.greenhouse.io/acme/jobs/1?utm_source=Simplify&ref=Simplify"><img src="https://i.imgur.com/u1KNU8z.png" width="118" alt="Apply"></a> <a href="https://simplify.jobs/p/abc?utm_source=GHList"><img src="https://i.imgur.com/aVnQdox.png" width="30" alt="Simplify"></a></div></td> <td>3d</td> </tr>"#;

    #[test]
    fn apply_anchor_wins() {
        assert_eq!(
            extract_apply_link(ROW).as_deref(),
            Some("https://boards.greenhouse.io/acme/jobs/1")
        );
    }

    #[test]
    fn text_apply_anchor() {
        let row = r#"<td><a href="https://acme.com/careers">Careers</a></td><td><a href="https://acme.com/jobs/9">apply now</a></td>"#;
        assert_eq!(extract_apply_link(row).as_deref(), Some("https://acme.com/jobs/9"));
    }

    #[test]
    fn falls_back_to_first_valid_href() {
        let row = r#"<td><a href="https://simplify.jobs/c/Acme">Acme</a></td><td><a href="https://acme.com/logo.png">x</a> <a href='https://acme.com/jobs/7/'>Role</a></td>"#;
        assert_eq!(extract_apply_link(row).as_deref(), Some("https://acme.com/jobs/7"));
    }

    #[test]
    fn no_valid_link() {
        let row = r#"<td><a href="https://simplify.jobs/c/Acme">Acme</a></td><td>🔒</td>"#;
        assert_eq!(extract_apply_link(row), None);
    }

    #[test]
    fn company_role_location() {
        let (c, r, l) = extract_company_role_location(ROW);
        assert_eq!(c.as_deref(), Some("Acme"));
        assert_eq!(r.as_deref(), Some("Software Engineer Intern"));
        assert_eq!(l.as_deref(), Some("NYC"));
    }

    #[test]
    fn missing_cells_are_none() {
        let (c, r, l) = extract_company_role_location("<td>Only &amp; one</td>");
        assert_eq!(c.as_deref(), Some("Only & one"));
        assert_eq!(r, None);
        assert_eq!(l, None);
        assert_eq!(extract_company_role_location("no cells"), (None, None, None));
    }

    #[test]
    fn posted_age() {
        assert_eq!(extract_posted_age(ROW).as_deref(), Some("3d"));
        let row = "<td>a</td><td>b</td><td>c</td><td>d</td><td> 2MO </td>";
        assert_eq!(extract_posted_age(row).as_deref(), Some("2mo"));
    }

    #[test]
    fn posted_age_rejects_other_layouts() {
        assert_eq!(extract_posted_age("<td>a</td><td>b</td><td>3d</td>"), None);
        let row = "<td>a</td><td>b</td><td>c</td><td>d</td><td>Jan 5</td>";
        assert_eq!(extract_posted_age(row), None);
    }
}
