//! Extraction of ranked items from free-form model output.

use regex::Regex;
use std::sync::LazyLock;

const LINE_BREAKS: [char; 4] = ['\n', '\r', '\u{2028}', '\u{2029}'];

static ORDINAL_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+\.\s*(.+)$").unwrap());

/// Collect up to `k` items from lines of the form `<N>. <item>`, in line order.
///
/// Lines end at `\n`, `\r`, or a Unicode line/paragraph separator, and are
/// trimmed before matching. Bullets, headings, and prose are skipped.
/// The result may be shorter than `k`; callers decide what a short list means.
pub fn extract_ranked_lines(text: &str, k: usize) -> Vec<String> {
    let mut out = Vec::with_capacity(k);
    if k == 0 {
        return out;
    }
    for line in text.trim().split(LINE_BREAKS) {
        if let Some(caps) = ORDINAL_LINE.captures(line.trim()) {
            let item = caps[1].trim();
            if item.is_empty() {
                continue;
            }
            out.push(item.to_string());
            if out.len() >= k {
                break;
            }
        }
    }
    out
}
