// src/sanitize.rs
//! Final text cleanup before a post is queued.
//!
//! `sanitize` is idempotent: its own trailer is recognised and removed before a
//! fresh one is appended, so re-running it on its output changes nothing.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ingest::types::SourceKind;
use crate::rewrite::RewrittenItem;

static RE_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static RE_URL_PARENS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\([^()]*https?://[^()]*\)").unwrap());
static RE_HSPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static RE_BLANKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Pictographic blocks plus the joiners/selectors that glue emoji sequences.
const EMOJI_RANGES: &[(u32, u32)] = &[
    (0x1F000, 0x1F02F), // mahjong
    (0x1F0A0, 0x1F0FF), // playing cards
    (0x1F1E0, 0x1F1FF), // regional indicators (flags)
    (0x1F200, 0x1F2FF), // enclosed ideographic supplement
    (0x1F300, 0x1F5FF), // symbols & pictographs
    (0x1F600, 0x1F64F), // emoticons
    (0x1F680, 0x1F6FF), // transport & map
    (0x1F900, 0x1F9FF), // supplemental symbols & pictographs
    (0x1FA70, 0x1FAFF), // symbols & pictographs extended-A
    (0x2600, 0x26FF),   // misc symbols
    (0x2700, 0x27BF),   // dingbats
    (0x200D, 0x200D),   // ZWJ
    (0x20E3, 0x20E3),   // combining keycap
    (0xFE0F, 0xFE0F),   // VS16
];

pub fn is_emoji(c: char) -> bool {
    let cp = c as u32;
    EMOJI_RANGES.iter().any(|&(lo, hi)| (lo..=hi).contains(&cp))
}

pub fn strip_emoji(s: &str) -> String {
    s.chars().filter(|c| !is_emoji(*c)).collect()
}

/// Any token opening with `#`, punctuation included (`#web3-news`, `#crypto,`).
fn is_hashtag(token: &str) -> bool {
    token.starts_with('#') && token.len() > 1
}

/// Nested groups expose a new URL parenthetical once the inner one is gone,
/// so strip until nothing changes.
fn strip_url_parens(text: &str) -> String {
    let mut out = text.to_string();
    loop {
        let next = RE_URL_PARENS.replace_all(&out, "").into_owned();
        if next == out {
            return out;
        }
        out = next;
    }
}

fn is_hashtag_line(line: &str) -> bool {
    let mut toks = line.split_whitespace().peekable();
    toks.peek().is_some() && toks.all(is_hashtag)
}

fn strip_trailing_hashtags(line: &str) -> String {
    let mut toks: Vec<&str> = line.split_whitespace().collect();
    while toks.last().is_some_and(|t| is_hashtag(t)) {
        toks.pop();
    }
    toks.join(" ")
}

#[derive(Debug, Clone)]
pub struct Sanitizer {
    signature: String,
    source_label: String,
}

impl Sanitizer {
    pub fn new(signature: impl Into<String>, source_label: impl Into<String>) -> Self {
        Self {
            signature: signature.into().trim().to_string(),
            source_label: source_label.into().trim().to_string(),
        }
    }

    fn attribution_line(&self, kind: &SourceKind) -> Option<String> {
        match kind {
            SourceKind::Generic => None,
            SourceKind::Attributed { reference } => {
                Some(format!("{}: {}", self.source_label, reference.trim()))
            }
        }
    }

    fn trailer(&self, kind: &SourceKind) -> String {
        match self.attribution_line(kind) {
            Some(attr) => format!("{attr}\n{}", self.signature),
            None => self.signature.clone(),
        }
    }

    /// Pure text pipeline; see module docs.
    pub fn sanitize(&self, raw: &str, kind: &SourceKind) -> String {
        let text = strip_emoji(raw);
        let text = RE_BOLD.replace_all(&text, "<b>$1</b>");
        let text = strip_url_parens(&text);

        let attribution = self.attribution_line(kind);
        let is_trailer_line = |l: &str| {
            (!self.signature.is_empty() && l == self.signature)
                || attribution.as_deref() == Some(l)
        };

        let mut lines: Vec<String> = text
            .lines()
            .map(|l| RE_HSPACE.replace_all(l, " ").trim().to_string())
            .filter(|l| !is_hashtag_line(l) && !is_trailer_line(l))
            .collect();

        // trailing hashtags on the last body line; stripping may expose another
        // line that has to go as well
        loop {
            while lines.last().is_some_and(|l| l.is_empty()) {
                lines.pop();
            }
            let Some(last) = lines.last() else { break };
            let stripped = strip_trailing_hashtags(last);
            if stripped.is_empty() || is_trailer_line(&stripped) {
                lines.pop();
                continue;
            }
            if let Some(slot) = lines.last_mut() {
                *slot = stripped;
            }
            break;
        }

        let body = RE_BLANKS
            .replace_all(&lines.join("\n"), "\n\n")
            .trim()
            .to_string();

        let trailer = self.trailer(kind);
        match (body.is_empty(), trailer.is_empty()) {
            (true, _) => trailer,
            (false, true) => body,
            (false, false) => format!("{body}\n\n{trailer}"),
        }
    }

    /// Sanitize a rewritten item into its publishable form.
    pub fn finalize(&self, item: RewrittenItem) -> RewrittenItem {
        // attributed sources without a URL are credited by origin name
        let kind = match &item.source.kind {
            SourceKind::Attributed { reference } if reference.trim().is_empty() => {
                SourceKind::Attributed {
                    reference: item.source.origin.title.clone(),
                }
            }
            k => k.clone(),
        };
        let text = self.sanitize(&item.text, &kind);
        RewrittenItem { text, ..item }
    }
}
