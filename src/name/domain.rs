use std::sync::LazyLock;

use regex::Regex;

/// Matches a hostname-like sequence with an optional scheme and `www.` prefix.
/// The final label must be at least two letters, optionally followed by one more
/// letter label to cover second-level domains like `.co.uk`.
static RE_DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i:https?://)?(?i:www\.)?[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]*\.[a-zA-Z]{2,}(?:\.[a-zA-Z]{2,})?")
        .expect("Failed to compile domain regex")
});

/// Matches a scheme and/or `www.` prefix at the very end of the text.
static RE_TRAILING_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i:https?://)?(?i:www\.)?$").expect("Failed to compile URL prefix regex"));

/// Top-level domains that mark a match as an advertising domain.
const ADVERTISING_TLDS: &[&str] = &[
    ".com", ".org", ".net", ".tv", ".io", ".co", ".uk", ".de", ".fr", ".ru", ".kim", ".xyz", ".top", ".site", ".info",
];

/// Shorter matches are too likely to be a plain `name.ext`.
const MIN_DOMAIN_LENGTH: usize = 6;

/// More dots than this looks like a dotted release name rather than a domain.
const MAX_DOMAIN_DOTS: usize = 2;

/// Find the first plausible advertising domain or URL in the given text.
///
/// A candidate is accepted only if it has an explicit `http(s)://` scheme,
/// a `www.` prefix, or contains one of the known advertising TLDs.
/// Candidates of six characters or fewer, or with more than two dots, are rejected.
///
/// The returned slice borrows from the input so the original casing is preserved.
///
/// ```rust
/// use qbit_cleaner::name::extract_domain;
///
/// assert_eq!(extract_domain("Movie [www.Example.org] 1080p"), Some("www.Example.org"));
/// assert_eq!(extract_domain("Movie.2024.1080p.mkv"), None);
/// ```
#[must_use]
pub fn extract_domain(text: &str) -> Option<&str> {
    RE_DOMAIN.find_iter(text).find_map(|candidate| {
        let start = anchored_start(text, candidate.start());
        let full_match = &text[start..candidate.end()];
        let bare_match = candidate.as_str();

        let accepted = looks_like_advertising(full_match)
            && bare_match.chars().count() > MIN_DOMAIN_LENGTH
            && bare_match.matches('.').count() <= MAX_DOMAIN_DOTS;

        accepted.then_some(full_match)
    })
}

/// Extend a match start backwards over an immediately preceding scheme and `www.` prefix.
fn anchored_start(text: &str, start: usize) -> usize {
    RE_TRAILING_PREFIX
        .find(&text[..start])
        .map_or(start, |prefix| prefix.start())
}

/// Check if a single label, without the leading dot, is one of the advertising TLDs.
pub(super) fn is_advertising_tld(label: &str) -> bool {
    ADVERTISING_TLDS
        .iter()
        .any(|tld| tld.trim_start_matches('.').eq_ignore_ascii_case(label))
}

fn looks_like_advertising(candidate: &str) -> bool {
    let lower = candidate.to_lowercase();
    lower.contains("http://")
        || lower.contains("https://")
        || lower.contains("www.")
        || ADVERTISING_TLDS.iter().any(|tld| lower.contains(tld))
}
