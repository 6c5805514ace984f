use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use super::domain::is_advertising_tld;

static RE_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_.\[\](){}]+").expect("Failed to compile separator regex"));

static RE_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Failed to compile whitespace regex"));

/// Longest suffix after the last dot that still counts as a file extension.
const MAX_EXTENSION_LENGTH: usize = 6;

/// Remove the given domain from the last component of a slash-separated path.
///
/// Files keep their extension untouched and only the part before the last dot is cleaned.
/// Folders and extensionless names are cleaned as a whole.
/// After removing the domain, runs of separator characters are replaced with a single space.
/// If nothing would be left of the name, the original name is kept.
///
/// ```rust
/// use qbit_cleaner::name::clean_name;
///
/// assert_eq!(clean_name("Show/Episode [site.com].mkv", "site.com"), "Show/Episode.mkv");
/// assert_eq!(clean_name("www.site.com - Album", "www.site.com"), "Album");
/// ```
#[must_use]
pub fn clean_name(path: &str, domain: &str) -> String {
    if domain.is_empty() {
        return path.to_string();
    }

    let (directory, leaf) = path.rsplit_once('/').unwrap_or(("", path));

    let cleaned_leaf = match split_extension(leaf) {
        Some((base, extension)) => {
            let domain = strip_extension_suffix(domain, extension);
            format!("{}.{extension}", remove_domain(base, domain))
        }
        None => remove_domain(leaf, domain),
    };

    let result = if path.contains('/') {
        format!("{directory}/{cleaned_leaf}")
    } else {
        cleaned_leaf
    };

    if result == path { path.to_string() } else { result }
}

/// Check if the last component of the path looks like a file with an extension.
#[must_use]
pub fn is_file_name(path: &str) -> bool {
    let leaf = path.rsplit_once('/').map_or(path, |(_, leaf)| leaf);
    split_extension(leaf).is_some()
}

/// Split a name into base and extension if the part after the last dot is 1-6 characters.
fn split_extension(name: &str) -> Option<(&str, &str)> {
    let (base, extension) = name.rsplit_once('.')?;
    let length = extension.chars().count();
    (1..=MAX_EXTENSION_LENGTH).contains(&length).then_some((base, extension))
}

/// The optional second-level label of a domain match can swallow the file extension,
/// for example `examplesite.com.mkv`, so drop it before searching the base name.
/// A suffix that is itself a TLD belongs to the domain and is kept.
fn strip_extension_suffix<'a>(domain: &'a str, extension: &str) -> &'a str {
    if is_advertising_tld(extension) {
        return domain;
    }
    let suffix_length = extension.len() + 1;
    if domain.len() > suffix_length {
        let split = domain.len() - suffix_length;
        if let (Some(head), Some(tail)) = (domain.get(..split), domain.get(split..))
            && tail.starts_with('.')
            && tail[1..].eq_ignore_ascii_case(extension)
        {
            return head;
        }
    }
    domain
}

/// Remove all case-insensitive occurrences of the domain and tidy up what is left.
/// Returns the original name if the domain does not occur or nothing would remain.
fn remove_domain(name: &str, domain: &str) -> String {
    let Ok(domain_regex) = RegexBuilder::new(&regex::escape(domain))
        .case_insensitive(true)
        .build()
    else {
        tracing::warn!("Failed to build pattern for domain '{domain}'");
        return name.to_string();
    };

    if !domain_regex.is_match(name) {
        return name.to_string();
    }

    let removed = domain_regex.replace_all(name, "");
    let separated = RE_SEPARATORS.replace_all(&removed, " ");
    let cleaned = RE_WHITESPACE.replace_all(&separated, " ").trim().to_string();

    if cleaned.is_empty() { name.to_string() } else { cleaned }
}
