//! Folder discovery and rename ordering for the content of a single torrent.

use std::collections::BTreeSet;

use itertools::Itertools;

/// Collect every folder level that appears in the given file paths.
///
/// ```rust
/// use qbit_cleaner::paths::unique_folder_paths;
///
/// let folders = unique_folder_paths(["Pack/Disc 1/01.flac", "Pack/cover.jpg"]);
/// assert_eq!(folders.into_iter().collect::<Vec<_>>(), vec!["Pack", "Pack/Disc 1"]);
/// ```
#[must_use]
pub fn unique_folder_paths<I, S>(files: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut folders = BTreeSet::new();
    for file in files {
        let file = file.as_ref();
        for (index, _) in file.match_indices('/') {
            let folder = &file[..index];
            if !folder.is_empty() {
                folders.insert(folder.to_string());
            }
        }
    }
    folders
}

/// Sort folders so that the deepest ones come first.
///
/// Renaming a parent before its children would invalidate the child paths,
/// so children are always handled first. Folders at the same depth are sorted alphabetically.
#[must_use]
pub fn order_for_rename<I>(folders: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    folders
        .into_iter()
        .sorted_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| a.cmp(b)))
        .collect()
}

/// Replace the folder prefix of every path inside `old_prefix` with `new_prefix`.
///
/// Paths outside the renamed folder are returned unchanged.
#[must_use]
pub fn rewrite_paths(files: Vec<String>, old_prefix: &str, new_prefix: &str) -> Vec<String> {
    files
        .into_iter()
        .map(|path| match path.strip_prefix(old_prefix) {
            Some(rest) if rest.starts_with('/') => format!("{new_prefix}{rest}"),
            _ => path,
        })
        .collect()
}

fn depth(path: &str) -> usize {
    path.matches('/').count()
}



#[cfg(test)]
mod rewrite_paths_tests {
    use super::*;

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn rewrites_files_inside_folder() {
        let files = paths(&["Pack site.com/a.mkv", "Pack site.com/sub/b.mkv", "Other/c.mkv"]);
        let result = rewrite_paths(files, "Pack site.com", "Pack");
        assert_eq!(result, paths(&["Pack/a.mkv", "Pack/sub/b.mkv", "Other/c.mkv"]));
    }

    #[test]
    fn ignores_sibling_with_same_name_prefix() {
        let files = paths(&["Pack site.com extras/a.mkv", "Pack site.com/b.mkv"]);
        let result = rewrite_paths(files, "Pack site.com", "Pack");
        assert_eq!(result, paths(&["Pack site.com extras/a.mkv", "Pack/b.mkv"]));
    }

    #[test]
    fn rewrites_nested_folder() {
        let files = paths(&["Root/Disc www.site.com/01.flac", "Root/cover.jpg"]);
        let result = rewrite_paths(files, "Root/Disc www.site.com", "Root/Disc");
        assert_eq!(result, paths(&["Root/Disc/01.flac", "Root/cover.jpg"]));
    }
}
