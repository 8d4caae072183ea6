//! String and path helpers shared by every framework parser.
//!
//! All helpers are pure. None of them fail loudly: a helper that cannot do its
//! job returns `None` (or an empty value) and lets the caller drop the record.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Component, Path, PathBuf};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

/// Splits `value` around the last occurrence of `separator`.
///
/// Returns `None` when the separator does not occur.
///
/// ```
/// use testlens::util::split_on_last;
///
/// assert_eq!(split_on_last("pkg.mod.Case.test", "."), Some(("pkg.mod.Case", "test")));
/// assert_eq!(split_on_last("bare", "."), None);
/// ```
pub fn split_on_last<'a>(value: &'a str, separator: &str) -> Option<(&'a str, &'a str)> {
    value
        .rfind(separator)
        .map(|idx| (&value[..idx], &value[idx + separator.len()..]))
}

/// Splits `value` around the first occurrence of `separator`.
///
/// Returns `None` when the separator does not occur.
pub fn split_on_first<'a>(value: &'a str, separator: &str) -> Option<(&'a str, &'a str)> {
    value
        .find(separator)
        .map(|idx| (&value[..idx], &value[idx + separator.len()..]))
}

/// Resolves `path` against `cwd` and normalizes `.` and `..` components.
///
/// Absolute inputs ignore `cwd`. The filesystem is never touched, so the
/// result is purely lexical.
pub fn resolve_path(cwd: &Path, path: impl AsRef<Path>) -> PathBuf {
    let joined = cwd.join(path);
    let mut resolved = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // popping past the root is a no-op
                resolved.pop();
            }
            other => resolved.push(other.as_os_str()),
        }
    }
    resolved
}

/// Same as [`resolve_path`], rendered as a string for use inside test ids.
pub fn resolve_path_string(cwd: &Path, path: impl AsRef<Path>) -> String {
    resolve_path(cwd, path).to_string_lossy().into_owned()
}

/// Groups items by a derived key, preserving first-seen key order and the
/// original order of items within each group.
pub fn group_by<T, K, F>(items: impl IntoIterator<Item = T>, mut key: F) -> Vec<(K, Vec<T>)>
where
    K: Eq + Hash + Clone,
    F: FnMut(&T) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<T>)> = Vec::new();

    for item in items {
        let k = key(&item);
        match index.get(&k) {
            Some(&pos) => groups[pos].1.push(item),
            None => {
                index.insert(k.clone(), groups.len());
                groups.push((k, vec![item]));
            }
        }
    }

    groups
}

/// Removes items with duplicate keys, keeping the **last** occurrence of each.
///
/// Surviving items keep the relative order of their last occurrences.
pub fn distinct_by_last<T, K, F>(items: Vec<T>, mut key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: FnMut(&T) -> K,
{
    let mut last_seen: HashMap<K, usize> = HashMap::new();
    for (pos, item) in items.iter().enumerate() {
        last_seen.insert(key(item), pos);
    }

    items
        .into_iter()
        .enumerate()
        .filter(|(pos, item)| last_seen.get(&key(item)) == Some(pos))
        .map(|(_, item)| item)
        .collect()
}

/// Decodes a standard base64 payload into text.
///
/// Invalid UTF-8 is replaced rather than rejected; a malformed payload
/// yields `None`.
pub fn decode_base64_message(payload: &str) -> Option<String> {
    match BASE64.decode(payload.trim()) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            tracing::debug!("Ignoring undecodable message payload: {}", e);
            None
        }
    }
}

/// Joins the non-empty parts with `separator`.
///
/// Every message built by the parsers goes through this helper, so absent
/// output never leaves stray separators behind.
///
/// ```
/// use testlens::util::concat_non_empty;
///
/// assert_eq!(concat_non_empty(".", ["", "", "x", "y", ""]), "x.y");
/// ```
pub fn concat_non_empty<I, S>(separator: &str, parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut joined = String::new();
    for part in parts {
        let part = part.as_ref();
        if part.is_empty() {
            continue;
        }
        if !joined.is_empty() {
            joined.push_str(separator);
        }
        joined.push_str(part);
    }
    joined
}

/// Like [`concat_non_empty`], but returns `None` instead of an empty string.
pub fn concat_non_empty_opt<I, S>(separator: &str, parts: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Some(concat_non_empty(separator, parts)).filter(|joined| !joined.is_empty())
}

/// Returns everything after the last occurrence of `marker`.
///
/// When the marker is missing the whole output is returned, since some
/// frameworks omit the banner when nothing else was printed.
pub fn text_after_last<'a>(output: &'a str, marker: &str) -> &'a str {
    match output.rfind(marker) {
        Some(idx) => &output[idx + marker.len()..],
        None => output,
    }
}

/// Returns the text enclosed by the last `begin` marker and the first `end`
/// marker that follows it.
pub fn text_between<'a>(output: &'a str, begin: &str, end: &str) -> Option<&'a str> {
    let start = output.rfind(begin)? + begin.len();
    let rest = &output[start..];
    let stop = rest.find(end)?;
    Some(&rest[..stop])
}

/// Returns the first line of `text`, or `None` when it is blank.
pub fn first_line(text: &str) -> Option<&str> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
}

/// Returns the final component of a `/` or `\` separated path.
pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
