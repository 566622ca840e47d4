//! Archive path arithmetic.
//!
//! Entry names are `/`-separated and relative to the archive root. References
//! inside the book are relative to the directory of the document holding them.

/// The directory part of an entry name (empty at the archive root).
pub(crate) fn parent(path: &str) -> &str {
    path.rfind('/').map_or("", |slash| &path[..slash])
}

/// The extension of an entry name, without the dot.
pub(crate) fn extension(path: &str) -> Option<&str> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    file_name.rfind('.').filter(|&dot| dot > 0).map(|dot| &file_name[dot + 1..])
}

/// Resolve `reference` against `base_dir`: drop the fragment and query,
/// then normalize `.` and `..` segments.
///
/// `None` for external references (`http:`, `data:`, ...), empty references
/// and references that climb above the archive root.
pub(crate) fn resolve(base_dir: &str, reference: &str) -> Option<String> {
    let reference = reference.split(['#', '?']).next().unwrap_or_default();
    if reference.is_empty() || has_scheme(reference) {
        return None;
    }
    let (base_dir, reference) = match reference.strip_prefix('/') {
        Some(absolute) => ("", absolute),
        None => (base_dir, reference),
    };
    let mut segments: Vec<&str> = Vec::new();
    for segment in base_dir.split('/').chain(reference.split('/')) {
        match segment {
            "" | "." => {},
            ".." => {
                segments.pop()?;
            },
            segment => segments.push(segment),
        }
    }
    if segments.is_empty() { None } else { Some(segments.join("/")) }
}

fn has_scheme(reference: &str) -> bool {
    let Some(colon) = reference.find(':') else {
        return false;
    };
    let scheme = &reference[..colon];
    scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
