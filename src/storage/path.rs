//! Path normalisation shared by the handlers and the backends.

/// Resolve `input` against the absolute directory `cwd`.
///
/// `.` segments are dropped and `..` pops a segment, clamping at the root.
/// The result is always absolute with no trailing slash (except `/`).
pub fn resolve(cwd: &str, input: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    if !input.starts_with('/') {
        segments.extend(cwd.split('/').filter(|s| !s.is_empty()));
    }
    for part in input.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for seg in segments {
        out.push('/');
        out.push_str(seg);
    }
    out
}

/// Parent of a normalised absolute path; the root is its own parent.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Final segment of a normalised absolute path (empty for the root).
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_against_cwd() {
        assert_eq!(resolve("/", "anim"), "/anim");
        assert_eq!(resolve("/anim", "cat.araw"), "/anim/cat.araw");
        assert_eq!(resolve("/anim", "/other"), "/other");
    }

    #[test]
    fn normalises_dots_and_clamps_at_root() {
        assert_eq!(resolve("/a/b", "../c/./d"), "/a/c/d");
        assert_eq!(resolve("/", "../../x"), "/x");
        assert_eq!(resolve("/a", ".."), "/");
        assert_eq!(resolve("/a", "."), "/a");
        assert_eq!(resolve("/", "dir//sub/"), "/dir/sub");
    }

    #[test]
    fn splits_parent_and_name() {
        assert_eq!(parent("/a/b"), "/a");
        assert_eq!(parent("/a"), "/");
        assert_eq!(parent("/"), "/");
        assert_eq!(file_name("/a/b.raw"), "b.raw");
        assert_eq!(file_name("/"), "");
    }
}
