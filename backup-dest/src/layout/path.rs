//! URL path joining.

/// Join URL path segments with single separators.
///
/// Empty segments are ignored, `.` and `..` are resolved, and the result is
/// rooted iff the first non-empty segment is.
pub fn join_url_path<S: AsRef<str>>(segments: &[S]) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let mut rooted = None;

    for segment in segments.iter().map(AsRef::as_ref) {
        if segment.is_empty() {
            continue;
        }
        if rooted.is_none() {
            rooted = Some(segment.starts_with('/'));
        }
        for part in segment.split('/') {
            match part {
                "" | "." => {}
                ".." => match parts.last() {
                    Some(&last) if last != ".." => {
                        parts.pop();
                    }
                    _ if rooted == Some(true) => {}
                    _ => parts.push(".."),
                },
                other => parts.push(other),
            }
        }
    }

    let joined = parts.join("/");
    if rooted == Some(true) {
        format!("/{joined}")
    } else {
        joined
    }
}
