//! Name and list helpers for manifest-style values.

/// Split a comma separated header value, dropping empty entries
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Check if a package name matches an import pattern
///
/// `*` matches everything, `prefix.*` matches any name starting with
/// `prefix`, anything else must match exactly.
pub fn matches_package_pattern(pattern: &str, package: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix(".*") {
        Some(prefix) => package.starts_with(prefix),
        None => pattern == package,
    }
}

/// True when the pattern contains a wildcard
pub fn is_wildcard(pattern: &str) -> bool {
    pattern.ends_with('*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list("JavaSE-1.8, OSGi/Minimum-1.2,,"),
            vec!["JavaSE-1.8".to_string(), "OSGi/Minimum-1.2".to_string()]
        );
        assert!(split_list("  ").is_empty());
    }

    #[test]
    fn test_package_patterns() {
        assert!(matches_package_pattern("*", "a.b"));
        assert!(matches_package_pattern("a.b.*", "a.b.c"));
        assert!(matches_package_pattern("a.b", "a.b"));
        assert!(!matches_package_pattern("a.b", "a.b.c"));
        assert!(!matches_package_pattern("a.b.*", "x.y"));
        assert!(is_wildcard("a.*"));
        assert!(!is_wildcard("a.b"));
    }
}
