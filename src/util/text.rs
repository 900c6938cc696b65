/// Maximum length, in characters, of the title-derived part of a
/// download filename.
const MAX_TITLE_LEN: usize = 60;

/// Characters that never survive into a filename.
const FORBIDDEN: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Builds a filesystem-safe filename stem from an entry title.
///
/// Takes at most the first 60 characters, replaces path separators and
/// other characters that are invalid on common filesystems with `_`, and
/// strips control characters. An empty or whitespace-only result becomes
/// `"untitled"`.
pub fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .take(MAX_TITLE_LEN)
        .map(|c| {
            if c.is_control() || FORBIDDEN.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Formats a byte count for display. 0 means the server did not declare
/// a size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;

    if bytes == 0 {
        "Unknown size".to_string()
    } else if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_format_size_unknown() {
        assert_eq!(format_size(0), "Unknown size");
    }

    #[test]
    fn test_format_size_bytes() {
        assert_eq!(format_size(512), "512B");
    }

    #[test]
    fn test_format_size_kilobytes() {
        assert_eq!(format_size(102400), "100.0KB");
        assert_eq!(format_size(1536), "1.5KB");
    }

    #[test]
    fn test_format_size_megabytes() {
        assert_eq!(format_size(1024 * 1024), "1.0MB");
        assert_eq!(format_size(5 * 1024 * 1024 + 512 * 1024), "5.5MB");
    }

    #[test]
    fn test_sanitize_replaces_path_characters() {
        assert_eq!(sanitize_title("Crime/Punishment: vol 1"), "Crime_Punishment_ vol 1");
        assert_eq!(sanitize_title("a\\b*c?d"), "a_b_c_d");
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = "x".repeat(200);
        assert_eq!(sanitize_title(&long).chars().count(), 60);
    }

    #[test]
    fn test_sanitize_cap_respects_char_boundaries() {
        let cjk = "書".repeat(100);
        let out = sanitize_title(&cjk);
        assert_eq!(out.chars().count(), 60);
        assert!(out.chars().all(|c| c == '書'));
    }

    #[test]
    fn test_sanitize_empty_title() {
        assert_eq!(sanitize_title(""), "untitled");
        assert_eq!(sanitize_title("   "), "untitled");
        assert_eq!(sanitize_title("///"), "untitled");
    }

    proptest! {
        #[test]
        fn prop_sanitized_title_is_safe(title in ".*") {
            let out = sanitize_title(&title);
            prop_assert!(!out.is_empty());
            prop_assert!(out.chars().count() <= 60);
            prop_assert!(!out.chars().any(|c| c.is_control() || FORBIDDEN.contains(&c)));
        }

        #[test]
        fn prop_format_size_never_empty(bytes in any::<u64>()) {
            prop_assert!(!format_size(bytes).is_empty());
        }
    }
}
