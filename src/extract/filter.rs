//! Per-entry filtering: a mandatory path-security gate followed by
//! configurable accept/reject checks.

use crate::zip::ArchiveEntry;

use super::extractor::ExtractOptions;

/// Longest entry name the security gate accepts, in bytes.
const MAX_NAME_LEN: usize = 1024;

/// Outcome of filtering one entry. Filtering is advisory: it always
/// resolves to a verdict, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Accept,
    /// Rejected by a configurable filter (extension, pattern...).
    Reject { reason: String },
    /// Rejected by the size bound; carries the numbers so the warning
    /// can cite them.
    RejectOversize { size: u64, limit: u64 },
    /// Rejected by the non-overridable security gate.
    SecurityReject { reason: String },
}

impl FilterVerdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, FilterVerdict::Accept)
    }
}

/// Validate an entry name against the path-security rules.
///
/// This gate runs before any user-supplied filter and cannot be
/// disabled by configuration. An entry name must never be used to
/// resolve a filesystem path until it has passed here.
pub fn validate_entry_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("empty entry name".into());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(format!("entry name longer than {} bytes", MAX_NAME_LEN));
    }
    if name.contains('\0') {
        return Err("entry name contains null byte".into());
    }
    if name.starts_with('/') || name.starts_with('\\') {
        return Err("absolute entry path".into());
    }
    if has_drive_prefix(name) {
        return Err("entry path starts with a drive letter".into());
    }
    if name.contains("../") || name.contains("..\\") {
        return Err("entry path contains parent-directory traversal".into());
    }
    Ok(())
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Decide whether an entry should be extracted.
///
/// The security gate runs first unconditionally; the configurable
/// checks then run in a fixed order (size bounds, extension allow-list,
/// content-type allow-list, glob include/exclude, custom predicate) and
/// short-circuit on the first rejection.
pub fn should_extract(entry: &ArchiveEntry, options: &ExtractOptions) -> FilterVerdict {
    if let Err(reason) = validate_entry_name(&entry.name) {
        return FilterVerdict::SecurityReject { reason };
    }

    // Directory entries carry no payload; the remaining checks are
    // about file content.
    if entry.is_directory {
        return FilterVerdict::Accept;
    }

    if let Some(limit) = options.max_entry_size {
        if entry.uncompressed_size > limit {
            return FilterVerdict::RejectOversize {
                size: entry.uncompressed_size,
                limit,
            };
        }
    }

    if let Some(allowed) = &options.allowed_extensions {
        let ext = extension_of(&entry.name);
        let ok = ext
            .map(|e| allowed.iter().any(|a| a.eq_ignore_ascii_case(e)))
            .unwrap_or(false);
        if !ok {
            return FilterVerdict::Reject {
                reason: format!("extension '{}' not in allow-list", ext.unwrap_or("")),
            };
        }
    }

    if let Some(allowed) = &options.allowed_content_types {
        let ct = content_type_of(&entry.name);
        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(ct)) {
            return FilterVerdict::Reject {
                reason: format!("content type '{}' not in allow-list", ct),
            };
        }
    }

    if !options.include_patterns.is_empty()
        && !options
            .include_patterns
            .iter()
            .any(|p| glob_match(p, &entry.name))
    {
        return FilterVerdict::Reject {
            reason: "no include pattern matched".into(),
        };
    }

    if let Some(p) = options
        .exclude_patterns
        .iter()
        .find(|p| glob_match(p, &entry.name))
    {
        return FilterVerdict::Reject {
            reason: format!("matched exclude pattern '{}'", p),
        };
    }

    if let Some(predicate) = &options.custom_filter {
        if !predicate(entry) {
            return FilterVerdict::Reject {
                reason: "rejected by custom filter".into(),
            };
        }
    }

    FilterVerdict::Accept
}

fn extension_of(name: &str) -> Option<&str> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() { None } else { Some(ext) }
}

/// Map a file extension to a MIME type for the content-type
/// allow-list. Unknown extensions are `application/octet-stream`.
pub fn content_type_of(name: &str) -> &'static str {
    match extension_of(name)
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("txt") | Some("md") | Some("log") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("csv") => "text/csv",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        Some("tar") => "application/x-tar",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Whether a pattern contains glob wildcard characters.
pub fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Glob matching with `*` (zero or more characters) and `?` (exactly
/// one character), via simple backtracking.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                // Match zero characters (skip the star) or consume one
                // and keep the star.
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::CompressionMethod;

    fn entry(name: &str, size: u64) -> ArchiveEntry {
        ArchiveEntry {
            name: name.to_string(),
            method: CompressionMethod::Stored,
            compressed_size: size,
            uncompressed_size: size,
            crc32: 0,
            lfh_offset: 0,
            last_mod_time: 0,
            last_mod_date: 0,
            is_directory: name.ends_with('/'),
        }
    }

    #[test]
    fn security_gate_rejects_traversal_and_absolute_names() {
        for bad in [
            "",
            "../evil.txt",
            "dir/../../evil.txt",
            "dir\\..\\evil.txt",
            "/etc/passwd",
            "\\windows\\system32",
            "C:evil.txt",
            "c:\\evil.txt",
            "file\0name",
        ] {
            assert!(validate_entry_name(bad).is_err(), "accepted: {:?}", bad);
        }
    }

    #[test]
    fn security_gate_rejects_overlong_names() {
        let long = "a/".repeat(600) + "f.txt";
        assert!(validate_entry_name(&long).is_err());
    }

    #[test]
    fn security_gate_accepts_normal_names() {
        for good in ["a.txt", "dir/b.txt", "deep/1/2/3.bin", "dotted..name"] {
            assert!(validate_entry_name(good).is_ok(), "rejected: {:?}", good);
        }
    }

    #[test]
    fn security_gate_runs_before_user_filters() {
        let mut options = ExtractOptions::default();
        options.include_patterns = vec!["*".to_string()];
        let verdict = should_extract(&entry("../evil.txt", 10), &options);
        assert!(matches!(verdict, FilterVerdict::SecurityReject { .. }));
    }

    #[test]
    fn size_bound_rejects_oversized() {
        let options = ExtractOptions {
            max_entry_size: Some(100),
            ..Default::default()
        };
        assert!(!should_extract(&entry("big.bin", 101), &options).is_accept());
        assert!(should_extract(&entry("ok.bin", 100), &options).is_accept());
    }

    #[test]
    fn extension_allow_list() {
        let options = ExtractOptions {
            allowed_extensions: Some(vec!["txt".into(), "json".into()]),
            ..Default::default()
        };
        assert!(should_extract(&entry("a.TXT", 1), &options).is_accept());
        assert!(!should_extract(&entry("a.exe", 1), &options).is_accept());
        assert!(!should_extract(&entry("noext", 1), &options).is_accept());
    }

    #[test]
    fn content_type_allow_list() {
        let options = ExtractOptions {
            allowed_content_types: Some(vec!["text/plain".into()]),
            ..Default::default()
        };
        assert!(should_extract(&entry("readme.txt", 1), &options).is_accept());
        assert!(!should_extract(&entry("logo.png", 1), &options).is_accept());
    }

    #[test]
    fn include_exclude_patterns() {
        let options = ExtractOptions {
            include_patterns: vec!["src/*".into()],
            exclude_patterns: vec!["*.tmp".into()],
            ..Default::default()
        };
        assert!(should_extract(&entry("src/main.rs", 1), &options).is_accept());
        assert!(!should_extract(&entry("docs/readme.md", 1), &options).is_accept());
        assert!(!should_extract(&entry("src/scratch.tmp", 1), &options).is_accept());
    }

    #[test]
    fn custom_predicate_runs_last() {
        let options = ExtractOptions {
            custom_filter: Some(Box::new(|e: &ArchiveEntry| !e.name.contains("secret"))),
            ..Default::default()
        };
        assert!(should_extract(&entry("plain.txt", 1), &options).is_accept());
        assert!(!should_extract(&entry("secret.txt", 1), &options).is_accept());
    }

    #[test]
    fn directories_skip_content_checks() {
        let options = ExtractOptions {
            allowed_extensions: Some(vec!["txt".into()]),
            ..Default::default()
        };
        assert!(should_extract(&entry("assets/", 0), &options).is_accept());
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("*.txt", "readme.txt"));
        assert!(glob_match("file?.dat", "file1.dat"));
        assert!(!glob_match("*.txt", "readme.md"));
        assert!(glob_match("src/*", "src/deep/file.rs"));
        assert!(has_glob_chars("*.rs"));
        assert!(!has_glob_chars("plain.rs"));
    }

    #[test]
    fn content_types_map() {
        assert_eq!(content_type_of("a.json"), "application/json");
        assert_eq!(content_type_of("a.unknown"), "application/octet-stream");
        assert_eq!(content_type_of("dir/photo.JPG"), "image/jpeg");
    }
}
