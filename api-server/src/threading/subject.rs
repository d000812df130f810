//! Subject normalization used by the subject fallback of the thread assembler.

/// Reply and forward markers stripped from the front of a subject.
const REPLY_PREFIXES: &[&str] = &["re:", "fwd:", "fw:", "aw:", "sv:", "antw:"];

/// Normalize an email subject for thread matching.
///
/// Lowercases, repeatedly strips reply/forward prefixes and leading bracketed tags
/// (`[ext]`, `[ticket 42]`), then collapses whitespace.
///
/// ```text
/// "Re: [ext] Invoice   #42"  ->  "invoice #42"
/// "FWD: re: Lunch?"         ->  "lunch?"
/// ```
pub fn normalize_subject(subject: &str) -> String {
    let mut normalized = subject.trim().to_lowercase();

    // Keep removing prefixes until none match
    loop {
        let before = normalized.clone();

        for prefix in REPLY_PREFIXES {
            if let Some(rest) = normalized.strip_prefix(prefix) {
                normalized = rest.trim_start().to_string();
            }
        }

        if normalized.starts_with('[') {
            if let Some(end_bracket) = normalized.find(']') {
                normalized = normalized[end_bracket + 1..].trim_start().to_string();
            }
        }

        if before == normalized {
            break;
        }
    }

    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}
