//! Small helpers shared across the engine.

/// Marker appended to model output that was cut at a meeting's
/// `max_message_length`.
pub const TRUNCATION_MARKER: &str = " …[truncated]";

/// Cap `s` at `max_chars` characters, appending [`TRUNCATION_MARKER`] when
/// anything was cut. Returns the input unchanged when it fits.
///
/// Character-based (not byte-based) so multi-byte content never splits a
/// UTF-8 boundary.
pub fn enforce_max_length(s: &str, max_chars: usize) -> String {
    // Cheap filter: byte length bounds char count from above.
    if s.len() <= max_chars {
        return s.to_string();
    }
    if s.chars().count() <= max_chars {
        return s.to_string();
    }

    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Truncates a string to at most `max_chars` characters, adding "..." if
/// truncated. Used for log lines and DOT node labels.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.len() <= max_chars {
        return s.to_string();
    }
    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s.to_string();
    }
    if max_chars <= 3 {
        return s.chars().take(max_chars).collect();
    }
    let truncated: String = s.chars().take(max_chars - 3).collect();
    format!("{}...", truncated)
}
