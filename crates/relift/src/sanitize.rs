//! Helpers for sanitizing data before it enters log rows or span attributes.
//!
//! Invocation-log rows and traces are safe to share for debugging; these
//! functions ensure no credentials leak and no oversized payload bloats
//! the audit trail.

/// Truncates a serialized payload to `max_len` characters, marking the cut.
///
/// Used for invocation-log rows when full-payload logging is disabled.
pub fn truncate_payload(payload: &str, max_len: usize) -> String {
    if payload.len() <= max_len {
        return payload.to_string();
    }
    // Cut on a char boundary so multi-byte payloads stay valid UTF-8.
    let mut cut = max_len;
    while !payload.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…[truncated {} chars]", &payload[..cut], payload.len() - cut)
}

/// Strips userinfo/tokens from a provider endpoint URL.
///
/// - `https://token@publish.example.com/v1` → `https://****@publish.example.com/v1`
/// - `https://publish.example.com/v1` → unchanged
pub fn redact_endpoint(url: &str) -> String {
    if let Some(scheme_end) = url.find("://") {
        let after_scheme = &url[scheme_end + 3..];
        if let Some(at_pos) = after_scheme.find('@') {
            let scheme = &url[..scheme_end + 3];
            let after_at = &after_scheme[at_pos + 1..];
            return format!("{}****@{}", scheme, after_at);
        }
    }
    url.to_string()
}
