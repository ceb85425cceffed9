//! Scrubbing of secrets from text that ends up in logs or on disk.

/// Upper bound on upstream response text kept for diagnostics.
pub const SNIPPET_LIMIT: usize = 500;

/// Replace every literal occurrence of each secret with `***`.
///
/// Blank secrets are skipped.
pub fn redact<S: AsRef<str>>(text: &str, secrets: &[S]) -> String {
    let mut out = text.to_string();
    for secret in secrets {
        let secret = secret.as_ref().trim();
        if secret.is_empty() {
            continue;
        }
        out = out.replace(secret, "***");
    }
    out
}

/// Cap text at `limit` characters on a char boundary.
pub fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Redact then cap an upstream body for logging or persisting.
pub fn snippet<S: AsRef<str>>(text: &str, secrets: &[S]) -> String {
    truncate(&redact(text, secrets), SNIPPET_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_every_occurrence() {
        let out = redact("key=abc123 again abc123", &["abc123", ""]);
        assert_eq!(out, "key=*** again ***");
    }

    #[test]
    fn snippet_is_capped() {
        let long = "x".repeat(SNIPPET_LIMIT + 20);
        let out = snippet::<&str>(&long, &[]);
        assert_eq!(out.len(), SNIPPET_LIMIT + 3);
        assert!(out.ends_with("..."));

        assert_eq!(truncate("héllo", 10), "héllo");
    }
}
