//! Display-name handling.
//!
//! Senders are frequently identified only by a display name that may carry
//! accents, emoji or a node-type suffix. These helpers turn such names into
//! stable identifiers and comparable forms.

use std::sync::LazyLock;

use {regex::Regex, unicode_normalization::UnicodeNormalization};

/// Fallback identifier for names that sanitize to nothing.
pub const UNKNOWN_ID: &str = "unknown";

static TYPE_SUFFIX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*\((Client|Repeater|Room Server|Room|Server)\)\s*$").ok()
});

/// ASCII identifier form of a display name.
///
/// Accents are decomposed and dropped, only ASCII alphanumerics and spaces
/// survive, whitespace runs become a single `_`, and the result is lowercase.
/// `"Café Node 🎈"` becomes `"cafe_node"`.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    let kept: String = name
        .nfkd()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect::<String>()
        .to_lowercase();
    let joined = kept.split_whitespace().collect::<Vec<_>>().join("_");
    if joined.is_empty() {
        UNKNOWN_ID.to_string()
    } else {
        joined
    }
}

/// Human-readable ASCII form of a display name, keeping punctuation.
#[must_use]
pub fn normalize_display_name(name: &str) -> String {
    let ascii: String = name.nfkd().filter(char::is_ascii).collect();
    let collapsed = ascii.split(' ').filter(|part| !part.is_empty()).collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim();
    if trimmed.is_empty() {
        "Unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Strip the registry's `" Contact"` decoration and a trailing node-type suffix.
#[must_use]
pub fn clean_contact_name(name: &str) -> String {
    let without_contact = strip_contact_suffix(name);
    match TYPE_SUFFIX.as_ref() {
        Some(re) => re.replace(&without_contact, "").trim().to_string(),
        None => without_contact,
    }
}

/// Strip only the `" Contact"` decoration.
#[must_use]
pub fn strip_contact_suffix(name: &str) -> String {
    name.replace(" Contact", "").trim().to_string()
}

/// Split channel text of the form `"Sender: message"`.
///
/// Text without the separator is attributed to `"Unknown"`.
#[must_use]
pub fn split_sender(text: &str) -> (String, String) {
    match text.split_once(": ") {
        Some((sender, message)) => (sender.to_string(), message.to_string()),
        None => ("Unknown".to_string(), text.to_string()),
    }
}

/// First `max_chars` characters of `text`.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("Café Node 🎈", "cafe_node")]
    #[case("Cafe Node", "cafe_node")]
    #[case("  Relay   North  ", "relay_north")]
    #[case("Hill-Top #2", "hilltop_2")]
    #[case("🎈🎈", "unknown")]
    #[case("", "unknown")]
    fn sanitizes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize_name(input), expected);
    }

    #[test]
    fn display_name_keeps_punctuation() {
        assert_eq!(normalize_display_name("Zoë's  Relay 📡"), "Zoe's Relay");
        assert_eq!(normalize_display_name("📡"), "Unknown");
    }

    #[rstest]
    #[case("Base Camp Contact", "Base Camp")]
    #[case("Base Camp (Repeater)", "Base Camp")]
    #[case("Lobby (room server) Contact", "Lobby")]
    #[case("Plain", "Plain")]
    fn cleans_contact_names(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(clean_contact_name(input), expected);
    }

    #[test]
    fn splits_sender_prefix() {
        assert_eq!(
            split_sender("Alice: hi: there"),
            ("Alice".to_string(), "hi: there".to_string())
        );
        assert_eq!(
            split_sender("no separator"),
            ("Unknown".to_string(), "no separator".to_string())
        );
    }
}
