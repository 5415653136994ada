use regex::Regex;
use std::sync::LazyLock;

static RELEASED_IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:released|launched|published)\b[^.]{0,80}?\b((?:19|20)\d{2})\b").unwrap()
});

/// First year mentioned alongside a release verb in the same sentence.
pub fn find_release_year(text: &str) -> Option<String> {
    RELEASED_IN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
