use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

// ESC followed by a single Fe byte, or a full CSI sequence.
const ANSI_ESCAPE_PATTERN: &str = r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])";

fn ansi_escape() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(ANSI_ESCAPE_PATTERN).expect("ANSI pattern is valid"))
}

/// Remove terminal escape sequences, leaving every other byte untouched.
pub fn strip_ansi_escape_codes(text: &str) -> Cow<'_, str> {
    if !text.contains('\x1B') {
        return Cow::Borrowed(text);
    }
    ansi_escape().replace_all(text, "")
}
