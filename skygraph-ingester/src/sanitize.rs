/// Unicode bidirectional override controls are stripped before storage, as
/// are null bytes, which Postgres TEXT columns reject.
fn is_stripped(c: char) -> bool {
    matches!(c, '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}' | '\0')
}

pub fn clean_text(s: &str) -> String {
    s.chars().filter(|c| !is_stripped(*c)).collect()
}

pub fn clean_opt(s: Option<&str>) -> Option<String> {
    s.map(clean_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bidi_overrides() {
        assert_eq!(clean_text("hi\u{202E}there"), "hithere");
        assert_eq!(clean_text("a\u{2066}b\u{2069}c"), "abc");
        assert_eq!(clean_text("\u{202A}\u{202B}\u{202C}\u{202D}"), "");
    }

    #[test]
    fn strips_null_bytes() {
        assert_eq!(clean_text("a\0b"), "ab");
    }

    #[test]
    fn leaves_ordinary_text_alone() {
        let text = "déjà vu \u{1F980} عربى";
        assert_eq!(clean_text(text), text);
        assert_eq!(clean_opt(Some("x")), Some("x".to_owned()));
        assert_eq!(clean_opt(None), None);
    }
}
