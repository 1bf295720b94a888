//! Token escaping.
//!
//! Every token written to the wire (command names, option keys, option
//! values, flags) is escaped so it contains no spaces, pipes or control
//! characters. Decoding reverses the same table.

/// Escapes a single token for the wire.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 4);
    for c in input.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            '|' => out.push_str("\\p"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x0b' => out.push_str("\\v"),
            '\x0c' => out.push_str("\\f"),
            ' ' => out.push_str("\\s"),
            c => out.push(c),
        }
    }
    out
}

/// Unescapes a token read from the wire.
///
/// Decodes left to right so `\\s` yields a literal backslash followed by
/// `s`. Unknown sequences and a trailing lone backslash are kept verbatim.
pub fn unescape(input: &str) -> String {
    if !input.contains('\\') {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('p') => out.push('|'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\x0b'),
            Some('f') => out.push('\x0c'),
            Some('s') => out.push(' '),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_escape_table() {
        assert_eq!(escape("a b"), "a\\sb");
        assert_eq!(escape("a|b"), "a\\pb");
        assert_eq!(escape("a/b"), "a\\/b");
        assert_eq!(escape("a\\b"), "a\\\\b");
        assert_eq!(escape("\n\r\t\x0b\x0c"), "\\n\\r\\t\\v\\f");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn test_escape_does_not_double_escape() {
        // A backslash followed by an `s` must not turn into an escaped space.
        assert_eq!(escape("\\s"), "\\\\s");
        assert_eq!(escape("\\ "), "\\\\\\s");
    }

    #[test]
    fn test_unescape_table() {
        assert_eq!(unescape("invalid\\sserverID"), "invalid serverID");
        assert_eq!(unescape("a\\pb"), "a|b");
        assert_eq!(unescape("http:\\/\\/host"), "http://host");
        assert_eq!(unescape("\\n\\r\\t\\v\\f"), "\n\r\t\x0b\x0c");
    }

    #[test]
    fn test_unescape_literal_backslash_before_s() {
        assert_eq!(unescape("\\\\s"), "\\s");
    }

    #[test]
    fn test_unescape_keeps_unknown_sequences() {
        assert_eq!(unescape("a\\xb"), "a\\xb");
        assert_eq!(unescape("trailing\\"), "trailing\\");
    }

    #[test]
    fn test_escaped_form_has_no_separators() {
        let escaped = escape("a b|c\nd");
        assert!(!escaped.contains(' '));
        assert!(!escaped.contains('|'));
        assert!(!escaped.contains('\n'));
    }

    proptest! {
        #[test]
        fn prop_escape_roundtrip(s in any::<String>()) {
            prop_assert_eq!(unescape(&escape(&s)), s);
        }

        #[test]
        fn prop_escape_roundtrip_special(s in "[ a-z\\\\/|\n\r\t\x0b\x0c]{0,64}") {
            prop_assert_eq!(unescape(&escape(&s)), s);
        }
    }
}
