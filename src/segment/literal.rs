//! Evaluation of Python string literals used as docstrings

/// Evaluate the source text of a Python string literal.
///
/// Returns `None` for anything that is not a plain constant string
/// (f-strings, byte strings, malformed quoting), leaving the caller to fall
/// back to the raw text.
pub fn unescape_literal(raw: &str) -> Option<String> {
    let quote_at = raw.find(['"', '\''])?;
    let prefix = raw[..quote_at].to_ascii_lowercase();
    if prefix.chars().any(|c| !matches!(c, 'r' | 'u' | 'b' | 'f')) {
        return None;
    }
    if prefix.contains('f') || prefix.contains('b') {
        return None;
    }
    let is_raw = prefix.contains('r');

    let rest = &raw[quote_at..];
    let quote_char = rest.chars().next()?;
    let triple: String = std::iter::repeat(quote_char).take(3).collect();
    let delim = if rest.len() >= 6 && rest.starts_with(&triple) && rest.ends_with(&triple) {
        3
    } else {
        1
    };
    if rest.len() < delim * 2 || !rest.ends_with(quote_char) {
        return None;
    }
    let body = &rest[delim..rest.len() - delim];

    if is_raw {
        return Some(body.to_string());
    }
    Some(unescape_body(body))
}

/// Evaluate implicitly concatenated literals (`"a" "b"`).
pub fn unescape_concatenated<'a>(parts: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut out = String::new();
    for part in parts {
        out.push_str(&unescape_literal(part)?);
    }
    Some(out)
}

fn unescape_body(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0C}'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\u{0B}'),
            '0'..='7' => {
                let mut value = next.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                push_code_point(&mut out, value, || format!("\\{next}"));
            }
            'x' => push_hex(&mut out, &mut chars, 'x', 2),
            'u' => push_hex(&mut out, &mut chars, 'u', 4),
            'U' => push_hex(&mut out, &mut chars, 'U', 8),
            other => {
                // Unknown escapes are kept verbatim
                out.push('\\');
                out.push(other);
            }
        }
    }

    out
}

fn push_hex(
    out: &mut String,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    marker: char,
    width: usize,
) {
    let mut digits = String::with_capacity(width);
    while digits.len() < width {
        match chars.peek() {
            Some(d) if d.is_ascii_hexdigit() => {
                digits.push(*d);
                chars.next();
            }
            _ => break,
        }
    }
    if digits.len() != width {
        out.push('\\');
        out.push(marker);
        out.push_str(&digits);
        return;
    }
    let value = u32::from_str_radix(&digits, 16).unwrap_or(u32::MAX);
    push_code_point(out, value, || format!("\\{marker}{digits}"));
}

fn push_code_point(out: &mut String, value: u32, verbatim: impl FnOnce() -> String) {
    match char::from_u32(value) {
        Some(ch) => out.push(ch),
        None => out.push_str(&verbatim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triple_quoted() {
        assert_eq!(
            unescape_literal(r#""""Return the sum.""""#).as_deref(),
            Some("Return the sum.")
        );
        assert_eq!(
            unescape_literal("'''multi\nline'''").as_deref(),
            Some("multi\nline")
        );
    }

    #[test]
    fn test_escapes() {
        assert_eq!(
            unescape_literal(r#""tab\there\n""#).as_deref(),
            Some("tab\there\n")
        );
        assert_eq!(unescape_literal(r#""\x41é\101""#).as_deref(), Some("AéA"));
        assert_eq!(unescape_literal(r#""keep \d""#).as_deref(), Some("keep \\d"));
        assert_eq!(unescape_literal("\"a\\\nb\"").as_deref(), Some("ab"));
    }

    #[test]
    fn test_raw_and_prefixes() {
        assert_eq!(unescape_literal(r#"r"\n stays""#).as_deref(), Some("\\n stays"));
        assert_eq!(unescape_literal(r#"u"plain""#).as_deref(), Some("plain"));
        assert_eq!(unescape_literal(r#"f"{name}""#), None);
        assert_eq!(unescape_literal(r#"b"bytes""#), None);
        assert_eq!(unescape_literal("\"\"\"\"\"\"").as_deref(), Some(""));
        assert_eq!(unescape_literal(r#""""#).as_deref(), Some(""));
    }

    #[test]
    fn test_concatenated() {
        assert_eq!(
            unescape_concatenated([r#""one ""#, r#"'two'"#]).as_deref(),
            Some("one two")
        );
        assert_eq!(unescape_concatenated([r#""ok""#, r#"f"{x}""#]), None);
    }
}
