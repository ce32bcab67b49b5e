//! HTML entity unescaping for free-text feed fields.

use std::borrow::Cow;

use quick_xml::escape::resolve_html5_entity;

// Longest named entity is 31 characters; longer bodies are never references
const MAX_REFERENCE_BODY: usize = 32;

/// Decode HTML character references until none are left.
///
/// Named references (`&amp;`, `&eacute;`), decimal (`&#8217;`) and hexadecimal
/// (`&#x2019;`) references are decoded. Unknown names, missing semicolons and
/// other malformed sequences are kept verbatim. Nested input such as `&amp;lt;`
/// decodes all the way to `<`, so applying the function to its own output
/// changes nothing.
///
/// Returns the input unchanged, without allocating, when it holds no reference.
pub fn unescape_entities(input: &str) -> Cow<'_, str> {
    let Some(mut current) = decode_pass(input) else {
        return Cow::Borrowed(input);
    };

    // Each pass either shortens the text or removes an ampersand
    while let Some(next) = decode_pass(&current) {
        current = next;
    }

    Cow::Owned(current)
}

/// One left-to-right decoding pass; `None` when nothing was decoded
fn decode_pass(input: &str) -> Option<String> {
    let first = input.find('&')?;

    let mut out = String::with_capacity(input.len());
    out.push_str(&input[..first]);

    let mut rest = &input[first..];
    let mut changed = false;

    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        match decode_reference(rest) {
            Some((decoded, consumed)) => {
                out.push_str(&decoded);
                rest = &rest[consumed..];
                changed = true;
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);

    changed.then_some(out)
}

/// Decode the reference at the start of `s` (which begins with `&`).
/// Returns the replacement text and the number of bytes consumed.
fn decode_reference(s: &str) -> Option<(Cow<'static, str>, usize)> {
    let body_len = s[1..]
        .bytes()
        .take(MAX_REFERENCE_BODY + 1)
        .position(|b| b == b';')?;
    let body = &s[1..1 + body_len];
    let consumed = body_len + 2;

    if let Some(number) = body.strip_prefix('#') {
        let decoded = decode_numeric(number)?;
        return Some((Cow::Owned(decoded.to_string()), consumed));
    }

    if body.is_empty() || !body.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    resolve_html5_entity(body).map(|text| (Cow::Borrowed(text), consumed))
}

fn decode_numeric(number: &str) -> Option<char> {
    let (digits, radix) = match number.strip_prefix(['x', 'X']) {
        Some(hex) => (hex, 16),
        None => (number, 10),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }

    // Out-of-range, NUL and surrogate code points become U+FFFD
    let decoded = u32::from_str_radix(digits, radix)
        .ok()
        .filter(|&code| code != 0)
        .and_then(char::from_u32)
        .unwrap_or(char::REPLACEMENT_CHARACTER);
    Some(decoded)
}
