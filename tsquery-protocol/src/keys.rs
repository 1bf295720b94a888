//! Key naming transform between wire keys and camel-case keys.
//!
//! Wire keys are lower case with underscores (`client_nickname`). Rows
//! handed to callers use camel case (`clientNickname`).

/// Converts a wire key to camel case.
///
/// An underscore is dropped and upper-cases the character that follows it.
pub fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for c in key.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Converts a camel-case key back to its wire form.
///
/// Already snake-cased keys pass through unchanged.
pub fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_uppercase() {
            out.push('_');
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
