/// Normalizes a name-like string into its canonical form.
///
/// Names beginning with an ASCII digit are prefixed with `digit_`, and every character outside of `[A-Za-z0-9_.]` is
/// replaced with an underscore. Applied uniformly to metric names, tag keys, and tag values, so that everything
/// reaching the backend shares one charset.
///
/// Idempotent: sanitizing an already-sanitized string returns it unchanged.
pub fn sanitize(raw: &str) -> String {
    let mut sanitized = String::with_capacity(raw.len() + 6);

    if raw.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.push_str("digit_");
    }

    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            sanitized.push(c);
        } else {
            sanitized.push('_');
        }
    }

    sanitized
}
