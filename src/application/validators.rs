/// Validates a Stripe subscription id as received from an admin request.
/// Rules:
/// - `sub_` prefix followed by 1-255 characters
/// - Only ASCII letters, numbers and underscores
pub fn is_valid_subscription_id(id: &str) -> bool {
    let Some(rest) = id.strip_prefix("sub_") else {
        return false;
    };
    !rest.is_empty()
        && rest.len() <= 255
        && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Compare two secrets without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
