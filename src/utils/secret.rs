use rand::Rng;

/// Character set for generated identifiers and secrets (URL-safe base64
/// alphabet, so values travel in query strings and fragments unescaped).
const TOKEN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Length of generated identifiers (~192 bits of entropy).
pub const ID_LENGTH: usize = 32;

/// Length of generated secrets, codes, and tokens (~256 bits of entropy).
pub const SECRET_LENGTH: usize = 43;

/// Generate an opaque identifier.
pub fn random_id() -> String {
    random_with_length(ID_LENGTH)
}

/// Generate an opaque secret suitable for use as a client secret,
/// authorization code, or bearer token.
pub fn random_secret() -> String {
    random_with_length(SECRET_LENGTH)
}

pub fn random_with_length(length: usize) -> String {
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..TOKEN_CHARSET.len());
            TOKEN_CHARSET[idx] as char
        })
        .collect()
}

/// Constant-time string comparison to prevent timing attacks.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_secret_has_expected_length() {
        assert_eq!(random_secret().len(), SECRET_LENGTH);
        assert_eq!(random_id().len(), ID_LENGTH);
    }

    #[test]
    fn random_secret_is_url_safe() {
        let secret = random_secret();
        for c in secret.chars() {
            assert!(
                c.is_ascii_alphanumeric() || c == '-' || c == '_',
                "secret contains invalid character: {}",
                c
            );
        }
    }

    #[test]
    fn random_secret_uniqueness() {
        assert_ne!(random_secret(), random_secret());
        assert_ne!(random_id(), random_id());
    }

    #[test]
    fn constant_time_compare_equal() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(constant_time_compare("", ""));
    }

    #[test]
    fn constant_time_compare_not_equal() {
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("hello", "hello!"));
        assert!(!constant_time_compare("hello", "hell"));
    }
}
