use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Decode an `Authorization: Basic` header value into
/// `(client_id, client_secret)`.
///
/// Returns `None` for anything that is not a well-formed Basic credential
/// (wrong scheme, bad base64, no colon separator). An empty secret after the
/// colon maps to `None` so public clients can authenticate by id alone.
pub fn parse_basic_auth(header: &str) -> Option<(String, Option<String>)> {
    let encoded = header.strip_prefix("Basic ")?.trim();
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;

    let (id, secret) = decoded.split_once(':')?;
    if id.is_empty() {
        return None;
    }

    let secret = if secret.is_empty() {
        None
    } else {
        Some(secret.to_string())
    };

    Some((id.to_string(), secret))
}

/// Encode client credentials for a Basic authorization header.
pub fn basic_auth_header(client_id: &str, client_secret: &str) -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", client_id, client_secret))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_credentials() {
        let header = basic_auth_header("client-1", "s3cret");
        assert_eq!(
            parse_basic_auth(&header),
            Some(("client-1".to_string(), Some("s3cret".to_string())))
        );
    }

    #[test]
    fn empty_secret_means_public_client() {
        let header = format!("Basic {}", STANDARD.encode("client-1:"));
        assert_eq!(parse_basic_auth(&header), Some(("client-1".to_string(), None)));
    }

    #[test]
    fn rejects_malformed_headers() {
        assert_eq!(parse_basic_auth("Bearer abc"), None);
        assert_eq!(parse_basic_auth("Basic !!!"), None);
        let no_colon = format!("Basic {}", STANDARD.encode("no-separator"));
        assert_eq!(parse_basic_auth(&no_colon), None);
        let no_id = format!("Basic {}", STANDARD.encode(":secret"));
        assert_eq!(parse_basic_auth(&no_id), None);
    }

    #[test]
    fn secret_may_contain_colons() {
        let header = format!("Basic {}", STANDARD.encode("id:se:cr:et"));
        assert_eq!(
            parse_basic_auth(&header),
            Some(("id".to_string(), Some("se:cr:et".to_string())))
        );
    }
}
