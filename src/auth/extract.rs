use axum::http::HeaderMap;

/// Pull the bearer credential from the `Authorization` header.
///
/// Accepts exactly `Bearer <token>`: case-sensitive scheme, a single space,
/// and a non-empty token after trimming. Anything else is treated as absent;
/// no other headers are consulted.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    let token = token.trim();
    if token.is_empty() || token.contains(' ') {
        return None;
    }
    Some(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn extracts_well_formed_token() {
        assert_eq!(
            bearer_token(&headers_with("Bearer abc.def.ghi")),
            Some("abc.def.ghi".to_string())
        );
    }

    #[test]
    fn missing_header_is_absent() {
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn scheme_is_case_sensitive() {
        assert_eq!(bearer_token(&headers_with("bearer abc")), None);
        assert_eq!(bearer_token(&headers_with("BEARER abc")), None);
        assert_eq!(bearer_token(&headers_with("Basic abc")), None);
    }

    #[test]
    fn empty_or_whitespace_token_is_absent() {
        assert_eq!(bearer_token(&headers_with("Bearer ")), None);
        assert_eq!(bearer_token(&headers_with("Bearer   ")), None);
        assert_eq!(bearer_token(&headers_with("Bearer")), None);
    }

    #[test]
    fn token_with_embedded_space_is_absent() {
        assert_eq!(bearer_token(&headers_with("Bearer a b")), None);
    }
}
