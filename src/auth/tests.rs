use super::*;
use axum::http::{header::COOKIE, HeaderMap, HeaderValue};
use chrono::Duration;
use uuid::Uuid;

#[cfg(test)]
mod extract_bearer_token_tests {
    use super::*;

    #[test]
    fn valid_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer 3f2c9a".parse().unwrap());

        assert_eq!(extract_bearer_token(&headers), Ok("3f2c9a".to_string()));
    }

    #[test]
    fn valid_bearer_token_with_extra_whitespace() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer   3f2c9a  ".parse().unwrap());

        assert_eq!(extract_bearer_token(&headers), Ok("3f2c9a".to_string()));
    }

    #[test]
    fn case_insensitive_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "bearer 3f2c9a".parse().unwrap());

        assert_eq!(extract_bearer_token(&headers), Ok("3f2c9a".to_string()));
    }

    #[test]
    fn missing_authorization_header() {
        let headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), Err(TokenError::Missing));
    }

    #[test]
    fn wrong_auth_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic dXNlcjpwYXNz".parse().unwrap());

        assert_eq!(extract_bearer_token(&headers), Err(TokenError::InvalidFormat));
    }

    #[test]
    fn bearer_without_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer".parse().unwrap());

        assert_eq!(extract_bearer_token(&headers), Err(TokenError::InvalidFormat));
    }

    #[test]
    fn bearer_with_empty_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer  ".parse().unwrap());

        assert_eq!(extract_bearer_token(&headers), Err(TokenError::Empty));
    }
}

#[cfg(test)]
mod session_token_tests {
    use super::*;

    fn issuer() -> SessionIssuer {
        SessionIssuer::new(SessionConfig::new("test-secret"))
    }

    #[test]
    fn issue_then_validate_returns_claims() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();

        let token = issuer.issue(user_id, "spotify-123").unwrap();
        let claims = issuer.validate(&token).unwrap();

        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.spotify_user_id, "spotify-123");
        assert_eq!(claims.exp - claims.iat, Duration::days(7).num_seconds());
        assert_eq!(claims.nbf, claims.iat);
    }

    #[test]
    fn negative_duration_is_expired() {
        let issuer = SessionIssuer::new(
            SessionConfig::new("test-secret").with_duration(Duration::hours(-1)),
        );
        let token = issuer.issue(Uuid::new_v4(), "spotify-123").unwrap();

        assert_eq!(issuer.validate(&token), Err(SessionError::Expired));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = issuer().issue(Uuid::new_v4(), "spotify-123").unwrap();
        let other = SessionIssuer::new(SessionConfig::new("another-secret"));

        assert_eq!(other.validate(&token), Err(SessionError::Invalid));
    }

    #[test]
    fn expired_token_signed_with_wrong_secret_is_invalid() {
        let expired = SessionIssuer::new(
            SessionConfig::new("test-secret").with_duration(Duration::hours(-1)),
        )
        .issue(Uuid::new_v4(), "spotify-123")
        .unwrap();
        let other = SessionIssuer::new(SessionConfig::new("another-secret"));

        assert_eq!(other.validate(&expired), Err(SessionError::Invalid));
    }

    #[test]
    fn garbage_is_invalid() {
        assert_eq!(issuer().validate("not-a-jwt"), Err(SessionError::Invalid));
        assert_eq!(issuer().validate(""), Err(SessionError::Invalid));
    }

    #[test]
    fn default_secret_is_detectable() {
        assert!(SessionConfig::new(session::DEFAULT_JWT_SECRET).uses_default_secret());
        assert!(!SessionConfig::new("real").uses_default_secret());
    }

    #[test]
    fn debug_output_redacts_secret() {
        let rendered = format!("{:?}", SessionConfig::new("super-secret-value"));
        assert!(!rendered.contains("super-secret-value"));
    }
}

#[cfg(test)]
mod cookie_tests {
    use super::*;

    #[test]
    fn session_cookie_attributes() {
        let issuer = SessionIssuer::new(SessionConfig::new("s"));
        let cookie = issuer.session_cookie("abc");

        assert!(cookie.starts_with("session_token=abc;"));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=604800"));
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn secure_flag_in_production() {
        let mut config = SessionConfig::new("s");
        config.secure_cookie = true;
        let issuer = SessionIssuer::new(config);

        assert!(issuer.session_cookie("abc").ends_with("; Secure"));
        assert!(issuer.clear_cookie().ends_with("; Secure"));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let issuer = SessionIssuer::new(SessionConfig::new("s"));
        let cookie = issuer.clear_cookie();

        assert!(cookie.starts_with("session_token=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[test]
    fn read_cookie_among_others() {
        let issuer = SessionIssuer::new(SessionConfig::new("s"));
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; session_token=tok123; lang=ja"),
        );

        assert_eq!(issuer.read_cookie(&headers), Ok("tok123".to_string()));
    }

    #[test]
    fn read_cookie_missing_or_empty() {
        let issuer = SessionIssuer::new(SessionConfig::new("s"));
        let mut headers = HeaderMap::new();
        assert_eq!(issuer.read_cookie(&headers), Err(SessionError::Missing));

        headers.insert(COOKIE, HeaderValue::from_static("session_token="));
        assert_eq!(issuer.read_cookie(&headers), Err(SessionError::Missing));

        headers.insert(COOKIE, HeaderValue::from_static("other_session_token=x"));
        assert_eq!(issuer.read_cookie(&headers), Err(SessionError::Missing));
    }
}
