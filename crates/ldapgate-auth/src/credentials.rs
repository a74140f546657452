//! HTTP Basic credential extraction

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::fmt;

const BASIC_PREFIX: &str = "Basic ";

/// Username and password taken from one request
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Parse an HTTP Basic `Authorization` header value.
///
/// `"Basic aGFja2Vyczpkb2dvb2Q="` yields `("hackers", "dogood")`. Only the
/// first `:` separates the username, so passwords may contain colons.
pub fn parse_basic_auth(value: &str) -> Option<Credentials> {
    let prefix = value.get(..BASIC_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(BASIC_PREFIX) {
        return None;
    }

    let decoded = BASE64.decode(&value[BASIC_PREFIX.len()..]).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;

    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(raw: &str) -> String {
        format!("Basic {}", BASE64.encode(raw))
    }

    #[test]
    fn test_parse_known_header() {
        let creds = parse_basic_auth("Basic aGFja2Vyczpkb2dvb2Q=").unwrap();
        assert_eq!(creds.username, "hackers");
        assert_eq!(creds.password, "dogood");
    }

    #[test]
    fn test_round_trip() {
        let pairs = [("alice", "s3cret"), ("bob", ""), ("", "nouser"), ("ünï", "cödé")];
        for (user, pass) in pairs {
            let creds = parse_basic_auth(&basic(&format!("{}:{}", user, pass))).unwrap();
            assert_eq!(creds.username, user);
            assert_eq!(creds.password, pass);
        }
    }

    #[test]
    fn test_splits_on_first_colon_only() {
        let creds = parse_basic_auth(&basic("a:b:c")).unwrap();
        assert_eq!(creds.username, "a");
        assert_eq!(creds.password, "b:c");
    }

    #[test]
    fn test_prefix_is_case_insensitive() {
        let header = format!("bAsIc {}", BASE64.encode("hackers:dogood"));
        assert!(parse_basic_auth(&header).is_some());
    }

    #[test]
    fn test_rejects_malformed_values() {
        assert!(parse_basic_auth("").is_none());
        assert!(parse_basic_auth("Basic").is_none());
        assert!(parse_basic_auth("Bearer aGFja2Vyczpkb2dvb2Q=").is_none());
        assert!(parse_basic_auth("Basic !!not-base64!!").is_none());
        assert!(parse_basic_auth(&basic("no-separator")).is_none());
        // unpadded input is not standard base64
        assert!(parse_basic_auth("Basic aGFja2Vyczpkb2dvb2Q").is_none());
    }

    #[test]
    fn test_rejects_multibyte_prefix_without_panicking() {
        assert!(parse_basic_auth("Bäsic xyz").is_none());
        assert!(parse_basic_auth("日本語のテキスト").is_none());
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = parse_basic_auth(&basic("hackers:dogood")).unwrap();
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("hackers"));
        assert!(!rendered.contains("dogood"));
    }
}
