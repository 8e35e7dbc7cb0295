use http::HeaderValue;

/// credentials attached to a request. `Auth` set explicitly always wins over
/// netrc entries and a manually written `Authorization` header.
#[derive(Debug, Clone)]
pub enum Auth {
    Basic {
        username: String,
        password: Option<String>,
    },
    Bearer(String),
}

impl Auth {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: Some(password.into()),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer(token.into())
    }

    pub(crate) fn header_value(&self) -> HeaderValue {
        let rendered = match self {
            Self::Basic { username, password } => basic_auth_str(username, password.as_deref()),
            Self::Bearer(token) => format!("Bearer {token}"),
        };
        let mut value = HeaderValue::from_str(&rendered)
            .unwrap_or_else(|_| HeaderValue::from_static("Basic"));
        value.set_sensitive(true);
        value
    }
}

pub(crate) fn basic_auth_str(username: &str, password: Option<&str>) -> String {
    let raw = format!("{username}:{}", password.unwrap_or(""));
    format!("Basic {}", base64(raw.as_bytes()))
}

// rfc 4648 standard alphabet with padding. the corpus has no base64 crate to
// lean on and the encoder is ten lines.
fn base64(input: &[u8]) -> String {
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    let mut out = String::with_capacity(input.len().div_ceil(3) * 4);
    for chunk in input.chunks(3) {
        let b = [chunk[0], *chunk.get(1).unwrap_or(&0), *chunk.get(2).unwrap_or(&0)];
        let n = u32::from_be_bytes([0, b[0], b[1], b[2]]);

        out.push(ALPHABET[(n >> 18) as usize & 0x3f] as char);
        out.push(ALPHABET[(n >> 12) as usize & 0x3f] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(n >> 6) as usize & 0x3f] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[n as usize & 0x3f] as char
        } else {
            '='
        });
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn base64_vectors() {
        assert_eq!(base64(b""), "");
        assert_eq!(base64(b"f"), "Zg==");
        assert_eq!(base64(b"fo"), "Zm8=");
        assert_eq!(base64(b"foo"), "Zm9v");
        assert_eq!(base64(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn basic_auth_rendering() {
        assert_eq!(
            basic_auth_str("user", Some("pass")),
            "Basic dXNlcjpwYXNz"
        );
        assert_eq!(basic_auth_str("user", None), "Basic dXNlcjo=");
    }

    #[test]
    fn header_is_sensitive() {
        let value = Auth::basic("u", "p").header_value();
        assert!(value.is_sensitive());
    }
}
