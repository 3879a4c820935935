//! Session cookie generation and on-wire encoding.

use crate::defaults::COOKIE_SIZE;
use rand::Rng;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const COOKIE_CHARS: usize = 36;

/// A 36-character ASCII session identifier, always 37 bytes on the wire
/// (the 37th byte is a NUL terminator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie(String);

impl SessionCookie {
    /// Generate a fresh random alphanumeric cookie.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let s: String = (0..COOKIE_CHARS)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        SessionCookie(s)
    }

    /// Wrap an existing string as a cookie, truncating to 36 chars if
    /// longer (matching the write-side pad/truncate rule).
    pub fn from_str_truncated(s: &str) -> Self {
        let truncated: String = s.chars().take(COOKIE_CHARS).collect();
        SessionCookie(truncated)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encode as the fixed 37-byte wire representation: up to 36 ASCII
    /// bytes, NUL-padded.
    pub fn to_wire_bytes(&self) -> [u8; COOKIE_SIZE] {
        let mut buf = [0u8; COOKIE_SIZE];
        let bytes = self.0.as_bytes();
        let len = bytes.len().min(COOKIE_CHARS);
        buf[..len].copy_from_slice(&bytes[..len]);
        buf
    }

    /// Decode the fixed 37-byte wire representation, stripping trailing
    /// NULs.
    pub fn from_wire_bytes(buf: &[u8; COOKIE_SIZE]) -> Self {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        let s = String::from_utf8_lossy(&buf[..end]).into_owned();
        SessionCookie(s)
    }
}

impl std::fmt::Display for SessionCookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_cookie_is_36_chars() {
        let cookie = SessionCookie::generate();
        assert_eq!(cookie.as_str().len(), COOKIE_CHARS);
    }

    #[test]
    fn wire_round_trip_preserves_short_cookie() {
        let cookie = SessionCookie::from_str_truncated("abc123");
        let wire = cookie.to_wire_bytes();
        assert_eq!(wire.len(), COOKIE_SIZE);
        let back = SessionCookie::from_wire_bytes(&wire);
        assert_eq!(back, cookie);
    }

    #[test]
    fn wire_round_trip_preserves_full_length_cookie() {
        let cookie = SessionCookie::generate();
        let wire = cookie.to_wire_bytes();
        let back = SessionCookie::from_wire_bytes(&wire);
        assert_eq!(back, cookie);
    }

    #[test]
    fn overlong_input_is_truncated_to_36() {
        let long = "a".repeat(100);
        let cookie = SessionCookie::from_str_truncated(&long);
        assert_eq!(cookie.as_str().len(), COOKIE_CHARS);
    }

    #[test]
    fn wire_bytes_are_nul_terminated() {
        let cookie = SessionCookie::from_str_truncated("x");
        let wire = cookie.to_wire_bytes();
        assert_eq!(wire[1], 0);
        assert_eq!(wire[COOKIE_SIZE - 1], 0);
    }
}
