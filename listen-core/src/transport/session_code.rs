//! Session codes
//!
//! Short, human-friendly codes that name a session and can be read out loud.

use std::fmt;

/// Unambiguous uppercase alphabet.
/// Excludes: 0/O, 1/I/L, 5/S, 2/Z
const ALPHABET: &[u8] = b"346789ABCDEFGHJKMNPQRTUVWXY";

/// 8 characters over a 27-symbol alphabet
const CODE_LENGTH: usize = 8;

/// A code that identifies a session on the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionCode(String);

impl SessionCode {
    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();

        let code = (0..CODE_LENGTH)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        SessionCode(code)
    }

    /// Parse user input, ignoring case, spaces and dashes
    pub fn parse(input: &str) -> Option<Self> {
        let normalized: String = input
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        let valid = normalized.len() == CODE_LENGTH
            && normalized.bytes().all(|b| ALPHABET.contains(&b));
        valid.then_some(SessionCode(normalized))
    }

    /// Canonical form without separators
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (head, tail) = self.0.split_at(CODE_LENGTH / 2);
        write!(f, "{}-{}", head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes() {
        assert_eq!(SessionCode::parse("ABCD-EFGH").unwrap().as_str(), "ABCDEFGH");
        assert_eq!(SessionCode::parse(" abcd efgh ").unwrap().as_str(), "ABCDEFGH");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(SessionCode::parse("ABC").is_none());
        assert!(SessionCode::parse("ABCDEFGHJ").is_none());
        // O and 0 are not in the alphabet
        assert!(SessionCode::parse("ABCD-EFG0").is_none());
        assert!(SessionCode::parse("OOOOOOOO").is_none());
    }

    #[test]
    fn test_display_groups_in_fours() {
        let code = SessionCode::parse("3467ABCD").unwrap();
        assert_eq!(code.to_string(), "3467-ABCD");
    }

    #[test]
    fn test_random_codes_parse_back() {
        let code = SessionCode::random();
        assert_eq!(code.as_str().len(), CODE_LENGTH);
        assert_eq!(SessionCode::parse(&code.to_string()), Some(code));
    }
}
