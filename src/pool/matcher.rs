//! Vanity pattern matching.
//!
//! Runs once per attempt in the search hot loop, so checks compare only the
//! suffix bytes and never allocate.

use crate::pool::error::PatternError;
use solana_sdk::pubkey::Pubkey;
use std::fmt;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Longest base-58 rendering of a 32-byte key.
pub const MAX_ADDRESS_LEN: usize = 44;

/// Case-insensitive address suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VanityPattern {
    /// Lowercased suffix; empty matches everything
    suffix: String,
}

impl VanityPattern {
    /// Build a suffix pattern.
    ///
    /// Characters are accepted when either case exists in the base-58
    /// alphabet, since matching ignores case. An empty string is rejected
    /// here; use [`VanityPattern::any`] to opt out of filtering.
    pub fn suffix(pattern: &str) -> Result<Self, PatternError> {
        if pattern.len() > MAX_ADDRESS_LEN {
            return Err(PatternError::TooLong {
                pattern: pattern.to_string(),
            });
        }

        if let Some(ch) = pattern.chars().find(|ch| !is_base58_any_case(*ch)) {
            return Err(PatternError::InvalidCharacter {
                pattern: pattern.to_string(),
                ch,
            });
        }

        Ok(Self {
            suffix: pattern.to_ascii_lowercase(),
        })
    }

    /// Pattern that accepts every address.
    pub fn any() -> Self {
        Self {
            suffix: String::new(),
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.suffix.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.suffix
    }

    /// Does the rendered address end with the pattern (ignoring ASCII case)?
    pub fn matches(&self, address: &str) -> bool {
        ends_with_ignore_case(address.as_bytes(), self.suffix.as_bytes())
    }

    /// Same as [`matches`](Self::matches) for a raw key, encoding into a
    /// stack buffer.
    pub fn matches_address(&self, address: &Pubkey) -> bool {
        if self.suffix.is_empty() {
            return true;
        }

        let mut buffer = [0u8; MAX_ADDRESS_LEN];
        match bs58::encode(address.as_ref()).onto(&mut buffer[..]) {
            Ok(len) => ends_with_ignore_case(&buffer[..len], self.suffix.as_bytes()),
            Err(_) => false,
        }
    }
}

impl fmt::Display for VanityPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.suffix.is_empty() {
            f.write_str("*")
        } else {
            write!(f, "*{}", self.suffix)
        }
    }
}

fn is_base58_any_case(ch: char) -> bool {
    BASE58_ALPHABET.contains(ch.to_ascii_lowercase()) || BASE58_ALPHABET.contains(ch.to_ascii_uppercase())
}

fn ends_with_ignore_case(haystack: &[u8], suffix_lower: &[u8]) -> bool {
    if haystack.len() < suffix_lower.len() {
        return false;
    }
    haystack[haystack.len() - suffix_lower.len()..]
        .iter()
        .zip(suffix_lower)
        .all(|(a, b)| a.to_ascii_lowercase() == *b)
}
