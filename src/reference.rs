use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::ReferenceError;

const PREFIX: &str = "sha256:";
const DIGEST_LEN: usize = 32;
// base64 of 32 bytes: 43 characters unpadded, 44 with one `=`
const RAW_LEN: usize = 43;
const PADDED_LEN: usize = 44;

/// Content address of a file kept in the service's reference store:
/// `sha256:` followed by the unpadded URL-safe base64 of the SHA-256 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceId([u8; DIGEST_LEN]);

impl ReferenceId {
    /// Hashes file contents into the id the service stores them under.
    pub fn of(contents: &[u8]) -> Self {
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&Sha256::digest(contents));
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PREFIX, general_purpose::URL_SAFE_NO_PAD.encode(self.0))
    }
}

/// Accepts the URL-safe and the standard alphabet, padded or not, the same
/// inputs the service accepts in a `ref=use` part.
impl FromStr for ReferenceId {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let n = s.len();
        if n != PREFIX.len() + RAW_LEN && n != PREFIX.len() + PADDED_LEN {
            return Err(ReferenceError::Length(n));
        }
        let encoded = s.strip_prefix(PREFIX).ok_or(ReferenceError::MissingPrefix)?;
        let encoded = match encoded.len() {
            PADDED_LEN => encoded.strip_suffix('=').ok_or(ReferenceError::Padding)?,
            _ => encoded,
        };

        let decoded = if encoded.contains(['+', '/']) {
            general_purpose::STANDARD_NO_PAD.decode(encoded)
        } else {
            general_purpose::URL_SAFE_NO_PAD.decode(encoded)
        }?;
        let digest: [u8; DIGEST_LEN] = decoded
            .try_into()
            .map_err(|v: Vec<u8>| ReferenceError::DigestLength(v.len()))?;
        Ok(Self(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha256("") in both base64 alphabets
    const EMPTY_URL: &str = "sha256:47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU";
    const EMPTY_STD_PADDED: &str = "sha256:47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=";

    #[test]
    fn test_id_of_contents() {
        let id = ReferenceId::of(b"");
        assert_eq!(id.to_string(), EMPTY_URL);
        assert_ne!(ReferenceId::of(b"a"), id);
    }

    #[test]
    fn test_parse_accepts_both_alphabets() {
        let id = ReferenceId::of(b"");
        assert_eq!(EMPTY_URL.parse::<ReferenceId>().unwrap(), id);
        assert_eq!(EMPTY_STD_PADDED.parse::<ReferenceId>().unwrap(), id);
        assert_eq!(format!("{}=", EMPTY_URL).parse::<ReferenceId>().unwrap(), id);
        assert_eq!(format!(" {}\n", EMPTY_URL).parse::<ReferenceId>().unwrap(), id);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            "sha256:abc".parse::<ReferenceId>(),
            Err(ReferenceError::Length(10))
        ));
        let wrong_prefix = EMPTY_URL.replacen("sha256:", "sha512:", 1);
        assert!(matches!(
            wrong_prefix.parse::<ReferenceId>(),
            Err(ReferenceError::MissingPrefix)
        ));
        let no_padding = format!("{}x", EMPTY_URL);
        assert!(matches!(
            no_padding.parse::<ReferenceId>(),
            Err(ReferenceError::Padding)
        ));
        let bad_char = EMPTY_URL.replacen('4', "*", 1);
        assert!(matches!(
            bad_char.parse::<ReferenceId>(),
            Err(ReferenceError::Decode(_))
        ));
    }
}
