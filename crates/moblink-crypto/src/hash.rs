//! SHA-256 hashing and the challenge/response token.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

/// SHA-256 hash output (32 bytes).
pub type HashOutput = [u8; crate::SHA256_OUTPUT_SIZE];

/// Compute SHA-256 of input data.
#[must_use]
pub fn sha256(data: &[u8]) -> HashOutput {
    let mut output = [0u8; crate::SHA256_OUTPUT_SIZE];
    output.copy_from_slice(&Sha256::digest(data));
    output
}

/// Encode bytes as standard padded base64 without line breaks.
#[must_use]
pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Compute the authentication token sent in `identify`.
///
/// Pure function of its three inputs. Strings are hashed as their UTF-8 bytes.
///
/// # Example
///
/// ```
/// let token = moblink_crypto::auth_token("p", "s", "c");
/// assert_eq!(token, "LEfh2WVBWpa8M06P7MehLXlToA1PtH2lNSNPjUZVYls=");
/// ```
#[must_use]
pub fn auth_token(password: &str, salt: &str, challenge: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    let first = base64_encode(&hasher.finalize());

    let mut hasher = Sha256::new();
    hasher.update(first.as_bytes());
    hasher.update(challenge.as_bytes());
    base64_encode(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sha256_empty() {
        assert_eq!(
            base64_encode(&sha256(b"")),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn test_auth_token_golden() {
        assert_eq!(
            auth_token("p", "s", "c"),
            "LEfh2WVBWpa8M06P7MehLXlToA1PtH2lNSNPjUZVYls="
        );
        assert_eq!(
            auth_token("1234", "abc", "xyz"),
            "GWePhlEmNc6SlVYJw6vkHiolQFZDHgwhVX4uw3WQ6oQ="
        );
    }

    #[test]
    fn test_auth_token_matches_two_step_construction() {
        let first = base64_encode(&sha256(b"ps"));
        assert_eq!(first, "ZSfJNhovRpxSda/LXQblMBM2fNIxmV3hPcchhxE4g4I=");
        let second = base64_encode(&sha256(format!("{first}c").as_bytes()));
        assert_eq!(auth_token("p", "s", "c"), second);
    }

    #[test]
    fn test_auth_token_depends_on_every_input() {
        let base = auth_token("p", "s", "c");
        assert_ne!(base, auth_token("q", "s", "c"));
        assert_ne!(base, auth_token("p", "t", "c"));
        assert_ne!(base, auth_token("p", "s", "d"));
    }

    proptest! {
        #[test]
        fn auth_token_is_deterministic(
            password in ".{0,32}",
            salt in "[a-zA-Z0-9]{0,32}",
            challenge in "[a-zA-Z0-9]{0,32}",
        ) {
            let a = auth_token(&password, &salt, &challenge);
            let b = auth_token(&password, &salt, &challenge);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.len(), 44);
        }
    }
}
