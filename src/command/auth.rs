//! Pre-shared secret handling

use anyhow::{anyhow, Result};
use std::fmt;
use subtle::{Choice, ConstantTimeEq};

/// The device's pre-shared secret.
///
/// Never printed: `Debug` and `Display` are redacted.
#[derive(Clone)]
pub struct SharedSecret(String);

impl SharedSecret {
    /// Wrap a configured secret; an empty secret would accept empty `psk` fields
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(anyhow!("Shared secret must not be empty"));
        }
        Ok(Self(secret))
    }

    /// Compare a candidate in constant time.
    ///
    /// Every byte of the configured secret is visited regardless of where the
    /// candidate diverges or how long it is, so running time depends only on
    /// the configured secret length.
    pub fn verify(&self, candidate: &str) -> bool {
        let expected = self.0.as_bytes();
        let candidate = candidate.as_bytes();

        let mut matches: Choice = (expected.len() as u64).ct_eq(&(candidate.len() as u64));
        for (i, byte) in expected.iter().enumerate() {
            let other = candidate.get(i).copied().unwrap_or(0);
            matches &= byte.ct_eq(&other);
        }
        matches.into()
    }

    /// The raw secret, for outbound hub requests only
    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

impl fmt::Display for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify() {
        let secret = SharedSecret::new("access-front-door-psk").unwrap();
        assert!(secret.verify("access-front-door-psk"));
        assert!(!secret.verify("access-front-door-psk "));
        assert!(!secret.verify("access-front-door-ps"));
        assert!(!secret.verify("Access-front-door-psk"));
        assert!(!secret.verify(""));
    }

    #[test]
    fn test_prefix_padded_with_nul_is_rejected() {
        // Candidate shorter than the secret is padded with 0 internally
        let secret = SharedSecret::new("ab\0").unwrap();
        assert!(!secret.verify("ab"));
        assert!(secret.verify("ab\0"));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(SharedSecret::new("").is_err());
    }

    #[test]
    fn test_never_printed() {
        let secret = SharedSecret::new("hunter2").unwrap();
        assert!(!format!("{:?}", secret).contains("hunter2"));
        assert!(!format!("{}", secret).contains("hunter2"));
    }
}
