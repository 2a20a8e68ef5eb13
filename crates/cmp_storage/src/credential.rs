#![forbid(unsafe_code)]

use std::fmt::Write as _;

use cmp_kernel_contracts::directory::{PasswordCredential, StoredCredential};
use sha2::{Digest, Sha256};

const SHA256_TAG: &str = "sha256:";

/// Turns a caller credential into its persisted form and checks it back.
pub trait CredentialScheme: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn seal(&self, credential: &PasswordCredential) -> StoredCredential;
    fn verify(&self, credential: &PasswordCredential, stored: &StoredCredential) -> bool;
}

/// Stores the secret verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextScheme;

impl CredentialScheme for PlaintextScheme {
    fn name(&self) -> &'static str {
        "plaintext"
    }

    fn seal(&self, credential: &PasswordCredential) -> StoredCredential {
        StoredCredential::new(credential.expose())
    }

    fn verify(&self, credential: &PasswordCredential, stored: &StoredCredential) -> bool {
        stored.as_str() == credential.expose()
    }
}

/// Unsalted SHA-256 digest, stored as `sha256:<hex>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Scheme;

impl Sha256Scheme {
    fn digest_hex(secret: &str) -> String {
        let digest = Sha256::digest(secret.as_bytes());
        let mut out = String::with_capacity(SHA256_TAG.len() + digest.len() * 2);
        out.push_str(SHA256_TAG);
        for b in digest {
            let _ = write!(out, "{b:02x}");
        }
        out
    }
}

impl CredentialScheme for Sha256Scheme {
    fn name(&self) -> &'static str {
        "sha256"
    }

    fn seal(&self, credential: &PasswordCredential) -> StoredCredential {
        StoredCredential::new(Self::digest_hex(credential.expose()))
    }

    fn verify(&self, credential: &PasswordCredential, stored: &StoredCredential) -> bool {
        stored.as_str().starts_with(SHA256_TAG)
            && stored.as_str() == Self::digest_hex(credential.expose())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_credential_01_plaintext_roundtrip() {
        let s = PlaintextScheme;
        let stored = s.seal(&PasswordCredential::new("admin123"));
        assert!(s.verify(&PasswordCredential::new("admin123"), &stored));
        assert!(!s.verify(&PasswordCredential::new("admin124"), &stored));
    }

    #[test]
    fn at_credential_02_sha256_never_stores_the_secret() {
        let s = Sha256Scheme;
        let stored = s.seal(&PasswordCredential::new("admin123"));
        assert!(stored.as_str().starts_with("sha256:"));
        assert!(!stored.as_str().contains("admin123"));
        assert_eq!(stored.as_str().len(), "sha256:".len() + 64);
        assert!(s.verify(&PasswordCredential::new("admin123"), &stored));
        assert!(!s.verify(&PasswordCredential::new("nope"), &stored));
    }

    #[test]
    fn at_credential_03_sha256_rejects_plaintext_rows() {
        let stored = PlaintextScheme.seal(&PasswordCredential::new("admin123"));
        assert!(!Sha256Scheme.verify(&PasswordCredential::new("admin123"), &stored));
    }
}
