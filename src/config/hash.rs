//! Declaration hashing for change detection.
//!
//! Input hashes cover the recorded (non-secret) inputs only. The root
//! credential only reaches the state file as a salted digest, so a changed
//! credential can be detected without it being recoverable from disk.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::engine::CredentialDigest;
use crate::program::{InstanceInputs, ResourceDeclaration};

/// Hasher for computing declaration hashes.
#[derive(Debug, Default)]
pub struct DeclarationHasher;

impl DeclarationHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Hashes everything a program declared.
    ///
    /// Order of declaration does not matter.
    #[must_use]
    pub fn hash_program(&self, declarations: &[ResourceDeclaration]) -> String {
        let mut per_resource: Vec<String> = declarations
            .iter()
            .map(|d| {
                let mut hasher = Sha256::new();
                hasher.update(d.name.as_bytes());
                hasher.update([0u8]);
                hasher.update(d.provider.as_bytes());
                hasher.update([0u8]);
                hasher.update(d.kind.as_bytes());
                hasher.update([0u8]);
                hasher.update(self.hash_inputs(&d.args.inputs).as_bytes());
                hex::encode(hasher.finalize())
            })
            .collect();
        per_resource.sort_unstable();

        let mut hasher = Sha256::new();
        for hash in per_resource {
            hasher.update(hash.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Hashes the recorded inputs of one instance.
    #[must_use]
    pub fn hash_inputs(&self, inputs: &InstanceInputs) -> String {
        let mut hasher = Sha256::new();

        for field in [
            inputs.image.as_str(),
            inputs.label.as_str(),
            inputs.region.as_str(),
            inputs.instance_type.as_str(),
        ] {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(if inputs.private_ip { [1u8] } else { [0u8] });
        hasher.update(inputs.swap_size.to_be_bytes());

        // Tags are a set on the provider side
        let mut tags: Vec<_> = inputs.tags.iter().collect();
        tags.sort();
        for tag in tags {
            hasher.update(tag.as_bytes());
            hasher.update([0u8]);
        }

        hex::encode(hasher.finalize())
    }

    /// Digests a credential under a fresh random salt.
    #[must_use]
    pub fn credential_digest(&self, secret: &SecretString) -> CredentialDigest {
        let salt = Uuid::new_v4().simple().to_string();
        let digest = salted(&salt, secret);
        CredentialDigest { salt, digest }
    }

    /// Returns true if `secret` is the credential `recorded` was made from.
    #[must_use]
    pub fn credential_matches(&self, recorded: &CredentialDigest, secret: &SecretString) -> bool {
        salted(&recorded.salt, secret) == recorded.digest
    }

    /// Short form of a hash for display.
    #[must_use]
    pub fn short_hash(hash: &str) -> &str {
        hash.get(..8).unwrap_or(hash)
    }
}

fn salted(salt: &str, secret: &SecretString) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update([0u8]);
    hasher.update(secret.expose_secret().as_bytes());
    hex::encode(hasher.finalize())
}
