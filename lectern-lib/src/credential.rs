//! Credential hashing.
//!
//! The engine never looks inside a credential. It hands plaintext to a [`CredentialHasher`] and
//! stores whatever opaque string comes back.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHasher as _, SaltString, rand_core::OsRng},
};

use crate::Error;

/// Turns a plaintext password into an opaque, storable credential.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> Result<String, Error>;
}

/// Argon2id hasher producing PHC-formatted strings.
///
/// Defaults to the OWASP parameters: 19 MiB of memory, 2 iterations, 1 lane.
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    pub fn new() -> Self {
        Self {
            params: Params::new(19456, 2, 1, None)
                .expect("OWASP Argon2 parameters are valid constants"),
        }
    }

    pub fn with_params(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, Error> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|err| Error::Credential(format!("invalid parameters: {err}")))?;

        Ok(Self { params })
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> Result<String, Error> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());

        let hash = argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|err| Error::Credential(format!("hashing failed: {err}")))?;

        Ok(hash.to_string())
    }
}

/// Hashes by prefixing. Only for tests.
#[cfg(test)]
pub(crate) struct FakeHasher;

#[cfg(test)]
impl CredentialHasher for FakeHasher {
    fn hash(&self, plaintext: &str) -> Result<String, Error> {
        Ok(format!("fake${plaintext}"))
    }
}
