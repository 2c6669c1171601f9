//! Daemon secrets: the symmetric `slurm.key` and the RSA `jwt_hs256.key`.
//!
//! Both live in the backend's configuration directory and are always left
//! with mode `0600` and the daemon's owner, whatever they carried before.
//! The symmetric key travels as base64; the file itself holds raw bytes.

use crate::sys::{self, Ownership};
use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Mode every secret file is forced to.
pub const SECRET_FILE_MODE: u32 = 0o600;

/// Number of random bytes in a generated `slurm.key`.
pub const SLURM_KEY_LENGTH: usize = 2048;

/// Modulus size of a generated JWT signing key.
pub const RSA_KEY_BITS: usize = 2048;

/// File name of the symmetric authentication key.
pub const SLURM_KEY_FILE: &str = "slurm.key";

/// File name of the JWT signing key.
pub const JWT_KEY_FILE: &str = "jwt_hs256.key";

/// How a secret is encoded on disk and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    /// Raw random bytes, exchanged as base64.
    Symmetric,
    /// PKCS#1 PEM private key, exchanged verbatim.
    Rsa,
}

/// One secret file.
#[derive(Debug, Clone)]
pub struct SecretFile {
    path: PathBuf,
    kind: SecretKind,
    ownership: Ownership,
}

impl SecretFile {
    /// A secret at `path`. The mode of `ownership` is replaced with
    /// [`SECRET_FILE_MODE`].
    pub fn new(path: impl Into<PathBuf>, kind: SecretKind, ownership: &Ownership) -> Self {
        Self {
            path: path.into(),
            kind,
            ownership: ownership.with_mode(SECRET_FILE_MODE),
        }
    }

    pub fn symmetric(path: impl Into<PathBuf>, ownership: &Ownership) -> Self {
        Self::new(path, SecretKind::Symmetric, ownership)
    }

    pub fn rsa(path: impl Into<PathBuf>, ownership: &Ownership) -> Self {
        Self::new(path, SecretKind::Rsa, ownership)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> SecretKind {
        self.kind
    }

    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the secret: base64 for symmetric keys, PEM text for RSA keys.
    pub fn get(&self) -> Result<String> {
        let bytes = self.read()?;
        match self.kind {
            SecretKind::Symmetric => Ok(STANDARD.encode(bytes)),
            SecretKind::Rsa => String::from_utf8(bytes).map_err(|e| Error::Format {
                path: self.path.clone(),
                reason: format!("key is not valid UTF-8: {}", e),
            }),
        }
    }

    /// Overwrite the secret, then force mode and owner.
    ///
    /// # Errors
    ///
    /// [`Error::Format`] if a symmetric secret is not valid base64,
    /// [`Error::Io`] if the directory does not exist, and
    /// [`Error::Permission`] if the owner cannot be applied.
    pub fn set(&self, secret: &str) -> Result<()> {
        let bytes = match self.kind {
            SecretKind::Symmetric => {
                STANDARD
                    .decode(secret.trim())
                    .map_err(|e| Error::Format {
                        path: self.path.clone(),
                        reason: format!("invalid base64: {}", e),
                    })?
            }
            SecretKind::Rsa => secret.as_bytes().to_vec(),
        };
        self.write(&bytes)
    }

    /// Generate a fresh secret and store it. Returns the new value in the
    /// same form [`SecretFile::get`] would.
    pub fn generate(&self) -> Result<String> {
        let secret = match self.kind {
            SecretKind::Symmetric => {
                let mut key = vec![0u8; SLURM_KEY_LENGTH];
                OsRng.fill_bytes(&mut key);
                STANDARD.encode(key)
            }
            SecretKind::Rsa => generate_rsa_pem()?,
        };
        self.set(&secret)?;
        info!("generated new secret at {}", self.path.display());
        Ok(secret)
    }

    /// SHA-256 of the file contents, hex encoded.
    pub fn fingerprint(&self) -> Result<String> {
        let digest = Sha256::digest(self.read()?);
        Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(self.path.clone()),
            _ => Error::Io(e),
        })
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        sys::write_atomic(&self.path, bytes)?;
        self.ownership.apply(&self.path)?;
        debug!("wrote secret {}", self.path.display());
        Ok(())
    }
}

fn generate_rsa_pem() -> Result<String> {
    use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};

    let key = rsa::RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
        .map_err(|e| Error::Other(format!("Failed to generate RSA key: {}", e)))?;
    let pem = key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| Error::Other(format!("Failed to encode RSA key: {}", e)))?;
    Ok(pem.to_string())
}
