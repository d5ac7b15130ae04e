use std::path::Path;
use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;
use crate::error::{AppError, Result};

/// Modulus size of generated signing keys.
pub const RSA_KEY_BITS: usize = 2048;

/// A PEM encoded RSA key pair. The private half is wiped on drop.
pub struct SigningKeyPair {
    pub private_pem: Zeroizing<String>,
    pub public_pem: String,
}

/// Generates a fresh RSA key pair.
pub fn generate_key_pair() -> Result<SigningKeyPair> {
    let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
        .map_err(|e| AppError::Signing(format!("RSA key generation failed: {}", e)))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| AppError::Signing(format!("Private key encoding failed: {}", e)))?;
    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| AppError::Signing(format!("Public key encoding failed: {}", e)))?;

    Ok(SigningKeyPair {
        private_pem,
        public_pem,
    })
}

/// Loads the key pair from disk, generating and writing it if either file is missing.
///
/// # Arguments
///
/// * `private_path` - Location of the PKCS#8 private key.
/// * `public_path` - Location of the SPKI public key.
///
/// # Returns
///
/// A `Result` containing the `SigningKeyPair`.
pub async fn load_or_generate(private_path: &Path, public_path: &Path) -> Result<SigningKeyPair> {
    let private_exists = tokio::fs::try_exists(private_path).await?;
    let public_exists = tokio::fs::try_exists(public_path).await?;

    if private_exists && public_exists {
        let private_pem = Zeroizing::new(tokio::fs::read_to_string(private_path).await?);
        let public_pem = tokio::fs::read_to_string(public_path).await?;
        tracing::info!("✅ Signing keys loaded from {}", private_path.display());
        return Ok(SigningKeyPair {
            private_pem,
            public_pem,
        });
    }

    tracing::warn!("⚠️  Signing keys not found, generating a new {}-bit pair...", RSA_KEY_BITS);

    let pair = tokio::task::spawn_blocking(generate_key_pair)
        .await
        .map_err(|e| AppError::Internal(format!("Key generation task failed: {}", e)))??;

    for path in [private_path, public_path] {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    tokio::fs::write(private_path, pair.private_pem.as_bytes()).await?;
    restrict_permissions(private_path).await?;
    tokio::fs::write(public_path, pair.public_pem.as_bytes()).await?;

    tracing::info!("✅ Signing keys generated and written to {}", private_path.display());
    Ok(pair)
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
