use rand::RngCore;
use rand::rngs::OsRng;

/// The size of a challenge nonce in bytes (128 bits).
pub const NONCE_SIZE: usize = 16;

/// Generates a new random nonce.
///
/// # Returns
///
/// The nonce as 32 lowercase hexadecimal characters.
pub fn generate_nonce() -> String {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    hex::encode(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn nonce_is_32_lowercase_hex() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
    }

    #[test]
    fn nonces_do_not_repeat() {
        let nonces: HashSet<String> = (0..1000).map(|_| generate_nonce()).collect();
        assert_eq!(nonces.len(), 1000);
    }
}
