use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{AppError, AppResult};

const TOKEN_BYTES: usize = 32;

/// Opaque guest reservation token: 256 random bits, URL-safe base64.
pub fn generate_reservation_token() -> AppResult<String> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; TOKEN_BYTES];
    rng.fill(&mut bytes)
        .map_err(|e| AppError::Internal(format!("RNG error: {}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_token_shape() {
        let token = generate_reservation_token().unwrap();
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_tokens_do_not_repeat() {
        let tokens: HashSet<String> = (0..256)
            .map(|_| generate_reservation_token().unwrap())
            .collect();
        assert_eq!(tokens.len(), 256);
    }
}
