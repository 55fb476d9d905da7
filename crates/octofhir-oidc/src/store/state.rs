//! CSRF state generation.

use base64::{Engine, engine::general_purpose::URL_SAFE};
use rand::RngCore;
use rand::rngs::OsRng;

/// Number of random bytes in a state token.
pub const STATE_BYTES: usize = 16;

/// Generates a state token: 16 bytes from the OS CSPRNG, URL-safe base64.
#[must_use]
pub fn new_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_state_is_url_safe_16_bytes() {
        let state = new_state();
        // 16 bytes -> 24 chars with padding
        assert_eq!(state.len(), 24);
        assert!(!state.contains('+'));
        assert!(!state.contains('/'));
        assert_eq!(URL_SAFE.decode(&state).unwrap().len(), STATE_BYTES);
    }

    #[test]
    fn test_state_never_repeats() {
        let states: HashSet<String> = (0..10_000).map(|_| new_state()).collect();
        assert_eq!(states.len(), 10_000);
    }
}
