//! Random secret generation.

use rand::distributions::{Distribution, Uniform};
use rand::rngs::OsRng;

/// URL-safe alphabet (RFC 4648 §5): never needs quoting in SQL, PHP or shell.
const URLSAFE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Random string drawn from the URL-safe alphabet using the OS RNG.
pub fn urlsafe(length: usize) -> String {
    let dist = Uniform::from(0..URLSAFE.len());
    let mut rng = OsRng;
    (0..length)
        .map(|_| URLSAFE[dist.sample(&mut rng)] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlsafe_has_requested_length_and_alphabet() {
        let token = urlsafe(64);
        assert_eq!(token.len(), 64);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn urlsafe_values_differ() {
        assert_ne!(urlsafe(16), urlsafe(16));
    }
}
