//! Generated identifiers
//!
//! Identity fields that the caller leaves unset are filled with short
//! identifiers drawn from a fixed alphabet. UUIDv4 bytes are the entropy
//! source.

use uuid::Uuid;

/// Alphabet used for generated identifiers.
pub const ID_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of identifiers produced by [`new_id`].
pub const DEFAULT_ID_LEN: usize = 16;

/// Generates an identifier of `len` characters from [`ID_ALPHABET`].
pub fn generate_id(len: usize) -> String {
    let mut id = String::with_capacity(len);
    while id.len() < len {
        for byte in Uuid::new_v4().as_bytes() {
            if id.len() == len {
                break;
            }
            // Rejection sampling: 252 = 7 * 36.
            if *byte < 252 {
                id.push(ID_ALPHABET[(*byte % 36) as usize] as char);
            }
        }
    }
    id
}

/// Generates an identifier of [`DEFAULT_ID_LEN`] characters.
pub fn new_id() -> String {
    generate_id(DEFAULT_ID_LEN)
}

/// Returns true if `value` could have been produced by [`generate_id`].
pub fn is_generated_id(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| ID_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_length_and_alphabet() {
        for len in [1, 8, DEFAULT_ID_LEN, 40] {
            let id = generate_id(len);
            assert!(is_generated_id(&id, len), "bad id {}", id);
        }
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(new_id(), new_id());
    }

    #[test]
    fn test_zero_length() {
        assert_eq!(generate_id(0), "");
    }
}
