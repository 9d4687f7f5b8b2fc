//! Key encoding for the data and type index trees.

use std::time::{SystemTime, UNIX_EPOCH};

/// Size of entity ID in bytes (UUID).
pub const ENTITY_ID_SIZE: usize = 16;

/// Separator between entity name and the rest of an index key.
pub const KEY_SEPARATOR: u8 = 0;

/// Type index key: `[entity name][0x00][entity_id (16 bytes)]`.
pub fn type_index_key(entity: &str, id: &[u8; ENTITY_ID_SIZE]) -> Vec<u8> {
    let mut key = type_index_prefix(entity);
    key.extend_from_slice(id);
    key
}

/// Prefix covering every type index key of an entity.
pub fn type_index_prefix(entity: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(entity.len() + 1 + ENTITY_ID_SIZE);
    prefix.extend_from_slice(entity.as_bytes());
    prefix.push(KEY_SEPARATOR);
    prefix
}

/// Extract the entity ID from a type index key.
pub fn decode_type_index_key(key: &[u8]) -> Option<[u8; ENTITY_ID_SIZE]> {
    if key.len() < ENTITY_ID_SIZE + 1 {
        return None;
    }
    key[key.len() - ENTITY_ID_SIZE..].try_into().ok()
}

/// Get current timestamp in microseconds since Unix epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_index_key() {
        let id = [7u8; 16];
        let key = type_index_key("User", &id);

        assert!(key.starts_with(&type_index_prefix("User")));
        assert_eq!(decode_type_index_key(&key), Some(id));
    }

    #[test]
    fn test_prefix_does_not_overlap() {
        let id = [1u8; 16];
        let key = type_index_key("UserProfile", &id);
        assert!(!key.starts_with(&type_index_prefix("User")));
    }

    #[test]
    fn test_decode_short_key() {
        assert!(decode_type_index_key(&[0u8; 10]).is_none());
    }
}
