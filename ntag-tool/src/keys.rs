//! Key file handling.
//!
//! A key file holds the five tag keys as `slot,hex` lines:
//!
//! ```plain
//! # master key
//! 0,00112233445566778899AABBCCDDEEFF
//! 1,000102030405060708090A0B0C0D0E0F
//! ...
//! ```
//!
//! Blank lines and `#` comments are ignored. Every slot must appear exactly
//! once.


use std::fmt::Write;
use std::fs;
use std::path::Path;


/// Number of key slots on the tag.
pub const KEY_COUNT: usize = 5;


pub struct KeySet {
    pub keys: [[u8; 16]; KEY_COUNT],
}
impl KeySet {
    /// A key set with all slots at the factory default (all-zero) key.
    pub fn factory_default() -> Self {
        Self { keys: [[0u8; 16]; KEY_COUNT] }
    }

    pub fn load(path: &Path) -> Self {
        let contents = fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("failed to read key file {:?}: {}", path, e));

        let mut keys = [[0u8; 16]; KEY_COUNT];
        let mut seen = [false; KEY_COUNT];
        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line_number = index + 1;
            let Some((slot_text, key_text)) = line.split_once(',') else {
                panic!("key file line {}: expected `slot,key`", line_number);
            };
            let slot: usize = slot_text.trim().parse()
                .unwrap_or_else(|_| panic!("key file line {}: invalid slot number", line_number));
            assert!(slot < KEY_COUNT, "key file line {}: slot {} does not exist", line_number, slot);
            assert!(!seen[slot], "key file line {}: slot {} appears twice", line_number, slot);
            let key_bytes = hex::decode(key_text.trim())
                .unwrap_or_else(|e| panic!("key file line {}: invalid hex: {}", line_number, e));
            keys[slot] = key_bytes.try_into()
                .unwrap_or_else(|_| panic!("key file line {}: key must be 16 bytes", line_number));
            seen[slot] = true;
        }
        for (slot, slot_seen) in seen.iter().enumerate() {
            assert!(*slot_seen, "key file is missing slot {}", slot);
        }

        Self { keys }
    }

    pub fn save(&self, path: &Path) {
        let mut contents = String::new();
        for (slot, key) in self.keys.iter().enumerate() {
            writeln!(contents, "{},{}", slot, hex::encode_upper(key)).unwrap();
        }
        fs::write(path, contents)
            .unwrap_or_else(|e| panic!("failed to write key file {:?}: {}", path, e));
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_round_trips_save() {
        let dir = std::env::temp_dir();
        let path = dir.join("ntag-tool-keys-test.csv");

        let mut key_set = KeySet::factory_default();
        key_set.keys[2] = [0xAB; 16];
        key_set.save(&path);

        let loaded = KeySet::load(&path);
        assert_eq!(loaded.keys, key_set.keys);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    #[should_panic(expected = "missing slot")]
    fn test_incomplete_key_file_is_rejected() {
        let dir = std::env::temp_dir();
        let path = dir.join("ntag-tool-keys-incomplete.csv");
        std::fs::write(&path, "0,00112233445566778899AABBCCDDEEFF\n").unwrap();
        KeySet::load(&path);
    }
}
