//! Key change payload construction.


use std::fmt;


/// Number of key slots on the tag.
pub const KEY_COUNT: u8 = 5;
/// Slot of the application master key.
pub const MASTER_KEY_SLOT: u8 = 0;


#[derive(Debug)]
pub enum Error {
    KeySlotOutOfRange { obtained: u8 },
    MissingOldKey { key_no: u8 },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeySlotOutOfRange { obtained }
                => write!(f, "key slot {} does not exist, the tag has slots 0 through {}", obtained, KEY_COUNT - 1),
            Self::MissingOldKey { key_no }
                => write!(f, "changing key slot {} requires the current key of that slot", key_no),
        }
    }
}
impl std::error::Error for Error {
}


/// Inputs for changing one tag key in place.
#[derive(Clone)]
pub struct KeyChangeRequest {
    /// Target key slot, 0 through 4.
    pub key_no: u8,
    pub new_key: [u8; 16],
    /// Current key of the target slot. Required for slots 1 through 4,
    /// unused for the master slot.
    pub old_key: Option<[u8; 16]>,
    /// Version byte stored alongside the new key. The tag reports it via
    /// GetKeyVersion but attaches no meaning to it.
    pub version: u8,
}

/// Builds the 32-byte ChangeKey plaintext.
///
/// For the master slot:
/// ```plain
/// new_key(16) || version || 80 || 00*14
/// ```
/// For slots 1 through 4:
/// ```plain
/// (new_key XOR old_key)(16) || version || LE32(CRC32(new_key) XOR FFFFFFFF) || 80 || 00*10
/// ```
/// The checksum is the standard CRC32 with its final inversion undone again,
/// which is what the tag computes over the bare new key.
///
/// The block is aligned by construction and goes through the envelope
/// without further padding; the single key-slot byte travels as the
/// unencrypted header.
pub fn build_key_change_payload(request: &KeyChangeRequest) -> Result<[u8; 32], Error> {
    if request.key_no >= KEY_COUNT {
        return Err(Error::KeySlotOutOfRange { obtained: request.key_no });
    }

    let mut payload = [0u8; 32];
    if request.key_no == MASTER_KEY_SLOT {
        payload[0..16].copy_from_slice(&request.new_key);
        payload[16] = request.version;
        payload[17] = 0x80;
    } else {
        let Some(old_key) = request.old_key else {
            return Err(Error::MissingOldKey { key_no: request.key_no });
        };
        for (target, (new_byte, old_byte)) in
                payload[0..16].iter_mut().zip(request.new_key.iter().zip(old_key.iter())) {
            *target = new_byte ^ old_byte;
        }
        payload[16] = request.version;
        let checksum = crc32fast::hash(&request.new_key) ^ 0xFFFF_FFFF;
        payload[17..21].copy_from_slice(&checksum.to_le_bytes());
        payload[21] = 0x80;
    }
    Ok(payload)
}


#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use super::*;

    #[test]
    fn test_crc32_reference_vector() {
        // the classic CRC-32 check value
        assert_eq!(crc32fast::hash(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn test_master_key_payload_shape() {
        let request = KeyChangeRequest {
            key_no: 0,
            new_key: hex!("404142434445464748494A4B4C4D4E4F"),
            old_key: None,
            version: 0x42,
        };
        let payload = build_key_change_payload(&request).unwrap();
        assert_eq!(&payload[0..16], &request.new_key);
        assert_eq!(payload[16], 0x42);
        assert_eq!(payload[17], 0x80);
        assert_eq!(&payload[18..32], &[0u8; 14]);
    }

    #[test]
    fn test_master_key_payload_ignores_old_key() {
        let new_key = hex!("505152535455565758595A5B5C5D5E5F");
        let without_old = build_key_change_payload(&KeyChangeRequest {
            key_no: 0,
            new_key,
            old_key: None,
            version: 1,
        }).unwrap();
        let with_old = build_key_change_payload(&KeyChangeRequest {
            key_no: 0,
            new_key,
            old_key: Some(hex!("FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF")),
            version: 1,
        }).unwrap();
        assert_eq!(without_old, with_old);
    }

    #[test]
    fn test_application_key_payload_shape() {
        let new_key = hex!("000102030405060708090A0B0C0D0E0F");
        let old_key = hex!("FFEEDDCCBBAA99887766554433221100");
        let request = KeyChangeRequest {
            key_no: 2,
            new_key,
            old_key: Some(old_key),
            version: 0x07,
        };
        let payload = build_key_change_payload(&request).unwrap();
        for i in 0..16 {
            assert_eq!(payload[i], new_key[i] ^ old_key[i]);
        }
        assert_eq!(payload[16], 0x07);
        let checksum = crc32fast::hash(&new_key) ^ 0xFFFF_FFFF;
        assert_eq!(&payload[17..21], &checksum.to_le_bytes());
        assert_eq!(payload[21], 0x80);
        assert_eq!(&payload[22..32], &[0u8; 10]);
    }

    #[test]
    fn test_unchanged_key_xors_to_zero() {
        let key = hex!("A0A1A2A3A4A5A6A7A8A9AAABACADAEAF");
        let payload = build_key_change_payload(&KeyChangeRequest {
            key_no: 4,
            new_key: key,
            old_key: Some(key),
            version: 0,
        }).unwrap();
        assert_eq!(&payload[0..16], &[0u8; 16]);
    }

    #[test]
    fn test_application_key_requires_old_key() {
        let result = build_key_change_payload(&KeyChangeRequest {
            key_no: 1,
            new_key: [0u8; 16],
            old_key: None,
            version: 0,
        });
        assert!(matches!(result, Err(Error::MissingOldKey { key_no: 1 })));
    }

    #[test]
    fn test_key_slot_range_is_enforced() {
        let result = build_key_change_payload(&KeyChangeRequest {
            key_no: 5,
            new_key: [0u8; 16],
            old_key: Some([0u8; 16]),
            version: 0,
        });
        assert!(matches!(result, Err(Error::KeySlotOutOfRange { obtained: 5 })));
    }
}
