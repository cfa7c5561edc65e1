//! Block cipher primitives shared by the handshake and the command envelope.


use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;
use cmac::{Cmac, Mac};


/// Block length of AES in bytes.
pub const BLOCK_LENGTH: usize = 16;

/// The all-zero IV used for raw static-key encryption during the handshake.
///
/// Only the handshake encrypts under a fixed IV; established sessions derive
/// a fresh IV from the transaction identifier and command counter (see
/// [`crate::secure_messaging::command_iv`]).
pub const ZERO_IV: [u8; BLOCK_LENGTH] = [0u8; BLOCK_LENGTH];


/// Encrypts data in place using AES-128 in CBC mode.
///
/// No padding is applied; callers pre-pad where the protocol requires it.
///
/// Panics if the data length is not a multiple of the block length.
pub fn aes_cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) {
    assert!(data.len() % BLOCK_LENGTH == 0, "CBC input of {} bytes is not block-aligned", data.len());
    let data_len = data.len();
    cbc::Encryptor::<Aes128>::new(key.into(), iv.into())
        .encrypt_padded_mut::<NoPadding>(data, data_len)
        .unwrap();
}

/// Decrypts data in place using AES-128 in CBC mode.
///
/// Does not strip padding.
///
/// Panics if the data length is not a multiple of the block length.
pub fn aes_cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) {
    assert!(data.len() % BLOCK_LENGTH == 0, "CBC input of {} bytes is not block-aligned", data.len());
    cbc::Decryptor::<Aes128>::new(key.into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(data)
        .unwrap();
}

/// Computes the full 16-byte AES-CMAC (RFC 4493) of a message.
pub fn cmac_full(key: &[u8; 16], message: &[u8]) -> [u8; 16] {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key).unwrap();
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Truncates a full CMAC to the 8-byte tag transmitted on the wire.
///
/// The tag consists of the bytes at odd indices of the full MAC
/// (1, 3, 5, 7, 9, 11, 13, 15), in that order. This is the selection rule
/// the tag applies; a plain prefix will not verify.
pub fn truncate_cmac(full_mac: &[u8; 16]) -> [u8; 8] {
    [
        full_mac[1],
        full_mac[3],
        full_mac[5],
        full_mac[7],
        full_mac[9],
        full_mac[11],
        full_mac[13],
        full_mac[15],
    ]
}

/// Rotates a 16-byte value left by one byte: byte 0 moves to position 15.
pub fn rotate_left_once(value: &[u8; 16]) -> [u8; 16] {
    let mut rotated = [0u8; 16];
    rotated[..15].copy_from_slice(&value[1..]);
    rotated[15] = value[0];
    rotated
}

/// Rotates a 16-byte value right by one byte: byte 15 moves to position 0.
pub fn rotate_right_once(value: &[u8; 16]) -> [u8; 16] {
    let mut rotated = [0u8; 16];
    rotated[1..].copy_from_slice(&value[..15]);
    rotated[0] = value[15];
    rotated
}


#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use super::*;

    #[test]
    fn test_aes_cbc_single_block_fips197() {
        // FIPS 197 Appendix C.1; a single block under a zero IV is plain AES.
        let key = hex!("000102030405060708090A0B0C0D0E0F");
        let mut data = hex!("00112233445566778899AABBCCDDEEFF");
        aes_cbc_encrypt(&key, &ZERO_IV, &mut data);
        assert_eq!(data, hex!("69C4E0D86A7B0430D8CDB78070B4C55A"));
    }

    #[test]
    fn test_aes_cbc_chaining_sp800_38a() {
        // NIST SP 800-38A F.2.1, first two blocks.
        let key = hex!("2B7E151628AED2A6ABF7158809CF4F3C");
        let iv = hex!("000102030405060708090A0B0C0D0E0F");
        let mut data = hex!("
            6BC1BEE22E409F96E93D7E117393172A
            AE2D8A571E03AC9C9EB76FAC45AF8E51
        ");
        aes_cbc_encrypt(&key, &iv, &mut data);
        assert_eq!(data, hex!("
            7649ABAC8119B246CEE98E9B12E9197D
            5086CB9B507219EE95DB113A917678B2
        "));
    }

    #[test]
    fn test_aes_cbc_round_trip() {
        let key = hex!("4E544147343234204B45592054455354");
        let iv = hex!("101112131415161718191A1B1C1D1E1F");
        let original = hex!("
            000102030405060708090A0B0C0D0E0F
            101112131415161718191A1B1C1D1E1F
            202122232425262728292A2B2C2D2E2F
        ");
        let mut data = original;
        aes_cbc_encrypt(&key, &iv, &mut data);
        assert_ne!(data, original);
        aes_cbc_decrypt(&key, &iv, &mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_cmac_rfc4493_vectors() {
        let key = hex!("2B7E151628AED2A6ABF7158809CF4F3C");
        assert_eq!(
            cmac_full(&key, &[]),
            hex!("BB1D6929E95937287FA37D129B756746"),
        );
        assert_eq!(
            cmac_full(&key, &hex!("6BC1BEE22E409F96E93D7E117393172A")),
            hex!("070A16B46B4D4144F79BDD9DD04A287C"),
        );
    }

    #[test]
    fn test_truncate_cmac_takes_odd_indices() {
        let full_mac = hex!("B7A60161F202EC3489BD4BEDEF64BB32");
        assert_eq!(truncate_cmac(&full_mac), hex!("A6610234BDED6432"));
    }

    #[test]
    fn test_rotation_moves_first_byte_last() {
        let value = hex!("00112233445566778899AABBCCDDEEFF");
        let rotated = rotate_left_once(&value);
        assert_eq!(rotated, hex!("112233445566778899AABBCCDDEEFF00"));
        assert_eq!(rotated[15], value[0]);
        for i in 0..15 {
            assert_eq!(rotated[i], value[i + 1]);
        }
    }

    #[test]
    fn test_rotations_are_inverse() {
        let value = hex!("F0E1D2C3B4A5968778695A4B3C2D1E0F");
        assert_eq!(rotate_left_once(&rotate_right_once(&value)), value);
        assert_eq!(rotate_right_once(&rotate_left_once(&value)), value);
    }
}
