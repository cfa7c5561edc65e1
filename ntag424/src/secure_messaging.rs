//! The authenticated command envelope.
//!
//! Every command sent inside an established session is protected by the same
//! envelope: the payload is AES-CBC encrypted under an IV derived from the
//! transaction identifier and command counter, and the whole command is
//! authenticated by a truncated CMAC. Wrapping is pure; the command counter
//! advances only through [`Session::commit_success`], which the dispatch
//! layer calls once the tag has reported a success status.


use std::fmt;

use crate::crypt::{self, BLOCK_LENGTH, ZERO_IV};
use crate::session::Session;


/// Length of the truncated authentication tag on the wire.
pub const MAC_LENGTH: usize = 8;

const IV_PREFIX: [u8; 2] = [0xA5, 0x5A];


#[derive(Debug)]
pub enum Error {
    UnalignedPayload { length: usize },
    ResponseLength { obtained: usize },
    InvalidPadding,
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnalignedPayload { length }
                => write!(f, "payload of {} bytes is not block-aligned", length),
            Self::ResponseLength { obtained }
                => write!(f, "response body has length {}, expected 8 or a positive multiple of 16", obtained),
            Self::InvalidPadding
                => write!(f, "decrypted response payload has invalid padding"),
        }
    }
}
impl std::error::Error for Error {
}


/// Derives the IV protecting the current command and its response.
///
/// The IV is itself a ciphertext:
/// ```plain
/// IV = E(session_enc_key, IV=0, A5 5A || Ti(4) || counter(2, LE) || 00*8)
/// ```
/// The counter is the session's value before the command commits, for the
/// request and the response alike.
pub fn command_iv(session: &Session) -> [u8; 16] {
    let mut block = [0u8; BLOCK_LENGTH];
    block[0..2].copy_from_slice(&IV_PREFIX);
    block[2..6].copy_from_slice(session.transaction_id());
    block[6..8].copy_from_slice(&session.command_counter().to_le_bytes());
    crypt::aes_cbc_encrypt(session.enc_key(), &ZERO_IV, &mut block);
    block
}

/// Computes the truncated authentication tag for a command.
///
/// The MAC input is
/// `command || counter(2, LE) || Ti(4) || header || payload`, where the
/// payload is the ciphertext for fully protected commands and the clear
/// data for MAC-mode commands.
pub fn command_mac(session: &Session, command: u8, header: &[u8], payload: &[u8]) -> [u8; MAC_LENGTH] {
    let mut mac_input = Vec::with_capacity(1 + 2 + 4 + header.len() + payload.len());
    mac_input.push(command);
    mac_input.extend_from_slice(&session.command_counter().to_le_bytes());
    mac_input.extend_from_slice(session.transaction_id());
    mac_input.extend_from_slice(header);
    mac_input.extend_from_slice(payload);
    crypt::truncate_cmac(&crypt::cmac_full(session.mac_key(), &mac_input))
}

/// Produces the wire-ready data field of a fully protected command:
/// `header || E(plaintext) || MAC`.
///
/// The plaintext must already be block-aligned; padding policy belongs to
/// the command layer (most commands pad with `80 00*`, the key-change block
/// is aligned by construction). An empty plaintext is allowed and yields a
/// header-plus-MAC command.
///
/// Wrapping does not mutate the session. After the transport reports a
/// success status, call [`Session::commit_success`]; after a failure, do
/// nothing.
pub fn wrap_command(
    session: &Session,
    command: u8,
    header: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, Error> {
    if plaintext.len() % BLOCK_LENGTH != 0 {
        return Err(Error::UnalignedPayload { length: plaintext.len() });
    }
    let mut encrypted = plaintext.to_vec();
    if !encrypted.is_empty() {
        let iv = command_iv(session);
        crypt::aes_cbc_encrypt(session.enc_key(), &iv, &mut encrypted);
    }

    let mac = command_mac(session, command, header, &encrypted);
    let mut wire = Vec::with_capacity(header.len() + encrypted.len() + MAC_LENGTH);
    wire.extend_from_slice(header);
    wire.extend_from_slice(&encrypted);
    wire.extend_from_slice(&mac);
    Ok(wire)
}

/// Produces the wire-ready data field of a MAC-mode command:
/// `header || payload || MAC`, with the payload left in clear.
pub fn wrap_command_mac(session: &Session, command: u8, header: &[u8], payload: &[u8]) -> Vec<u8> {
    let mac = command_mac(session, command, header, payload);
    let mut wire = Vec::with_capacity(header.len() + payload.len() + MAC_LENGTH);
    wire.extend_from_slice(header);
    wire.extend_from_slice(payload);
    wire.extend_from_slice(&mac);
    wire
}

/// Decrypts the body of a fully protected response.
///
/// A body of exactly [`MAC_LENGTH`] bytes is a MAC-only confirmation and
/// yields an empty plaintext. A body whose length is a positive multiple of
/// the block length is decrypted under the same IV as the request (the
/// counter has not committed yet). Anything else is a protocol error.
///
/// The response MAC is not re-verified here; success is signaled by the
/// transport status word.
pub fn unwrap_response(session: &Session, body: &[u8]) -> Result<Vec<u8>, Error> {
    if body.len() == MAC_LENGTH {
        return Ok(Vec::new());
    }
    if body.is_empty() || body.len() % BLOCK_LENGTH != 0 {
        return Err(Error::ResponseLength { obtained: body.len() });
    }
    let mut plaintext = body.to_vec();
    let iv = command_iv(session);
    crypt::aes_cbc_decrypt(session.enc_key(), &iv, &mut plaintext);
    Ok(plaintext)
}

/// Appends `80 00*` padding up to the next block boundary.
pub fn pad_payload(data: &mut Vec<u8>) {
    data.push(0x80);
    while data.len() % BLOCK_LENGTH != 0 {
        data.push(0x00);
    }
}

/// Strips `80 00*` padding from a decrypted payload.
pub fn strip_padding(data: &mut Vec<u8>) -> Result<(), Error> {
    while data.last() == Some(&0x00) {
        data.pop();
    }
    if data.last() != Some(&0x80) {
        return Err(Error::InvalidPadding);
    }
    data.pop();
    Ok(())
}


#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use super::*;
    use crate::crypt;

    fn fixed_session() -> Session {
        Session::new(
            hex!("04CF3CB41A22583A61E89B158D252FC5"),
            hex!("FC4AF159B62E549B5812394CAB1918CC"),
            hex!("7614281A"),
        )
    }

    #[test]
    fn test_command_iv_is_encrypted_counter_block() {
        let mut session = fixed_session();
        session.commit_success();
        session.commit_success();
        session.commit_success();

        let mut expected = hex!("A55A7614281A0300 0000000000000000");
        crypt::aes_cbc_encrypt(session.enc_key(), &crypt::ZERO_IV, &mut expected);
        assert_eq!(command_iv(&session), expected);
    }

    #[test]
    fn test_command_iv_depends_on_counter() {
        let mut session = fixed_session();
        let before = command_iv(&session);
        assert_eq!(command_iv(&session), before);
        session.commit_success();
        assert_ne!(command_iv(&session), before);
    }

    #[test]
    fn test_mac_input_layout() {
        let session = fixed_session();
        let header = [0x02];
        let payload = hex!("DEADBEEFDEADBEEF");
        let mut mac_input = Vec::new();
        mac_input.push(0xAD);
        mac_input.extend_from_slice(&[0x00, 0x00]);
        mac_input.extend_from_slice(&hex!("7614281A"));
        mac_input.extend_from_slice(&header);
        mac_input.extend_from_slice(&payload);
        let expected = crypt::truncate_cmac(&crypt::cmac_full(session.mac_key(), &mac_input));
        assert_eq!(command_mac(&session, 0xAD, &header, &payload), expected);
    }

    #[test]
    fn test_wrap_command_layout_and_round_trip() {
        let session = fixed_session();
        let header = [0x03];
        let plaintext = hex!("000102030405060708090A0B0C0D0E0F");

        let wire = wrap_command(&session, 0x8D, &header, &plaintext).unwrap();
        assert_eq!(wire.len(), 1 + 16 + MAC_LENGTH);
        assert_eq!(wire[0], 0x03);
        let encrypted = &wire[1..17];
        assert_ne!(encrypted, plaintext);
        assert_eq!(
            &wire[17..],
            command_mac(&session, 0x8D, &header, encrypted),
        );

        let plain_again = unwrap_response(&session, encrypted).unwrap();
        assert_eq!(plain_again, plaintext);
    }

    #[test]
    fn test_wrap_command_rejects_unaligned_payload() {
        let session = fixed_session();
        let result = wrap_command(&session, 0x8D, &[], &[0u8; 15]);
        assert!(matches!(result, Err(Error::UnalignedPayload { length: 15 })));
    }

    #[test]
    fn test_wrap_command_with_empty_payload_has_no_ciphertext() {
        let session = fixed_session();
        let wire = wrap_command(&session, 0x51, &[], &[]).unwrap();
        assert_eq!(wire.len(), MAC_LENGTH);
        assert_eq!(wire, command_mac(&session, 0x51, &[], &[]));
    }

    #[test]
    fn test_unwrap_response_length_rules() {
        let session = fixed_session();
        assert_eq!(unwrap_response(&session, &[0u8; 8]).unwrap(), Vec::<u8>::new());
        assert!(unwrap_response(&session, &[0u8; 16]).is_ok());
        assert!(matches!(
            unwrap_response(&session, &[]),
            Err(Error::ResponseLength { obtained: 0 }),
        ));
        assert!(matches!(
            unwrap_response(&session, &[0u8; 12]),
            Err(Error::ResponseLength { obtained: 12 }),
        ));
        assert!(matches!(
            unwrap_response(&session, &[0u8; 24]),
            Err(Error::ResponseLength { obtained: 24 }),
        ));
    }

    #[test]
    fn test_padding_round_trip() {
        let mut data = vec![0x01, 0x02, 0x03];
        pad_payload(&mut data);
        assert_eq!(data.len(), BLOCK_LENGTH);
        assert_eq!(&data[0..4], &[0x01, 0x02, 0x03, 0x80]);
        strip_padding(&mut data).unwrap();
        assert_eq!(data, vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_padding_of_aligned_data_adds_a_full_block() {
        let mut data = vec![0xAA; BLOCK_LENGTH];
        pad_payload(&mut data);
        assert_eq!(data.len(), 2 * BLOCK_LENGTH);
        strip_padding(&mut data).unwrap();
        assert_eq!(data, vec![0xAA; BLOCK_LENGTH]);
    }

    #[test]
    fn test_strip_padding_rejects_missing_marker() {
        let mut data = vec![0x01, 0x00, 0x00];
        assert!(matches!(strip_padding(&mut data), Err(Error::InvalidPadding)));
    }
}
