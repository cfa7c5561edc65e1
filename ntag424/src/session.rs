//! Session state of the authenticated channel and session key derivation.


use zeroize_derive::ZeroizeOnDrop;

use crate::crypt;


/// The live state of a mutually authenticated channel with one tag.
///
/// A `Session` is produced by a successful handshake (see [`crate::auth`])
/// and consumed by the command envelope (see [`crate::secure_messaging`]).
/// It must not be shared between threads or between tags; every physical tag
/// conversation owns exactly one `Session`.
///
/// Once a `ChangeKey` command for key slot 0 succeeds, the key the session
/// was derived from no longer matches the tag's active key and the session
/// is dead; the caller must drop it and authenticate again with the new key.
/// The session itself cannot detect this.
#[derive(ZeroizeOnDrop)]
pub struct Session {
    session_enc_key: [u8; 16],
    session_mac_key: [u8; 16],
    transaction_id: [u8; 4],
    command_counter: u16,
}
impl Session {
    /// Assembles a session from freshly derived keys and the transaction
    /// identifier issued by the tag. The command counter starts at zero.
    pub fn new(session_enc_key: [u8; 16], session_mac_key: [u8; 16], transaction_id: [u8; 4]) -> Self {
        Self {
            session_enc_key,
            session_mac_key,
            transaction_id,
            command_counter: 0,
        }
    }

    /// The session encryption key.
    pub fn enc_key(&self) -> &[u8; 16] {
        &self.session_enc_key
    }

    /// The session MAC key.
    pub fn mac_key(&self) -> &[u8; 16] {
        &self.session_mac_key
    }

    /// The 4-byte transaction identifier issued by the tag.
    pub fn transaction_id(&self) -> &[u8; 4] {
        &self.transaction_id
    }

    /// The current command counter.
    pub fn command_counter(&self) -> u16 {
        self.command_counter
    }

    /// Advances the command counter by one.
    ///
    /// The tag advances its own counter only when a command completes with a
    /// success status, so this must be called exactly once per successful
    /// command and never after a failure; anything else desynchronizes the
    /// session and every subsequent command fails authentication.
    pub fn commit_success(&mut self) {
        self.command_counter = self.command_counter.wrapping_add(1);
    }
}


/// Derives the session encryption and MAC keys from the static key and the
/// handshake nonces.
///
/// The derivation is equivalent to:
/// ```plain
/// SV1 = A5 5A 00 01 00 80 || RndA[0..2] || 00*8
/// SV2 = 5A A5 00 01 00 80 || RndA[0..2] || 00*8
/// session_enc_key = CMAC(static_key, SV1)
/// session_mac_key = CMAC(static_key, SV2)
/// ```
/// Both outputs are the full 16-byte CMAC; tag truncation applies only to
/// per-command authentication tags, never to key derivation. `RndB` does not
/// enter the session vectors.
pub fn derive_session_keys(
    static_key: &[u8; 16],
    rnd_a: &[u8; 16],
    _rnd_b: &[u8; 16],
) -> ([u8; 16], [u8; 16]) {
    let sv1 = session_vector([0xA5, 0x5A], rnd_a);
    let sv2 = session_vector([0x5A, 0xA5], rnd_a);
    (
        crypt::cmac_full(static_key, &sv1),
        crypt::cmac_full(static_key, &sv2),
    )
}

fn session_vector(prefix: [u8; 2], rnd_a: &[u8; 16]) -> [u8; 16] {
    let mut vector = [0u8; 16];
    vector[0..2].copy_from_slice(&prefix);
    vector[2..6].copy_from_slice(&[0x00, 0x01, 0x00, 0x80]);
    vector[6..8].copy_from_slice(&rnd_a[0..2]);
    vector
}
