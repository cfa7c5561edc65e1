//! EV2 mutual authentication.


use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument};

use crate::crypt::{self, ZERO_IV};
use crate::iso7816::apdu::{Apdu, SW_ADDITIONAL_FRAME, SW_OK};
use crate::iso7816::card::{CommunicationError, SmartCard};
use crate::session::{derive_session_keys, Session};


/// Command code of the first authentication phase.
pub const AUTHENTICATE_EV2_FIRST: u8 = 0x71;
/// Command code continuing a multi-frame exchange.
pub const ADDITIONAL_FRAME: u8 = 0xAF;


#[derive(Debug)]
pub enum HandshakeError {
    ChallengeRefused { status: u16 },
    ChallengeLength { obtained: usize },
    VerificationRefused { status: u16 },
    VerificationLength { obtained: usize },
    ProofMismatch,
}
impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChallengeRefused { status }
                => write!(f, "tag refused the authentication request with status 0x{:04X}", status),
            Self::ChallengeLength { obtained }
                => write!(f, "challenge has length {}, expected 16", obtained),
            Self::VerificationRefused { status }
                => write!(f, "tag refused the authentication proof with status 0x{:04X}", status),
            Self::VerificationLength { obtained }
                => write!(f, "verification data has length {}, expected 32", obtained),
            Self::ProofMismatch
                => write!(f, "tag returned an incorrectly rotated reader nonce"),
        }
    }
}
impl std::error::Error for HandshakeError {
}


#[derive(Clone, Copy)]
enum State {
    Idle,
    AwaitingChallenge,
    AwaitingVerification { rnd_a: [u8; 16], rnd_b: [u8; 16] },
    Established,
    Failed,
}

/// The two-phase mutual authentication exchange, at the message level.
///
/// `Handshake` owns nonce handling, static-key encryption and the proof
/// check; it never talks to a transport. [`authenticate`] drives it over a
/// [`SmartCard`]. All handshake encryption runs under a zero IV with the
/// static key; session-derived IVs only exist once a [`Session`] is
/// established.
///
/// Methods must be called in order (`first_message`, `challenge_response`,
/// `verify`) and panic when called out of turn; that is a caller bug, not a
/// protocol condition. Any protocol failure is terminal: the handshake must
/// be restarted from scratch, there is no retry-in-place.
pub struct Handshake {
    key_no: u8,
    key: [u8; 16],
    state: State,
}
impl Handshake {
    pub fn new(key_no: u8, key: &[u8; 16]) -> Self {
        Self {
            key_no,
            key: *key,
            state: State::Idle,
        }
    }

    /// Returns the payload of the first-phase authentication request.
    pub fn first_message(&mut self) -> [u8; 2] {
        let State::Idle = self.state else {
            panic!("first_message called on a handshake that has already started");
        };
        self.state = State::AwaitingChallenge;
        [self.key_no, 0x00]
    }

    /// Consumes the tag's challenge and produces the second-phase payload.
    ///
    /// The challenge carries `E(key, IV=0, RndB)`. The reply payload is
    /// `E(key, IV=0, RndA || RndB <<< 8)` over two chained blocks. `rnd_a`
    /// must be freshly generated for every handshake; reusing it across
    /// handshakes is a protocol violation.
    pub fn challenge_response(
        &mut self,
        challenge: &[u8],
        rnd_a: [u8; 16],
    ) -> Result<[u8; 32], HandshakeError> {
        let State::AwaitingChallenge = self.state else {
            panic!("challenge_response called before first_message");
        };
        let Ok(mut rnd_b) = <[u8; 16]>::try_from(challenge) else {
            self.state = State::Failed;
            return Err(HandshakeError::ChallengeLength { obtained: challenge.len() });
        };
        crypt::aes_cbc_decrypt(&self.key, &ZERO_IV, &mut rnd_b);

        let mut message = [0u8; 32];
        message[0..16].copy_from_slice(&rnd_a);
        message[16..32].copy_from_slice(&crypt::rotate_left_once(&rnd_b));
        crypt::aes_cbc_encrypt(&self.key, &ZERO_IV, &mut message);

        self.state = State::AwaitingVerification { rnd_a, rnd_b };
        Ok(message)
    }

    /// Verifies the tag's proof and yields the established session.
    ///
    /// The verification data decrypts to
    /// `Ti(4) || RndA'(16) || PDcap(6) || PCDcap(6)`. The tag proves
    /// knowledge of the static key by returning `RndA'`, the reader nonce
    /// rotated left by one byte; on mismatch no session is produced.
    pub fn verify(&mut self, verification: &[u8]) -> Result<Session, HandshakeError> {
        let State::AwaitingVerification { rnd_a, rnd_b } = self.state else {
            panic!("verify called before challenge_response");
        };
        let Ok(mut plain) = <[u8; 32]>::try_from(verification) else {
            self.state = State::Failed;
            return Err(HandshakeError::VerificationLength { obtained: verification.len() });
        };
        crypt::aes_cbc_decrypt(&self.key, &ZERO_IV, &mut plain);

        let mut transaction_id = [0u8; 4];
        transaction_id.copy_from_slice(&plain[0..4]);
        let expected_rnd_a = crypt::rotate_left_once(&rnd_a);
        if !bool::from(plain[4..20].ct_eq(&expected_rnd_a)) {
            self.state = State::Failed;
            return Err(HandshakeError::ProofMismatch);
        }
        debug!(
            pd_capabilities = %hex::encode(&plain[20..26]),
            pcd_capabilities = %hex::encode(&plain[26..32]),
            "tag proof verified"
        );

        let (session_enc_key, session_mac_key) = derive_session_keys(&self.key, &rnd_a, &rnd_b);
        self.state = State::Established;
        Ok(Session::new(session_enc_key, session_mac_key, transaction_id))
    }
}


/// Runs the full mutual authentication against the given key slot with a
/// freshly generated reader nonce.
#[instrument(skip(card, key))]
pub fn authenticate(
    card: &mut dyn SmartCard,
    key_no: u8,
    key: &[u8; 16],
) -> Result<Session, CommunicationError> {
    let mut rnd_a = [0u8; 16];
    OsRng.fill_bytes(&mut rnd_a);
    authenticate_from_values(card, key_no, key, rnd_a)
}

/// Runs the full mutual authentication with a caller-supplied reader nonce.
///
/// Production callers want [`authenticate`]; this entry point exists so the
/// exchange can be exercised against fixed nonces.
pub fn authenticate_from_values(
    card: &mut dyn SmartCard,
    key_no: u8,
    key: &[u8; 16],
    rnd_a: [u8; 16],
) -> Result<Session, CommunicationError> {
    let mut handshake = Handshake::new(key_no, key);

    let first = Apdu::wrapped_native(AUTHENTICATE_EV2_FIRST, handshake.first_message().to_vec());
    let challenge = card.communicate(&first)?;
    if challenge.trailer.to_word() != SW_ADDITIONAL_FRAME {
        return Err(HandshakeError::ChallengeRefused { status: challenge.trailer.to_word() }.into());
    }

    let proof = handshake.challenge_response(&challenge.data, rnd_a)?;
    let second = Apdu::wrapped_native(ADDITIONAL_FRAME, proof.to_vec());
    let verification = card.communicate(&second)?;
    if verification.trailer.to_word() != SW_OK {
        return Err(HandshakeError::VerificationRefused { status: verification.trailer.to_word() }.into());
    }

    let session = handshake.verify(&verification.data)?;
    Ok(session)
}
