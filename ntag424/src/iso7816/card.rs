//! The smart-card interface and its PC/SC implementation.


use std::fmt;

use tracing::trace;

use crate::auth;
use crate::commands;
use crate::iso7816::apdu;
use crate::key_change;
use crate::secure_messaging;


#[derive(Debug)]
pub enum CommunicationError {
    Write(apdu::WriteError),
    Pcsc(pcsc::Error),
    ShortResponse,
    Handshake(auth::HandshakeError),
    Envelope(secure_messaging::Error),
    KeyChange(key_change::Error),
    Command(commands::Error),
}
impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write(e) => write!(f, "APDU write error: {}", e),
            Self::Pcsc(e) => write!(f, "PCSC error: {}", e),
            Self::ShortResponse => write!(f, "response too short"),
            Self::Handshake(e) => write!(f, "authentication error: {}", e),
            Self::Envelope(e) => write!(f, "secure messaging error: {}", e),
            Self::KeyChange(e) => write!(f, "key change error: {}", e),
            Self::Command(e) => write!(f, "command error: {}", e),
        }
    }
}
impl std::error::Error for CommunicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Write(e) => Some(e),
            Self::Pcsc(e) => Some(e),
            Self::ShortResponse => None,
            Self::Handshake(e) => Some(e),
            Self::Envelope(e) => Some(e),
            Self::KeyChange(e) => Some(e),
            Self::Command(e) => Some(e),
        }
    }
}
impl From<apdu::WriteError> for CommunicationError {
    fn from(value: apdu::WriteError) -> Self { Self::Write(value) }
}
impl From<pcsc::Error> for CommunicationError {
    fn from(value: pcsc::Error) -> Self { Self::Pcsc(value) }
}
impl From<auth::HandshakeError> for CommunicationError {
    fn from(value: auth::HandshakeError) -> Self { Self::Handshake(value) }
}
impl From<secure_messaging::Error> for CommunicationError {
    fn from(value: secure_messaging::Error) -> Self { Self::Envelope(value) }
}
impl From<key_change::Error> for CommunicationError {
    fn from(value: key_change::Error) -> Self { Self::KeyChange(value) }
}
impl From<commands::Error> for CommunicationError {
    fn from(value: commands::Error) -> Self { Self::Command(value) }
}


/// A smart card compatible with ISO/IEC 7816.
///
/// One call models one complete request/response round-trip; any
/// transport-level fragmentation is reassembled below this interface.
pub trait SmartCard {
    /// Send a request APDU to the smart card and receive a response APDU.
    fn communicate(&mut self, request: &apdu::Apdu) -> Result<apdu::Response, CommunicationError>;
}
impl SmartCard for pcsc::Card {
    fn communicate(&mut self, request: &apdu::Apdu) -> Result<apdu::Response, CommunicationError> {
        let mut out_buf = Vec::new();
        request.write_bytes(&mut out_buf)?;
        trace!(request = %hex::encode(&out_buf), "transmitting");
        let mut in_buf = vec![0u8; request.data.response_data_length().unwrap_or(0) + 2];
        let in_slice = self.transmit(&out_buf, &mut in_buf)?;
        trace!(response = %hex::encode(in_slice), "received");
        apdu::Response::from_slice(in_slice)
            .ok_or(CommunicationError::ShortResponse)
    }
}
