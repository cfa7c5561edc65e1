//! Native command dispatch over the authenticated channel.
//!
//! Everything here builds command-specific plaintext and pushes it through
//! the envelope in [`crate::secure_messaging`]; session keys, IVs and
//! counters are never touched directly.


use std::fmt;

use tracing::instrument;

use crate::auth::ADDITIONAL_FRAME;
use crate::files::{self, FileSettings, FileSettingsUpdate};
use crate::iso7816::apdu::{Apdu, CommandHeader, Data, SW_ADDITIONAL_FRAME, SW_ISO_OK, SW_OK};
use crate::iso7816::card::{CommunicationError, SmartCard};
use crate::key_change::{build_key_change_payload, KeyChangeRequest};
use crate::secure_messaging::{self, MAC_LENGTH};
use crate::session::Session;


pub const GET_VERSION: u8 = 0x60;
pub const GET_CARD_UID: u8 = 0x51;
pub const GET_KEY_VERSION: u8 = 0x64;
pub const CHANGE_KEY: u8 = 0xC4;
pub const READ_DATA: u8 = 0xAD;
pub const WRITE_DATA: u8 = 0x8D;
pub const GET_FILE_SETTINGS: u8 = 0xF5;
pub const CHANGE_FILE_SETTINGS: u8 = 0x5F;

/// Application identifier of the NDEF application hosting the tag's files.
pub const NDEF_APPLICATION_AID: [u8; 7] = [0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];

/// Largest data slice moved by a single ReadData or WriteData command.
///
/// Larger transfers are split into consecutive commands, each with its own
/// envelope and its own counter commit.
pub const MAX_CHUNK: usize = 192;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Operation {
    SelectApplication,
    GetVersion,
    GetCardUid,
    GetKeyVersion,
    ChangeKey,
    ReadData,
    WriteData,
    GetFileSettings,
    ChangeFileSettings,
}
impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelectApplication => write!(f, "ISOSelectFile"),
            Self::GetVersion => write!(f, "GetVersion"),
            Self::GetCardUid => write!(f, "GetCardUID"),
            Self::GetKeyVersion => write!(f, "GetKeyVersion"),
            Self::ChangeKey => write!(f, "ChangeKey"),
            Self::ReadData => write!(f, "ReadData"),
            Self::WriteData => write!(f, "WriteData"),
            Self::GetFileSettings => write!(f, "GetFileSettings"),
            Self::ChangeFileSettings => write!(f, "ChangeFileSettings"),
        }
    }
}


#[derive(Debug)]
pub enum Error {
    OperationFailed { operation: Operation, status: u16 },
    ResponseLength { operation: Operation, obtained: usize },
    Settings(files::Error),
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperationFailed { operation, status }
                => write!(f, "{} failed with status 0x{:04X}", operation, status),
            Self::ResponseLength { operation, obtained }
                => write!(f, "{} response has unexpected length {}", operation, obtained),
            Self::Settings(e)
                => write!(f, "file settings malformed: {}", e),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::OperationFailed { .. } => None,
            Self::ResponseLength { .. } => None,
            Self::Settings(e) => Some(e),
        }
    }
}


/// Sends a fully protected command and returns the decrypted response
/// payload (with its padding still in place). Commits the counter on
/// success, leaves it untouched on any failure.
fn exchange_full(
    card: &mut dyn SmartCard,
    session: &mut Session,
    operation: Operation,
    command: u8,
    header: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CommunicationError> {
    let data = secure_messaging::wrap_command(session, command, header, plaintext)?;
    let response = card.communicate(&Apdu::wrapped_native(command, data))?;
    let status = response.trailer.to_word();
    if status != SW_OK {
        return Err(Error::OperationFailed { operation, status }.into());
    }
    if response.data.len() < MAC_LENGTH {
        return Err(Error::ResponseLength { operation, obtained: response.data.len() }.into());
    }

    let body = &response.data[..response.data.len() - MAC_LENGTH];
    let plaintext = if body.is_empty() {
        Vec::new()
    } else {
        secure_messaging::unwrap_response(session, body)?
    };
    session.commit_success();
    Ok(plaintext)
}

/// Sends a MAC-mode command and returns the clear response payload.
/// Counter discipline as in [`exchange_full`].
fn exchange_macced(
    card: &mut dyn SmartCard,
    session: &mut Session,
    operation: Operation,
    command: u8,
    header: &[u8],
    payload: &[u8],
) -> Result<Vec<u8>, CommunicationError> {
    let data = secure_messaging::wrap_command_mac(session, command, header, payload);
    let response = card.communicate(&Apdu::wrapped_native(command, data))?;
    let status = response.trailer.to_word();
    if status != SW_OK {
        return Err(Error::OperationFailed { operation, status }.into());
    }
    if response.data.len() < MAC_LENGTH {
        return Err(Error::ResponseLength { operation, obtained: response.data.len() }.into());
    }

    let body = response.data[..response.data.len() - MAC_LENGTH].to_vec();
    session.commit_success();
    Ok(body)
}


/// Selects the NDEF application. Required once after the tag is activated,
/// before authentication.
#[instrument(skip(card))]
pub fn select_application(card: &mut dyn SmartCard) -> Result<(), CommunicationError> {
    let apdu = Apdu {
        header: CommandHeader {
            cla: 0x00,
            ins: 0xA4, // ISOSelectFile
            p1: 0x04,  // select by DF name
            p2: 0x0C,  // no response data
        },
        data: Data::RequestDataShort {
            request_data: NDEF_APPLICATION_AID.to_vec(),
        },
    };
    let response = card.communicate(&apdu)?;
    if response.trailer.to_word() != SW_ISO_OK {
        return Err(Error::OperationFailed {
            operation: Operation::SelectApplication,
            status: response.trailer.to_word(),
        }.into());
    }
    Ok(())
}


/// One half of the chip identification: either the hardware or the software
/// side of a GetVersion response.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ComponentVersion {
    pub vendor: u8,
    pub product_type: u8,
    pub product_subtype: u8,
    pub major: u8,
    pub minor: u8,
    pub storage_size: u8,
    pub protocol: u8,
}
impl ComponentVersion {
    fn parse(raw: &[u8]) -> Self {
        Self {
            vendor: raw[0],
            product_type: raw[1],
            product_subtype: raw[2],
            major: raw[3],
            minor: raw[4],
            storage_size: raw[5],
            protocol: raw[6],
        }
    }
}

/// Chip identification reported by GetVersion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VersionInfo {
    pub hardware: ComponentVersion,
    pub software: ComponentVersion,
    pub uid: [u8; 7],
    pub batch: Vec<u8>,
    pub production_week: u8,
    pub production_year: u8,
}

/// Reads the chip identification. Runs outside any session; the response
/// arrives in three plain frames chained with additional-frame statuses.
#[instrument(skip(card))]
pub fn get_version(card: &mut dyn SmartCard) -> Result<VersionInfo, CommunicationError> {
    let mut frames = Vec::new();
    let mut response = card.communicate(&Apdu::wrapped_native(GET_VERSION, Vec::new()))?;
    loop {
        frames.extend_from_slice(&response.data);
        match response.trailer.to_word() {
            SW_OK => break,
            SW_ADDITIONAL_FRAME => {
                response = card.communicate(&Apdu::wrapped_native(ADDITIONAL_FRAME, Vec::new()))?;
            },
            status => {
                return Err(Error::OperationFailed { operation: Operation::GetVersion, status }.into());
            },
        }
    }
    if frames.len() < 23 {
        return Err(Error::ResponseLength {
            operation: Operation::GetVersion,
            obtained: frames.len(),
        }.into());
    }

    let production = &frames[14..];
    let mut uid = [0u8; 7];
    uid.copy_from_slice(&production[0..7]);
    Ok(VersionInfo {
        hardware: ComponentVersion::parse(&frames[0..7]),
        software: ComponentVersion::parse(&frames[7..14]),
        uid,
        batch: production[7..production.len() - 2].to_vec(),
        production_week: production[production.len() - 2],
        production_year: production[production.len() - 1],
    })
}

/// Reads the 7-byte card UID through the encrypted channel.
#[instrument(skip(card, session))]
pub fn get_card_uid(
    card: &mut dyn SmartCard,
    session: &mut Session,
) -> Result<[u8; 7], CommunicationError> {
    let mut plaintext = exchange_full(card, session, Operation::GetCardUid, GET_CARD_UID, &[], &[])?;
    secure_messaging::strip_padding(&mut plaintext)?;
    if plaintext.len() != 7 {
        return Err(Error::ResponseLength {
            operation: Operation::GetCardUid,
            obtained: plaintext.len(),
        }.into());
    }
    let mut uid = [0u8; 7];
    uid.copy_from_slice(&plaintext);
    Ok(uid)
}

/// Reads the version byte stored for a key slot.
#[instrument(skip(card, session))]
pub fn get_key_version(
    card: &mut dyn SmartCard,
    session: &mut Session,
    key_no: u8,
) -> Result<u8, CommunicationError> {
    let body = exchange_macced(card, session, Operation::GetKeyVersion, GET_KEY_VERSION, &[key_no], &[])?;
    if body.len() != 1 {
        return Err(Error::ResponseLength {
            operation: Operation::GetKeyVersion,
            obtained: body.len(),
        }.into());
    }
    Ok(body[0])
}

/// Changes one tag key in place.
///
/// A successful change of key slot 0 invalidates the session it was sent
/// through: the key the session was derived from is gone. Drop the session
/// immediately and authenticate again with the new key.
#[instrument(skip(card, session, request), fields(key_no = request.key_no))]
pub fn change_key(
    card: &mut dyn SmartCard,
    session: &mut Session,
    request: &KeyChangeRequest,
) -> Result<(), CommunicationError> {
    let payload = build_key_change_payload(request)?;
    exchange_full(card, session, Operation::ChangeKey, CHANGE_KEY, &[request.key_no], &payload)?;
    Ok(())
}

fn data_header(file_no: u8, offset: u32, length: u32) -> [u8; 7] {
    let mut header = [0u8; 7];
    header[0] = file_no;
    header[1..4].copy_from_slice(&offset.to_le_bytes()[0..3]);
    header[4..7].copy_from_slice(&length.to_le_bytes()[0..3]);
    header
}

/// Reads `length` bytes from a file through the encrypted channel,
/// splitting large reads into [`MAX_CHUNK`]-sized commands.
#[instrument(skip(card, session))]
pub fn read_data(
    card: &mut dyn SmartCard,
    session: &mut Session,
    file_no: u8,
    offset: u32,
    length: u32,
) -> Result<Vec<u8>, CommunicationError> {
    let mut contents = Vec::with_capacity(length as usize);
    let mut position = offset;
    let mut remaining = length as usize;
    while remaining > 0 {
        let chunk_length = remaining.min(MAX_CHUNK);
        let header = data_header(file_no, position, chunk_length as u32);
        let mut chunk = exchange_full(card, session, Operation::ReadData, READ_DATA, &header, &[])?;
        secure_messaging::strip_padding(&mut chunk)?;
        if chunk.len() != chunk_length {
            return Err(Error::ResponseLength {
                operation: Operation::ReadData,
                obtained: chunk.len(),
            }.into());
        }
        contents.extend_from_slice(&chunk);
        position += chunk_length as u32;
        remaining -= chunk_length;
    }
    Ok(contents)
}

/// Writes data into a file through the encrypted channel, splitting large
/// writes into [`MAX_CHUNK`]-sized commands. Each chunk is its own
/// authenticated command; a failure leaves the counter at the failed chunk
/// and the write incomplete.
#[instrument(skip(card, session, data), fields(length = data.len()))]
pub fn write_data(
    card: &mut dyn SmartCard,
    session: &mut Session,
    file_no: u8,
    offset: u32,
    data: &[u8],
) -> Result<(), CommunicationError> {
    let mut position = offset;
    for chunk in data.chunks(MAX_CHUNK) {
        let header = data_header(file_no, position, chunk.len() as u32);
        let mut payload = chunk.to_vec();
        secure_messaging::pad_payload(&mut payload);
        exchange_full(card, session, Operation::WriteData, WRITE_DATA, &header, &payload)?;
        position += chunk.len() as u32;
    }
    Ok(())
}

/// Reads the settings of a file.
#[instrument(skip(card, session))]
pub fn get_file_settings(
    card: &mut dyn SmartCard,
    session: &mut Session,
    file_no: u8,
) -> Result<FileSettings, CommunicationError> {
    let body = exchange_macced(card, session, Operation::GetFileSettings, GET_FILE_SETTINGS, &[file_no], &[])?;
    let settings = FileSettings::parse(&body).map_err(Error::Settings)?;
    Ok(settings)
}

/// Rewrites the settings of a file, including its SDM configuration.
#[instrument(skip(card, session, update))]
pub fn change_file_settings(
    card: &mut dyn SmartCard,
    session: &mut Session,
    file_no: u8,
    update: &FileSettingsUpdate,
) -> Result<(), CommunicationError> {
    let mut payload = update.serialize();
    secure_messaging::pad_payload(&mut payload);
    exchange_full(card, session, Operation::ChangeFileSettings, CHANGE_FILE_SETTINGS, &[file_no], &payload)?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_header_layout() {
        let header = data_header(0x02, 0x000120, 0x0000C0);
        assert_eq!(header, [0x02, 0x20, 0x01, 0x00, 0xC0, 0x00, 0x00]);
    }
}
