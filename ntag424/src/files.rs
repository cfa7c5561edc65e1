//! File settings and Secure Dynamic Messaging layouts.
//!
//! These are the byte layouts carried by GetFileSettings and
//! ChangeFileSettings. Mirror offsets are taken as plain numbers; computing
//! them from an NDEF template is the caller's business.


use std::fmt;


/// File number of the capability container file.
pub const CC_FILE: u8 = 1;
/// File number of the NDEF data file.
pub const NDEF_FILE: u8 = 2;
/// File number of the proprietary data file.
pub const PROPRIETARY_FILE: u8 = 3;

/// Access condition granting free access.
pub const ACCESS_FREE: u8 = 0xE;
/// Access condition denying access.
pub const ACCESS_NONE: u8 = 0xF;


#[derive(Debug)]
pub enum Error {
    Truncated { obtained: usize },
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { obtained }
                => write!(f, "file settings of {} bytes end in the middle of a field", obtained),
        }
    }
}
impl std::error::Error for Error {
}


/// The four access conditions of a file, one key-slot nibble each.
///
/// `0x0` through `0x4` name a key slot, [`ACCESS_FREE`] grants free access,
/// [`ACCESS_NONE`] denies the operation altogether.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct AccessRights {
    pub read: u8,
    pub write: u8,
    pub read_write: u8,
    pub change: u8,
}
impl AccessRights {
    pub const fn to_bytes(self) -> [u8; 2] {
        [
            (self.read_write << 4) | (self.change & 0x0F),
            (self.read << 4) | (self.write & 0x0F),
        ]
    }

    pub const fn from_bytes(bytes: [u8; 2]) -> Self {
        Self {
            read: bytes[1] >> 4,
            write: bytes[1] & 0x0F,
            read_write: bytes[0] >> 4,
            change: bytes[0] & 0x0F,
        }
    }
}


/// Communication mode of a file.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CommMode {
    Plain,
    Macced,
    Full,
}
impl CommMode {
    pub const fn to_bits(self) -> u8 {
        match self {
            Self::Plain => 0b00,
            Self::Macced => 0b01,
            Self::Full => 0b11,
        }
    }

    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b01 => Self::Macced,
            0b11 => Self::Full,
            _ => Self::Plain,
        }
    }
}


/// Secure Dynamic Messaging mirror configuration.
///
/// Which offsets the tag expects depends on the access nibbles: an
/// encrypted-metadata configuration (`meta_read_access` naming a key slot)
/// carries the PICC-data offset, a plain configuration
/// (`meta_read_access == ACCESS_FREE`) carries the UID and read-counter
/// mirror offsets for the enabled mirrors, and any readable file
/// (`file_read_access != ACCESS_NONE`) carries the MAC input and MAC
/// offsets. Serialization writes exactly the offsets that are set; keeping
/// them consistent with the access nibbles is the caller's job.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SdmSettings {
    pub uid_mirror: bool,
    pub read_counter: bool,
    pub ascii_encoding: bool,
    pub meta_read_access: u8,
    pub file_read_access: u8,
    pub counter_retrieval_access: u8,
    pub uid_offset: Option<u32>,
    pub read_counter_offset: Option<u32>,
    pub picc_data_offset: Option<u32>,
    pub mac_input_offset: Option<u32>,
    pub mac_offset: Option<u32>,
}
impl SdmSettings {
    fn options_byte(&self) -> u8 {
        let mut options = 0u8;
        if self.uid_mirror {
            options |= 0x80;
        }
        if self.read_counter {
            options |= 0x40;
        }
        if self.ascii_encoding {
            options |= 0x01;
        }
        options
    }

    fn access_bytes(&self) -> [u8; 2] {
        [
            (self.meta_read_access << 4) | (self.file_read_access & 0x0F),
            0xF0 | (self.counter_retrieval_access & 0x0F),
        ]
    }

    fn serialize_into(&self, target: &mut Vec<u8>) {
        target.push(self.options_byte());
        target.extend_from_slice(&self.access_bytes());
        for offset in [
            self.uid_offset,
            self.read_counter_offset,
            self.picc_data_offset,
            self.mac_input_offset,
            self.mac_offset,
        ].into_iter().flatten() {
            target.extend_from_slice(&offset.to_le_bytes()[0..3]);
        }
    }

    fn parse(raw: &[u8], full_length: usize) -> Result<Self, Error> {
        if raw.len() < 3 {
            return Err(Error::Truncated { obtained: full_length });
        }
        let options = raw[0];
        let mut settings = Self {
            uid_mirror: options & 0x80 != 0,
            read_counter: options & 0x40 != 0,
            ascii_encoding: options & 0x01 != 0,
            meta_read_access: raw[1] >> 4,
            file_read_access: raw[1] & 0x0F,
            counter_retrieval_access: raw[2] & 0x0F,
            ..Self::default()
        };

        let mut cursor = &raw[3..];
        let mut take_offset = || -> Result<u32, Error> {
            if cursor.len() < 3 {
                return Err(Error::Truncated { obtained: full_length });
            }
            let offset = u32::from_le_bytes([cursor[0], cursor[1], cursor[2], 0]);
            cursor = &cursor[3..];
            Ok(offset)
        };

        if settings.meta_read_access == ACCESS_FREE {
            if settings.uid_mirror {
                settings.uid_offset = Some(take_offset()?);
            }
            if settings.read_counter {
                settings.read_counter_offset = Some(take_offset()?);
            }
        } else if settings.meta_read_access != ACCESS_NONE {
            settings.picc_data_offset = Some(take_offset()?);
        }
        if settings.file_read_access != ACCESS_NONE {
            settings.mac_input_offset = Some(take_offset()?);
            settings.mac_offset = Some(take_offset()?);
        }
        Ok(settings)
    }
}


/// Settings of a standard data file as reported by GetFileSettings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileSettings {
    pub file_type: u8,
    pub comm_mode: CommMode,
    pub access_rights: AccessRights,
    pub size: u32,
    pub sdm: Option<SdmSettings>,
}
impl FileSettings {
    pub fn parse(raw: &[u8]) -> Result<Self, Error> {
        if raw.len() < 7 {
            return Err(Error::Truncated { obtained: raw.len() });
        }
        let option = raw[1];
        let sdm = if option & 0x40 != 0 {
            Some(SdmSettings::parse(&raw[7..], raw.len())?)
        } else {
            None
        };
        Ok(Self {
            file_type: raw[0],
            comm_mode: CommMode::from_bits(option),
            access_rights: AccessRights::from_bytes([raw[2], raw[3]]),
            size: u32::from_le_bytes([raw[4], raw[5], raw[6], 0]),
            sdm,
        })
    }
}


/// The settings written by ChangeFileSettings.
///
/// File type and size are fixed properties of the file and are not part of
/// the update.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileSettingsUpdate {
    pub comm_mode: CommMode,
    pub access_rights: AccessRights,
    pub sdm: Option<SdmSettings>,
}
impl FileSettingsUpdate {
    pub fn serialize(&self) -> Vec<u8> {
        let mut data = Vec::new();
        let mut option = self.comm_mode.to_bits();
        if self.sdm.is_some() {
            option |= 0x40;
        }
        data.push(option);
        data.extend_from_slice(&self.access_rights.to_bytes());
        if let Some(sdm) = &self.sdm {
            sdm.serialize_into(&mut data);
        }
        data
    }
}


#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use super::*;

    #[test]
    fn test_access_rights_round_trip() {
        let rights = AccessRights { read: 0xE, write: 0x2, read_write: 0x0, change: 0x1 };
        let bytes = rights.to_bytes();
        assert_eq!(bytes, [0x01, 0xE2]);
        assert_eq!(AccessRights::from_bytes(bytes), rights);
    }

    #[test]
    fn test_comm_mode_bits() {
        assert_eq!(CommMode::from_bits(0b00), CommMode::Plain);
        assert_eq!(CommMode::from_bits(0b01), CommMode::Macced);
        assert_eq!(CommMode::from_bits(0b11), CommMode::Full);
        for mode in [CommMode::Plain, CommMode::Macced, CommMode::Full] {
            assert_eq!(CommMode::from_bits(mode.to_bits()), mode);
        }
    }

    #[test]
    fn test_plain_file_settings_parse() {
        // standard data file, full comm mode, free read, 256 bytes
        let raw = hex!("0003E0EE000100");
        let settings = FileSettings::parse(&raw).unwrap();
        assert_eq!(settings.file_type, 0x00);
        assert_eq!(settings.comm_mode, CommMode::Full);
        assert_eq!(settings.access_rights.read, 0xE);
        assert_eq!(settings.access_rights.write, 0xE);
        assert_eq!(settings.access_rights.read_write, 0xE);
        assert_eq!(settings.access_rights.change, 0x0);
        assert_eq!(settings.size, 256);
        assert!(settings.sdm.is_none());
    }

    #[test]
    fn test_truncated_settings_are_rejected() {
        assert!(matches!(
            FileSettings::parse(&hex!("0003E0EE00")),
            Err(Error::Truncated { obtained: 5 }),
        ));
    }

    #[test]
    fn test_sdm_update_round_trips_through_settings() {
        let sdm = SdmSettings {
            uid_mirror: true,
            read_counter: true,
            ascii_encoding: true,
            meta_read_access: 0x0,
            file_read_access: 0x0,
            counter_retrieval_access: 0x0,
            picc_data_offset: Some(0x20),
            mac_input_offset: Some(0x40),
            mac_offset: Some(0x40),
            ..SdmSettings::default()
        };
        let update = FileSettingsUpdate {
            comm_mode: CommMode::Plain,
            access_rights: AccessRights { read: 0xE, write: 0xE, read_write: 0xE, change: 0x0 },
            sdm: Some(sdm.clone()),
        };

        let serialized = update.serialize();
        assert_eq!(serialized[0], 0x40);

        // splice the fixed file properties back in, as GetFileSettings reports them
        let mut reported = vec![0x00];
        reported.extend_from_slice(&serialized[0..3]);
        reported.extend_from_slice(&[0x00, 0x01, 0x00]);
        reported.extend_from_slice(&serialized[3..]);
        let parsed = FileSettings::parse(&reported).unwrap();
        assert_eq!(parsed.sdm.as_ref(), Some(&sdm));
        assert_eq!(parsed.access_rights, update.access_rights);
    }

    #[test]
    fn test_plain_mirror_offsets_parse() {
        let sdm = SdmSettings {
            uid_mirror: true,
            read_counter: true,
            ascii_encoding: true,
            meta_read_access: ACCESS_FREE,
            file_read_access: ACCESS_NONE,
            counter_retrieval_access: ACCESS_FREE,
            uid_offset: Some(0x1A),
            read_counter_offset: Some(0x30),
            ..SdmSettings::default()
        };
        let mut serialized = Vec::new();
        sdm.serialize_into(&mut serialized);
        let parsed = SdmSettings::parse(&serialized, serialized.len()).unwrap();
        assert_eq!(parsed, sdm);
    }
}
