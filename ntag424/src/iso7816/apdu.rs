//! Structures related to application protocol data units (APDUs).
//!
//! The tag only speaks short-form APDUs; extended length is not supported
//! by its frame size and is not modeled here.


use std::fmt;
use std::io::{self, Write};


/// ISO-level success status word.
pub const SW_ISO_OK: u16 = 0x9000;
/// Native-command success status word.
pub const SW_OK: u16 = 0x9100;
/// Native status word chaining to an additional frame.
pub const SW_ADDITIONAL_FRAME: u16 = 0x91AF;


#[derive(Debug)]
pub enum WriteError {
    Io(io::Error),
    EmptyData,
    DataTooLong { maximum: usize, obtained: usize },
}
impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::EmptyData => write!(f, "data is, but must not be, empty"),
            Self::DataTooLong { maximum, obtained }
                => write!(f, "too much data: obtained {} bytes, expected maximum {} bytes", obtained, maximum),
        }
    }
}
impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::EmptyData => None,
            Self::DataTooLong { .. } => None,
        }
    }
}
impl From<io::Error> for WriteError {
    fn from(value: io::Error) -> Self { Self::Io(value) }
}


#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CommandHeader {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
}
impl CommandHeader {
    pub const fn to_bytes(&self) -> [u8; 4] {
        [self.cla, self.ins, self.p1, self.p2]
    }

    pub const fn to_be_u32(&self) -> u32 {
        u32::from_be_bytes(self.to_bytes())
    }
}
impl fmt::Debug for CommandHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CommandHeader {} cla: 0x{:02X}, ins: 0x{:02X}, p1: 0x{:02X}, p2: 0x{:02X} {}",
            '{', self.cla, self.ins, self.p1, self.p2, '}',
        )
    }
}


#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Data {
    NoData,
    RequestDataShort {
        request_data: Vec<u8>,
    },
    ResponseDataShort {
        response_data_length: u8,
    },
    BothDataShort {
        request_data: Vec<u8>,
        response_data_length: u8,
    },
}
impl Data {
    /// The number of response bytes requested, if any. A length byte of zero
    /// asks for the short-form maximum of 256 bytes.
    pub fn response_data_length(&self) -> Option<usize> {
        match self {
            Self::NoData => None,
            Self::RequestDataShort { .. } => None,
            Self::ResponseDataShort { response_data_length }
            | Self::BothDataShort { response_data_length, .. } => {
                Some(match response_data_length {
                    0 => 256,
                    n => (*n).into(),
                })
            },
        }
    }

    pub fn request_data(&self) -> Option<&[u8]> {
        match self {
            Self::NoData => None,
            Self::ResponseDataShort { .. } => None,
            Self::RequestDataShort { request_data }
            | Self::BothDataShort { request_data, .. } => Some(request_data.as_slice()),
        }
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        fn write_request_data<W: Write>(writer: &mut W, request_data: &[u8]) -> Result<(), WriteError> {
            if request_data.is_empty() {
                return Err(WriteError::EmptyData);
            }
            if request_data.len() > 256 {
                return Err(WriteError::DataTooLong { maximum: 256, obtained: request_data.len() });
            }
            let length_byte = if request_data.len() == 256 {
                0x00
            } else {
                request_data.len().try_into().unwrap()
            };
            // [Lc] [Data]
            writer.write_all(&[length_byte])?;
            writer.write_all(request_data)?;
            Ok(())
        }

        // "case" refers to the cases in ISO/IEC 7816-3:2006 § 12.1.3
        match self {
            Self::NoData => {
                // case 1
                Ok(())
            },
            Self::RequestDataShort { request_data } => {
                // case 3S
                write_request_data(writer, request_data)
            },
            Self::ResponseDataShort { response_data_length } => {
                // case 2S: [Le]
                writer.write_all(&[*response_data_length])?;
                Ok(())
            },
            Self::BothDataShort { request_data, response_data_length } => {
                // case 4S: [Lc] [Data] [Le]
                write_request_data(writer, request_data)?;
                writer.write_all(&[*response_data_length])?;
                Ok(())
            },
        }
    }
}


#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Apdu {
    pub header: CommandHeader,
    pub data: Data,
}
impl Apdu {
    /// Builds the wrapped-native framing used by every tag-native command:
    /// class `0x90`, the command byte as the instruction, and a zero
    /// response length byte.
    pub fn wrapped_native(command: u8, request_data: Vec<u8>) -> Self {
        let data = if request_data.is_empty() {
            Data::ResponseDataShort { response_data_length: 0 }
        } else {
            Data::BothDataShort { request_data, response_data_length: 0 }
        };
        Self {
            header: CommandHeader {
                cla: 0x90,
                ins: command,
                p1: 0x00,
                p2: 0x00,
            },
            data,
        }
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<(), WriteError> {
        writer.write_all(&self.header.to_bytes())?;
        self.data.write_bytes(writer)?;
        Ok(())
    }
}


#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResponseTrailer {
    pub sw1: u8,
    pub sw2: u8,
}
impl ResponseTrailer {
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    pub const fn to_word(&self) -> u16 {
        u16::from_be_bytes([self.sw1, self.sw2])
    }
}
impl fmt::Debug for ResponseTrailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResponseTrailer {} sw1: 0x{:02X}, sw2: 0x{:02X} {}", '{', self.sw1, self.sw2, '}')
    }
}


#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Response {
    pub data: Vec<u8>,
    pub trailer: ResponseTrailer,
}
impl Response {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 2 {
            return None;
        }
        Some(Self {
            data: bytes[..bytes.len() - 2].to_vec(),
            trailer: ResponseTrailer::new(bytes[bytes.len() - 2], bytes[bytes.len() - 1]),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn to_bytes(apdu: &Apdu) -> Vec<u8> {
        let mut buf = Vec::new();
        apdu.write_bytes(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_wrapped_native_with_data() {
        let apdu = Apdu::wrapped_native(0xC4, vec![0x01, 0x02, 0x03]);
        assert_eq!(
            to_bytes(&apdu),
            vec![0x90, 0xC4, 0x00, 0x00, 0x03, 0x01, 0x02, 0x03, 0x00],
        );
    }

    #[test]
    fn test_wrapped_native_without_data() {
        let apdu = Apdu::wrapped_native(0x60, Vec::new());
        assert_eq!(to_bytes(&apdu), vec![0x90, 0x60, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_case_3s_encoding() {
        let apdu = Apdu {
            header: CommandHeader { cla: 0x00, ins: 0xA4, p1: 0x04, p2: 0x0C },
            data: Data::RequestDataShort { request_data: vec![0xD2, 0x76] },
        };
        assert_eq!(to_bytes(&apdu), vec![0x00, 0xA4, 0x04, 0x0C, 0x02, 0xD2, 0x76]);
    }

    #[test]
    fn test_empty_request_data_is_rejected() {
        let apdu = Apdu {
            header: CommandHeader::default(),
            data: Data::RequestDataShort { request_data: Vec::new() },
        };
        let mut buf = Vec::new();
        assert!(matches!(apdu.write_bytes(&mut buf), Err(WriteError::EmptyData)));
    }

    #[test]
    fn test_zero_response_length_means_256() {
        let data = Data::ResponseDataShort { response_data_length: 0 };
        assert_eq!(data.response_data_length(), Some(256));
    }

    #[test]
    fn test_response_parsing() {
        let response = Response::from_slice(&[0xAA, 0xBB, 0x91, 0x00]).unwrap();
        assert_eq!(response.data, vec![0xAA, 0xBB]);
        assert_eq!(response.trailer.to_word(), SW_OK);
        assert!(Response::from_slice(&[0x91]).is_none());
    }
}
