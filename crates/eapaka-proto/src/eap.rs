//! EAP (Extensible Authentication Protocol) Support
//!
//! Outer EAP packet codec as defined in RFC 3748 plus the EAP-Message
//! fragmentation helpers for EAP over RADIUS (RFC 3579).
//!
//! # EAP Packet Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Code      |  Identifier   |            Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |  Type-Data ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use thiserror::Error;

/// EAP method type: Identity (RFC 3748)
pub const TYPE_IDENTITY: u8 = 1;
/// EAP method type: EAP-AKA (RFC 4187)
pub const TYPE_AKA: u8 = 23;
/// EAP method type: EAP-AKA' (RFC 5448)
pub const TYPE_AKA_PRIME: u8 = 50;

/// Maximum EAP-Message attribute value length (RFC 3579 Section 3.1)
pub const MAX_EAP_MESSAGE_CHUNK: usize = 253;

/// EAP packet code (first byte of EAP packet)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EapCode {
    /// Request packet (Code 1)
    Request = 1,
    /// Response packet (Code 2)
    Response = 2,
    /// Success packet (Code 3)
    Success = 3,
    /// Failure packet (Code 4)
    Failure = 4,
}

impl EapCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(EapCode::Request),
            2 => Some(EapCode::Response),
            3 => Some(EapCode::Success),
            4 => Some(EapCode::Failure),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Success and Failure packets carry no Type byte.
    pub fn has_type(self) -> bool {
        matches!(self, EapCode::Request | EapCode::Response)
    }
}

/// EAP-related errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EapError {
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("Invalid EAP code: {0}")]
    InvalidCode(u8),

    #[error("Invalid packet length: {0}")]
    InvalidLength(usize),
}

/// EAP packet structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapPacket {
    /// EAP code (Request, Response, Success, Failure)
    pub code: EapCode,
    /// Identifier for matching requests and responses (0-255)
    pub identifier: u8,
    /// EAP method type (only present for Request/Response)
    pub eap_type: Option<u8>,
    /// Type-specific data
    pub type_data: Vec<u8>,
}

impl EapPacket {
    pub fn new(code: EapCode, identifier: u8, eap_type: Option<u8>, type_data: Vec<u8>) -> Self {
        EapPacket {
            code,
            identifier,
            eap_type,
            type_data,
        }
    }

    /// Create an EAP-Response/Identity packet
    pub fn identity_response(identifier: u8, identity: &str) -> Self {
        EapPacket {
            code: EapCode::Response,
            identifier,
            eap_type: Some(TYPE_IDENTITY),
            type_data: identity.as_bytes().to_vec(),
        }
    }

    /// Parse EAP packet from bytes
    ///
    /// Rejects buffers shorter than the 4-byte header, a declared length
    /// below 4, and a declared length exceeding the buffer. Trailing bytes
    /// beyond the declared length are ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self, EapError> {
        if bytes.len() < 4 {
            return Err(EapError::PacketTooShort {
                expected: 4,
                actual: bytes.len(),
            });
        }

        let code = EapCode::from_u8(bytes[0]).ok_or(EapError::InvalidCode(bytes[0]))?;
        let identifier = bytes[1];
        let length = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;

        if length < 4 {
            return Err(EapError::InvalidLength(length));
        }
        if bytes.len() < length {
            return Err(EapError::PacketTooShort {
                expected: length,
                actual: bytes.len(),
            });
        }

        let (eap_type, type_data) = if code.has_type() {
            if length < 5 {
                return Err(EapError::InvalidLength(length));
            }
            (Some(bytes[4]), bytes[5..length].to_vec())
        } else {
            (None, Vec::new())
        };

        Ok(EapPacket {
            code,
            identifier,
            eap_type,
            type_data,
        })
    }

    /// Encode EAP packet to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let length = self.length();
        let mut bytes = Vec::with_capacity(length);

        bytes.push(self.code.as_u8());
        bytes.push(self.identifier);
        bytes.extend_from_slice(&(length as u16).to_be_bytes());

        if self.code.has_type() {
            bytes.push(self.eap_type.unwrap_or(0));
            bytes.extend_from_slice(&self.type_data);
        }

        bytes
    }

    /// Get the total length of the encoded packet
    pub fn length(&self) -> usize {
        if self.code.has_type() {
            4 + 1 + self.type_data.len()
        } else {
            4
        }
    }
}

/// Split an EAP payload into RADIUS EAP-Message chunks.
///
/// Per RFC 3579, an EAP packet larger than 253 bytes MUST be split across
/// consecutive EAP-Message attributes in order.
pub fn split_eap_message(payload: &[u8]) -> Vec<Vec<u8>> {
    payload
        .chunks(MAX_EAP_MESSAGE_CHUNK)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Concatenate EAP-Message chunks back into a single payload.
pub fn join_eap_message(chunks: &[Vec<u8>]) -> Vec<u8> {
    let total = chunks.iter().map(|c| c.len()).sum();
    let mut out = Vec::with_capacity(total);
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}
