//! EAP-AKA/AKA' attribute (TLV) layer
//!
//! Implements the message format shared by EAP-AKA (RFC 4187) and EAP-AKA'
//! (RFC 5448). An AKA message lives inside the Type-Data of an EAP
//! Request/Response with Type 23 or 50:
//!
//! ```text
//! +--------+----------+----------+
//! | Subtype| Reserved (2 bytes)  |
//! +--------+----------+----------+
//! | Type | Length | Value ...    |   repeated TLV attributes
//! +------+--------+--------------+
//! ```
//!
//! Attribute lengths are expressed in 4-byte units and cover the whole TLV
//! including the two header bytes. Attribute types below 128 are
//! non-skippable; unknown non-skippable attributes force rejection of a
//! Challenge.

use crate::eap::{EapCode, EapPacket, TYPE_AKA, TYPE_AKA_PRIME};
use hmac::{Hmac, Mac};
use md5_digest::Md5;
use sha2::Sha256;
use thiserror::Error;

type HmacMd5 = Hmac<Md5>;
type HmacSha256 = Hmac<Sha256>;

/// AT_RAND (1)
pub const AT_RAND: u8 = 1;
/// AT_AUTN (2)
pub const AT_AUTN: u8 = 2;
/// AT_RES (3)
pub const AT_RES: u8 = 3;
/// AT_AUTS (4)
pub const AT_AUTS: u8 = 4;
/// AT_PERMANENT_ID_REQ (10)
pub const AT_PERMANENT_ID_REQ: u8 = 10;
/// AT_MAC (11)
pub const AT_MAC: u8 = 11;
/// AT_ANY_ID_REQ (13)
pub const AT_ANY_ID_REQ: u8 = 13;
/// AT_IDENTITY (14)
pub const AT_IDENTITY: u8 = 14;
/// AT_FULLAUTH_ID_REQ (17)
pub const AT_FULLAUTH_ID_REQ: u8 = 17;
/// AT_KDF_INPUT (23) - RFC 5448
pub const AT_KDF_INPUT: u8 = 23;
/// AT_KDF (24) - RFC 5448
pub const AT_KDF: u8 = 24;

/// First skippable attribute type (RFC 4187 Section 8.2)
pub const SKIPPABLE_RANGE_START: u8 = 128;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AkaCodecError {
    #[error("AKA message too short: {0} bytes")]
    MessageTooShort(usize),

    #[error("EAP type {0} is not AKA or AKA'")]
    NotAkaType(u8),

    #[error("Unknown AKA subtype: {0}")]
    UnknownSubtype(u8),

    #[error("Attribute {attr_type} has invalid length {length}")]
    InvalidAttributeLength { attr_type: u8, length: usize },

    #[error("Attribute {0} overruns the message")]
    AttributeOverrun(u8),

    #[error("Attribute {0} has a malformed value")]
    MalformedAttribute(u8),

    #[error("AT_MAC is missing")]
    MissingMac,

    #[error(transparent)]
    Eap(#[from] crate::eap::EapError),
}

/// EAP-AKA subtypes (RFC 4187 Section 11)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AkaSubtype {
    /// AKA-Challenge (1)
    Challenge = 1,
    /// AKA-Authentication-Reject (2)
    AuthenticationReject = 2,
    /// AKA-Synchronization-Failure (4)
    SynchronizationFailure = 4,
    /// AKA-Identity (5)
    Identity = 5,
    /// Notification (12)
    Notification = 12,
    /// Re-authentication (13)
    Reauthentication = 13,
    /// Client-Error (14)
    ClientError = 14,
}

impl AkaSubtype {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AkaSubtype::Challenge),
            2 => Some(AkaSubtype::AuthenticationReject),
            4 => Some(AkaSubtype::SynchronizationFailure),
            5 => Some(AkaSubtype::Identity),
            12 => Some(AkaSubtype::Notification),
            13 => Some(AkaSubtype::Reauthentication),
            14 => Some(AkaSubtype::ClientError),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// MAC algorithm selected by the method type.
///
/// EAP-AKA protects AT_MAC with HMAC-MD5; EAP-AKA' uses HMAC-SHA-256
/// truncated to 16 bytes. Both cover the full EAP packet with the AT_MAC
/// value zeroed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAlgorithm {
    HmacMd5,
    HmacSha256,
}

impl MacAlgorithm {
    /// Algorithm used by the given EAP method type.
    pub fn for_method(method_type: u8) -> Self {
        if method_type == TYPE_AKA_PRIME {
            MacAlgorithm::HmacSha256
        } else {
            MacAlgorithm::HmacMd5
        }
    }

    pub fn compute(self, key: &[u8], data: &[u8]) -> [u8; 16] {
        let mut out = [0u8; 16];
        match self {
            MacAlgorithm::HmacMd5 => {
                let mut mac = HmacMd5::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                out.copy_from_slice(&mac.finalize().into_bytes());
            }
            MacAlgorithm::HmacSha256 => {
                let mut mac =
                    HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                out.copy_from_slice(&mac.finalize().into_bytes()[..16]);
            }
        }
        out
    }
}

/// A decoded AKA attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AkaAttribute {
    Rand([u8; 16]),
    Autn([u8; 16]),
    /// RES with its actual byte length; the bit-length prefix is handled by
    /// the codec.
    Res(Vec<u8>),
    Auts([u8; 14]),
    Mac([u8; 16]),
    PermanentIdReq,
    AnyIdReq,
    FullauthIdReq,
    Identity(String),
    KdfInput(String),
    Kdf(u16),
    /// Attribute the codec does not interpret; the padded value bytes are
    /// preserved verbatim.
    Unknown { attr_type: u8, value: Vec<u8> },
}

impl AkaAttribute {
    pub fn attr_type(&self) -> u8 {
        match self {
            AkaAttribute::Rand(_) => AT_RAND,
            AkaAttribute::Autn(_) => AT_AUTN,
            AkaAttribute::Res(_) => AT_RES,
            AkaAttribute::Auts(_) => AT_AUTS,
            AkaAttribute::Mac(_) => AT_MAC,
            AkaAttribute::PermanentIdReq => AT_PERMANENT_ID_REQ,
            AkaAttribute::AnyIdReq => AT_ANY_ID_REQ,
            AkaAttribute::FullauthIdReq => AT_FULLAUTH_ID_REQ,
            AkaAttribute::Identity(_) => AT_IDENTITY,
            AkaAttribute::KdfInput(_) => AT_KDF_INPUT,
            AkaAttribute::Kdf(_) => AT_KDF,
            AkaAttribute::Unknown { attr_type, .. } => *attr_type,
        }
    }

    /// Skippable attributes (type >= 128) may be ignored when unrecognized.
    pub fn is_skippable(&self) -> bool {
        self.attr_type() >= SKIPPABLE_RANGE_START
    }

    fn decode(attr_type: u8, value: &[u8]) -> Result<Self, AkaCodecError> {
        let malformed = || AkaCodecError::MalformedAttribute(attr_type);
        match attr_type {
            AT_RAND | AT_AUTN | AT_MAC => {
                // 2 reserved bytes then 16 bytes of payload
                if value.len() != 18 {
                    return Err(malformed());
                }
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&value[2..18]);
                Ok(match attr_type {
                    AT_RAND => AkaAttribute::Rand(bytes),
                    AT_AUTN => AkaAttribute::Autn(bytes),
                    _ => AkaAttribute::Mac(bytes),
                })
            }
            AT_RES => {
                if value.len() < 2 {
                    return Err(malformed());
                }
                let bits = u16::from_be_bytes([value[0], value[1]]) as usize;
                let res_len = bits.div_ceil(8);
                if res_len == 0 || value.len() < 2 + res_len {
                    return Err(malformed());
                }
                Ok(AkaAttribute::Res(value[2..2 + res_len].to_vec()))
            }
            AT_AUTS => {
                if value.len() != 14 {
                    return Err(malformed());
                }
                let mut bytes = [0u8; 14];
                bytes.copy_from_slice(value);
                Ok(AkaAttribute::Auts(bytes))
            }
            AT_PERMANENT_ID_REQ => Ok(AkaAttribute::PermanentIdReq),
            AT_ANY_ID_REQ => Ok(AkaAttribute::AnyIdReq),
            AT_FULLAUTH_ID_REQ => Ok(AkaAttribute::FullauthIdReq),
            AT_IDENTITY | AT_KDF_INPUT => {
                if value.len() < 2 {
                    return Err(malformed());
                }
                let actual = u16::from_be_bytes([value[0], value[1]]) as usize;
                if value.len() < 2 + actual {
                    return Err(malformed());
                }
                let text =
                    String::from_utf8(value[2..2 + actual].to_vec()).map_err(|_| malformed())?;
                Ok(if attr_type == AT_IDENTITY {
                    AkaAttribute::Identity(text)
                } else {
                    AkaAttribute::KdfInput(text)
                })
            }
            AT_KDF => {
                if value.len() != 2 {
                    return Err(malformed());
                }
                Ok(AkaAttribute::Kdf(u16::from_be_bytes([value[0], value[1]])))
            }
            _ => Ok(AkaAttribute::Unknown {
                attr_type,
                value: value.to_vec(),
            }),
        }
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        let value = match self {
            AkaAttribute::Rand(b) | AkaAttribute::Autn(b) | AkaAttribute::Mac(b) => {
                let mut v = vec![0u8; 2];
                v.extend_from_slice(b);
                v
            }
            AkaAttribute::Res(res) => {
                let bits = (res.len() * 8) as u16;
                let mut v = bits.to_be_bytes().to_vec();
                v.extend_from_slice(res);
                v
            }
            AkaAttribute::Auts(b) => b.to_vec(),
            AkaAttribute::PermanentIdReq | AkaAttribute::AnyIdReq | AkaAttribute::FullauthIdReq => {
                vec![0u8; 2]
            }
            AkaAttribute::Identity(text) | AkaAttribute::KdfInput(text) => {
                let bytes = text.as_bytes();
                let mut v = (bytes.len() as u16).to_be_bytes().to_vec();
                v.extend_from_slice(bytes);
                v
            }
            AkaAttribute::Kdf(id) => id.to_be_bytes().to_vec(),
            AkaAttribute::Unknown { value, .. } => value.clone(),
        };

        let mut padded = value;
        while (padded.len() + 2) % 4 != 0 {
            padded.push(0);
        }
        out.push(self.attr_type());
        out.push(((padded.len() + 2) / 4) as u8);
        out.extend_from_slice(&padded);
    }
}

/// A decoded EAP-AKA/AKA' message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AkaPacket {
    pub code: EapCode,
    pub identifier: u8,
    /// EAP method type (23 for AKA, 50 for AKA')
    pub method_type: u8,
    pub subtype: AkaSubtype,
    pub attributes: Vec<AkaAttribute>,
}

impl AkaPacket {
    pub fn new(code: EapCode, identifier: u8, method_type: u8, subtype: AkaSubtype) -> Self {
        AkaPacket {
            code,
            identifier,
            method_type,
            subtype,
            attributes: Vec::new(),
        }
    }

    /// Parse an AKA message from full EAP packet bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, AkaCodecError> {
        let eap = EapPacket::parse(raw)?;
        Self::from_eap(&eap)
    }

    /// Parse an AKA message from an already decoded EAP packet.
    pub fn from_eap(eap: &EapPacket) -> Result<Self, AkaCodecError> {
        let method_type = eap.eap_type.unwrap_or(0);
        if method_type != TYPE_AKA && method_type != TYPE_AKA_PRIME {
            return Err(AkaCodecError::NotAkaType(method_type));
        }
        // Subtype byte plus two reserved bytes precede the attributes.
        if eap.type_data.len() < 3 {
            return Err(AkaCodecError::MessageTooShort(eap.type_data.len()));
        }
        let subtype = AkaSubtype::from_u8(eap.type_data[0])
            .ok_or(AkaCodecError::UnknownSubtype(eap.type_data[0]))?;

        let mut attributes = Vec::new();
        let mut rest = &eap.type_data[3..];
        while !rest.is_empty() {
            if rest.len() < 2 {
                return Err(AkaCodecError::MessageTooShort(rest.len()));
            }
            let attr_type = rest[0];
            let encoded_len = rest[1] as usize * 4;
            if encoded_len == 0 {
                return Err(AkaCodecError::InvalidAttributeLength {
                    attr_type,
                    length: encoded_len,
                });
            }
            if encoded_len > rest.len() {
                return Err(AkaCodecError::AttributeOverrun(attr_type));
            }
            attributes.push(AkaAttribute::decode(attr_type, &rest[2..encoded_len])?);
            rest = &rest[encoded_len..];
        }

        Ok(AkaPacket {
            code: eap.code,
            identifier: eap.identifier,
            method_type,
            subtype,
            attributes,
        })
    }

    /// Encode to full EAP packet bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut type_data = Vec::new();
        type_data.push(self.subtype.as_u8());
        type_data.extend_from_slice(&[0u8; 2]);
        for attr in &self.attributes {
            attr.encode_into(&mut type_data);
        }

        EapPacket::new(
            self.code,
            self.identifier,
            Some(self.method_type),
            type_data,
        )
        .to_bytes()
    }

    /// Convert to an outer EAP packet.
    pub fn to_eap(&self) -> Result<EapPacket, AkaCodecError> {
        Ok(EapPacket::parse(&self.encode())?)
    }

    pub fn find_attribute(&self, attr_type: u8) -> Option<&AkaAttribute> {
        self.attributes.iter().find(|a| a.attr_type() == attr_type)
    }

    pub fn has_attribute(&self, attr_type: u8) -> bool {
        self.find_attribute(attr_type).is_some()
    }

    /// Unknown non-skippable attribute types, which must abort a Challenge.
    pub fn unknown_non_skippable(&self) -> Option<u8> {
        self.attributes.iter().find_map(|a| match a {
            AkaAttribute::Unknown { attr_type, .. } if *attr_type < SKIPPABLE_RANGE_START => {
                Some(*attr_type)
            }
            _ => None,
        })
    }

    /// Compute AT_MAC over the encoded packet and store it in the attribute.
    ///
    /// A zeroed AT_MAC placeholder is appended if not already present. The
    /// MAC covers the full EAP packet with the AT_MAC value zeroed.
    pub fn seal_mac(&mut self, k_aut: &[u8], algorithm: MacAlgorithm) {
        if !self.has_attribute(AT_MAC) {
            self.attributes.push(AkaAttribute::Mac([0u8; 16]));
        } else {
            for attr in self.attributes.iter_mut() {
                if let AkaAttribute::Mac(value) = attr {
                    *value = [0u8; 16];
                }
            }
        }
        let mac = algorithm.compute(k_aut, &self.encode());
        for attr in self.attributes.iter_mut() {
            if let AkaAttribute::Mac(value) = attr {
                *value = mac;
            }
        }
    }
}

/// Verify AT_MAC inside raw EAP packet bytes.
///
/// The received bytes are copied, the AT_MAC value is zeroed in place, and
/// the HMAC is compared against the original value. Operating on the wire
/// bytes keeps verification independent of re-encoding.
pub fn verify_message_mac(
    raw: &[u8],
    k_aut: &[u8],
    algorithm: MacAlgorithm,
) -> Result<bool, AkaCodecError> {
    let eap = EapPacket::parse(raw)?;
    let declared = eap.length();
    if !eap.code.has_type() || eap.type_data.len() < 3 {
        return Err(AkaCodecError::MessageTooShort(raw.len()));
    }

    // Walk the TLVs in the raw buffer to find the AT_MAC value offset.
    // Attribute data starts after EAP header (4) + type (1) + subtype (1)
    // + reserved (2).
    let mut offset = 8;
    let mac_value_offset = loop {
        if offset >= declared {
            return Err(AkaCodecError::MissingMac);
        }
        if offset + 2 > declared {
            return Err(AkaCodecError::MessageTooShort(declared - offset));
        }
        let attr_type = raw[offset];
        let encoded_len = raw[offset + 1] as usize * 4;
        if encoded_len == 0 {
            return Err(AkaCodecError::InvalidAttributeLength {
                attr_type,
                length: encoded_len,
            });
        }
        if offset + encoded_len > declared {
            return Err(AkaCodecError::AttributeOverrun(attr_type));
        }
        if attr_type == AT_MAC {
            if encoded_len != 20 {
                return Err(AkaCodecError::MalformedAttribute(AT_MAC));
            }
            // skip the TLV header and the two reserved bytes
            break offset + 4;
        }
        offset += encoded_len;
    };

    let mut received = [0u8; 16];
    received.copy_from_slice(&raw[mac_value_offset..mac_value_offset + 16]);

    let mut zeroed = raw[..declared].to_vec();
    zeroed[mac_value_offset..mac_value_offset + 16].fill(0);

    Ok(algorithm.compute(k_aut, &zeroed) == received)
}
