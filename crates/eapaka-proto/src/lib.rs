//! Wire formats and cryptographic primitives for EAP-AKA/AKA' testing
//! against RADIUS authentication servers.
//!
//! This crate provides the protocol layers shared by the conformance
//! tester:
//!
//! - RADIUS packet and attribute encoding/decoding (RFC 2865)
//! - Message-Authenticator calculation (RFC 2869)
//! - EAP packet codec and EAP-Message fragmentation (RFC 3748, RFC 3579)
//! - EAP-AKA attribute (TLV) layer and AT_MAC handling (RFC 4187, RFC 5448)
//! - MS-MPPE vendor key extraction (RFC 2548)
//! - Milenage f1/f1*/f2-f5/f5* and AUTS generation (3GPP TS 35.206)
//! - EAP-AKA and EAP-AKA' key derivation (RFC 4187 Appendix A, RFC 5448)
//!
//! # Example
//!
//! ```rust
//! use eapaka_proto::{Attribute, AttributeType, Code, Packet};
//! use eapaka_proto::auth::generate_request_authenticator;
//!
//! let mut packet = Packet::new(Code::AccessRequest, 1, generate_request_authenticator());
//! packet.add_attribute(Attribute::string(AttributeType::UserName as u8, "0440100123456789@example").unwrap());
//! let bytes = packet.encode().unwrap();
//! assert_eq!(bytes[0], 1);
//! ```

pub mod aka;
pub mod attributes;
pub mod auth;
pub mod eap;
pub mod kdf;
pub mod message_auth;
pub mod milenage;
pub mod mppe;
pub mod packet;

pub use aka::{AkaAttribute, AkaCodecError, AkaPacket, AkaSubtype, MacAlgorithm};
pub use attributes::{Attribute, AttributeType};
pub use auth::{
    calculate_response_authenticator, generate_request_authenticator,
    verify_response_authenticator,
};
pub use eap::{EapCode, EapError, EapPacket, join_eap_message, split_eap_message};
pub use kdf::{EapAkaKeys, derive_ck_ik_prime, derive_keys_aka, derive_keys_aka_prime};
pub use message_auth::{calculate_message_authenticator, set_message_authenticator};
pub use milenage::Milenage;
pub use mppe::{MppeError, MppeKeys, extract_mppe_keys};
pub use packet::{Code, Packet, PacketError};
