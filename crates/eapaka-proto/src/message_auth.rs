//! Message-Authenticator Support (RFC 2869)
//!
//! Per RFC 2869 Section 5.14 the Message-Authenticator is HMAC-MD5 over the
//! entire RADIUS packet with the attribute value set to all zeros during
//! calculation. It is required for any Access-Request that carries
//! EAP-Message attributes (RFC 3579 Section 3.2).

use crate::attributes::{Attribute, AttributeType};
use crate::packet::{Packet, PacketError};
use hmac::{Hmac, Mac};
use md5_digest::Md5;

type HmacMd5 = Hmac<Md5>;

/// Calculate Message-Authenticator for a RADIUS packet
///
/// `packet_bytes` must be the complete marshalled packet with the
/// Message-Authenticator value zeroed.
pub fn calculate_message_authenticator(packet_bytes: &[u8], secret: &[u8]) -> [u8; 16] {
    let mut mac = HmacMd5::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(packet_bytes);
    let result = mac.finalize().into_bytes();

    let mut output = [0u8; 16];
    output.copy_from_slice(&result);
    output
}

/// Append a Message-Authenticator attribute with the correct HMAC to a packet.
///
/// A zero placeholder is added first, the full packet is marshalled, and the
/// HMAC-MD5 result then replaces the placeholder. Must be called after every
/// other attribute has been added.
pub fn set_message_authenticator(packet: &mut Packet, secret: &[u8]) -> Result<(), PacketError> {
    packet.add_attribute(Attribute::new(
        AttributeType::MessageAuthenticator as u8,
        vec![0u8; 16],
    )?);

    let raw = packet.encode()?;
    let mac = calculate_message_authenticator(&raw, secret);

    if let Some(attr) = packet
        .attributes
        .iter_mut()
        .rev()
        .find(|a| a.attr_type == AttributeType::MessageAuthenticator as u8)
    {
        attr.value = mac.to_vec();
    }
    Ok(())
}
