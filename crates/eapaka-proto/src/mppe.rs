//! MS-MPPE key extraction (RFC 2548)
//!
//! Access-Accept replies for EAP sessions carry the session keys in
//! Vendor-Specific attributes under the Microsoft vendor id. The tester
//! only checks presence and raw bytes; the MPPE key decryption defined in
//! RFC 2548 Section 2.4 is out of scope.

use crate::attributes::AttributeType;
use crate::packet::Packet;
use thiserror::Error;

/// Microsoft vendor id (IANA enterprise number 311)
pub const VENDOR_MICROSOFT: u32 = 311;
/// MS-MPPE-Send-Key vendor sub-type
pub const MS_MPPE_SEND_KEY: u8 = 16;
/// MS-MPPE-Recv-Key vendor sub-type
pub const MS_MPPE_RECV_KEY: u8 = 17;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MppeError {
    #[error("Vendor-Specific attribute too short: {0} bytes")]
    VendorAttributeTooShort(usize),

    #[error("Invalid vendor TLV length: {0}")]
    InvalidVendorTlvLength(usize),
}

/// Raw (still encrypted) MS-MPPE key attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MppeKeys {
    pub send_key: Option<Vec<u8>>,
    pub recv_key: Option<Vec<u8>>,
}

impl MppeKeys {
    pub fn send_key_present(&self) -> bool {
        self.send_key.is_some()
    }

    pub fn recv_key_present(&self) -> bool {
        self.recv_key.is_some()
    }
}

/// Extract raw MS-MPPE send/recv keys from all Vendor-Specific attributes.
pub fn extract_mppe_keys(packet: &Packet) -> Result<MppeKeys, MppeError> {
    let mut keys = MppeKeys::default();

    for attr in packet.find_all_attributes(AttributeType::VendorSpecific as u8) {
        if attr.value.len() < 4 {
            return Err(MppeError::VendorAttributeTooShort(attr.value.len()));
        }
        let vendor_id = u32::from_be_bytes([
            attr.value[0],
            attr.value[1],
            attr.value[2],
            attr.value[3],
        ]);
        if vendor_id != VENDOR_MICROSOFT {
            continue;
        }

        let mut rest = &attr.value[4..];
        while !rest.is_empty() {
            if rest.len() < 2 {
                return Err(MppeError::VendorAttributeTooShort(rest.len()));
            }
            let length = rest[1] as usize;
            if length < 2 || length > rest.len() {
                return Err(MppeError::InvalidVendorTlvLength(length));
            }
            match rest[0] {
                MS_MPPE_SEND_KEY => keys.send_key = Some(rest[2..length].to_vec()),
                MS_MPPE_RECV_KEY => keys.recv_key = Some(rest[2..length].to_vec()),
                _ => {}
            }
            rest = &rest[length..];
        }
    }

    Ok(keys)
}

/// Build a Vendor-Specific value carrying one MS-MPPE vendor TLV.
///
/// Used by tests and by fake servers; the value bytes are taken verbatim.
pub fn encode_mppe_attribute(sub_type: u8, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 2 + value.len());
    out.extend_from_slice(&VENDOR_MICROSOFT.to_be_bytes());
    out.push(sub_type);
    out.push((value.len() + 2) as u8);
    out.extend_from_slice(value);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attribute;
    use crate::packet::Code;

    fn accept_with_vendor(value: Vec<u8>) -> Packet {
        let mut packet = Packet::new(Code::AccessAccept, 1, [0u8; 16]);
        packet.add_attribute(Attribute::new(AttributeType::VendorSpecific as u8, value).unwrap());
        packet
    }

    #[test]
    fn test_extract_both_keys() {
        let mut packet = Packet::new(Code::AccessAccept, 1, [0u8; 16]);
        packet.add_attribute(
            Attribute::new(
                AttributeType::VendorSpecific as u8,
                encode_mppe_attribute(MS_MPPE_SEND_KEY, &[0xAA; 34]),
            )
            .unwrap(),
        );
        packet.add_attribute(
            Attribute::new(
                AttributeType::VendorSpecific as u8,
                encode_mppe_attribute(MS_MPPE_RECV_KEY, &[0xBB; 34]),
            )
            .unwrap(),
        );

        let keys = extract_mppe_keys(&packet).unwrap();
        assert_eq!(keys.send_key, Some(vec![0xAA; 34]));
        assert_eq!(keys.recv_key, Some(vec![0xBB; 34]));
    }

    #[test]
    fn test_other_vendor_ignored() {
        let mut value = 9999u32.to_be_bytes().to_vec();
        value.extend_from_slice(&[MS_MPPE_SEND_KEY, 4, 1, 2]);
        let keys = extract_mppe_keys(&accept_with_vendor(value)).unwrap();
        assert!(!keys.send_key_present());
        assert!(!keys.recv_key_present());
    }

    #[test]
    fn test_no_vendor_attributes() {
        let packet = Packet::new(Code::AccessAccept, 1, [0u8; 16]);
        let keys = extract_mppe_keys(&packet).unwrap();
        assert_eq!(keys, MppeKeys::default());
    }

    #[test]
    fn test_invalid_tlv_length() {
        let mut value = VENDOR_MICROSOFT.to_be_bytes().to_vec();
        value.extend_from_slice(&[MS_MPPE_SEND_KEY, 1]); // length below header
        assert!(matches!(
            extract_mppe_keys(&accept_with_vendor(value)),
            Err(MppeError::InvalidVendorTlvLength(1))
        ));
    }

    #[test]
    fn test_truncated_vendor_header() {
        let value = vec![0, 0];
        assert!(matches!(
            extract_mppe_keys(&accept_with_vendor(value)),
            Err(MppeError::VendorAttributeTooShort(2))
        ));
    }
}
