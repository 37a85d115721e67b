use crate::packet::Packet;
use rand::Rng;

/// Generate a random Request Authenticator (16 bytes) per RFC 2865 Section 3
pub fn generate_request_authenticator() -> [u8; 16] {
    let mut rng = rand::rng();
    let mut authenticator = [0u8; 16];
    rng.fill(&mut authenticator);
    authenticator
}

/// Calculate Response Authenticator per RFC 2865 Section 3
///
/// Response Authenticator = MD5(Code + ID + Length + Request Authenticator + Attributes + Secret)
///
/// Covers Access-Accept, Access-Reject, and Access-Challenge packets.
pub fn calculate_response_authenticator(
    packet: &Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> [u8; 16] {
    let mut data = Vec::new();

    data.push(packet.code.as_u8());
    data.push(packet.identifier);

    let length = packet.length();
    data.push((length >> 8) as u8);
    data.push((length & 0xff) as u8);

    data.extend_from_slice(request_authenticator);

    for attr in &packet.attributes {
        // Attribute values are bounded at construction time.
        if let Ok(encoded) = attr.encode() {
            data.extend_from_slice(&encoded);
        }
    }

    data.extend_from_slice(secret);

    let digest = md5::compute(&data);
    let mut authenticator = [0u8; 16];
    authenticator.copy_from_slice(&digest.0);
    authenticator
}

/// Verify that a server reply carries the Response Authenticator expected
/// for the outstanding request.
pub fn verify_response_authenticator(
    response: &Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> bool {
    let calculated = calculate_response_authenticator(response, request_authenticator, secret);
    response.authenticator == calculated
}
