//! RADIUS client transport
//!
//! Drives one Access-Request/Access-Challenge conversation over UDP. The
//! client retains the RADIUS State attribute between rounds, splits the EAP
//! payload into EAP-Message attributes, computes the Message-Authenticator
//! last, and validates replies against the outstanding request identifier
//! and Response Authenticator.

use eapaka_proto::attributes::{Attribute, AttributeType};
use eapaka_proto::auth::{generate_request_authenticator, verify_response_authenticator};
use eapaka_proto::eap::split_eap_message;
use eapaka_proto::message_auth::set_message_authenticator;
use eapaka_proto::mppe::{extract_mppe_keys, MppeError, MppeKeys};
use eapaka_proto::packet::{Code, Packet, PacketError};
use rand::Rng;
use std::net::{Ipv4Addr, UdpSocket};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("server address is required")]
    MissingServerAddr,

    #[error("shared secret is required")]
    MissingSecret,

    #[error("eap payload is empty")]
    EmptyEapPayload,

    #[error("invalid nas_ip_address: {0:?}")]
    InvalidNasIpAddress(String),

    #[error("no valid response within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error(transparent)]
    Mppe(#[from] MppeError),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Optional Access-Request attributes taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct RequestAttributes {
    pub nas_ip_address: String,
    pub nas_identifier: String,
    pub called_station_id: String,
    pub calling_station_id: String,
}

/// A parsed server reply.
#[derive(Debug)]
pub struct ExchangeResponse {
    pub code: Code,
    /// Reassembled EAP payload from all EAP-Message attributes, in order.
    pub eap: Option<Vec<u8>>,
    pub mppe: MppeKeys,
    pub packet: Packet,
}

impl ExchangeResponse {
    /// First Reply-Message attribute as text, if present.
    pub fn reply_message(&self) -> Option<String> {
        self.packet
            .find_attribute(AttributeType::ReplyMessage as u8)
            .and_then(|attr| attr.as_string().ok())
    }
}

/// RADIUS client with State retention for one EAP conversation.
pub struct RadiusClient {
    addr: String,
    secret: Vec<u8>,
    timeout: Duration,
    retries: u32,
    state: Option<Vec<u8>>,
    next_identifier: u8,
}

impl RadiusClient {
    pub fn new(addr: impl Into<String>, secret: impl Into<Vec<u8>>, timeout: Duration, retries: u32) -> Self {
        RadiusClient {
            addr: addr.into(),
            secret: secret.into(),
            timeout,
            retries,
            state: None,
            next_identifier: rand::rng().random(),
        }
    }

    /// Clear the retained State attribute.
    pub fn reset_state(&mut self) {
        self.state = None;
    }

    /// Send an Access-Request carrying the EAP payload and wait for the
    /// server's reply.
    ///
    /// Each attempt waits up to the per-try timeout; the request is
    /// retransmitted up to `retries` times, bounding the whole exchange at
    /// `timeout * (retries + 1)`.
    pub fn exchange_eap(
        &mut self,
        user_name: &str,
        eap_payload: &[u8],
        attrs: &RequestAttributes,
    ) -> Result<ExchangeResponse, ClientError> {
        if self.addr.is_empty() {
            return Err(ClientError::MissingServerAddr);
        }
        if self.secret.is_empty() {
            return Err(ClientError::MissingSecret);
        }
        if eap_payload.is_empty() {
            return Err(ClientError::EmptyEapPayload);
        }

        let identifier = self.next_identifier;
        self.next_identifier = self.next_identifier.wrapping_add(1);
        let authenticator = generate_request_authenticator();

        let mut packet = Packet::new(Code::AccessRequest, identifier, authenticator);
        packet.add_attribute(Attribute::string(AttributeType::UserName as u8, user_name)?);
        for chunk in split_eap_message(eap_payload) {
            packet.add_attribute(Attribute::new(AttributeType::EapMessage as u8, chunk)?);
        }
        if let Some(state) = &self.state {
            packet.add_attribute(Attribute::new(AttributeType::State as u8, state.clone())?);
        }
        self.apply_attrs(&mut packet, attrs)?;
        set_message_authenticator(&mut packet, &self.secret)?;

        let request = packet.encode()?;

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(&self.addr)?;

        let total = self.timeout * (self.retries + 1);
        let deadline = Instant::now() + total;

        for attempt in 0..=self.retries {
            debug!(identifier, attempt, "sending Access-Request");
            socket.send(&request)?;

            let try_deadline = (Instant::now() + self.timeout).min(deadline);
            if let Some(reply) =
                self.receive_reply(&socket, identifier, &authenticator, try_deadline)?
            {
                return self.parse_reply(reply);
            }
        }

        Err(ClientError::Timeout(total))
    }

    /// Wait for a datagram that matches the outstanding request. Datagrams
    /// with the wrong identifier or a bad Response Authenticator are
    /// dropped until the per-try deadline passes.
    fn receive_reply(
        &self,
        socket: &UdpSocket,
        identifier: u8,
        authenticator: &[u8; 16],
        try_deadline: Instant,
    ) -> Result<Option<Packet>, ClientError> {
        let mut buffer = vec![0u8; Packet::MAX_PACKET_SIZE];
        loop {
            let remaining = try_deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            socket.set_read_timeout(Some(remaining))?;

            let len = match socket.recv(&mut buffer) {
                Ok(len) => len,
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Ok(None);
                }
                Err(err) => return Err(err.into()),
            };

            let reply = match Packet::decode(&buffer[..len]) {
                Ok(reply) => reply,
                Err(err) => {
                    debug!("dropping malformed datagram: {}", err);
                    continue;
                }
            };
            if reply.identifier != identifier {
                debug!(
                    got = reply.identifier,
                    want = identifier,
                    "dropping reply with wrong identifier"
                );
                continue;
            }
            if !verify_response_authenticator(&reply, authenticator, &self.secret) {
                debug!("dropping reply with bad response authenticator");
                continue;
            }
            return Ok(Some(reply));
        }
    }

    fn parse_reply(&mut self, reply: Packet) -> Result<ExchangeResponse, ClientError> {
        if let Some(state) = reply.find_attribute(AttributeType::State as u8) {
            self.state = Some(state.value.clone());
        }

        let chunks: Vec<Vec<u8>> = reply
            .find_all_attributes(AttributeType::EapMessage as u8)
            .iter()
            .map(|attr| attr.value.clone())
            .collect();
        let eap = if chunks.is_empty() {
            None
        } else {
            Some(eapaka_proto::eap::join_eap_message(&chunks))
        };

        let mppe = extract_mppe_keys(&reply)?;

        Ok(ExchangeResponse {
            code: reply.code,
            eap,
            mppe,
            packet: reply,
        })
    }

    fn apply_attrs(
        &self,
        packet: &mut Packet,
        attrs: &RequestAttributes,
    ) -> Result<(), ClientError> {
        if !attrs.nas_ip_address.is_empty() {
            let ip: Ipv4Addr = attrs
                .nas_ip_address
                .parse()
                .map_err(|_| ClientError::InvalidNasIpAddress(attrs.nas_ip_address.clone()))?;
            packet.add_attribute(Attribute::ipv4(
                AttributeType::NasIpAddress as u8,
                ip.octets(),
            )?);
        }
        if !attrs.nas_identifier.is_empty() {
            packet.add_attribute(Attribute::string(
                AttributeType::NasIdentifier as u8,
                attrs.nas_identifier.clone(),
            )?);
        }
        if !attrs.called_station_id.is_empty() {
            packet.add_attribute(Attribute::string(
                AttributeType::CalledStationId as u8,
                attrs.called_station_id.clone(),
            )?);
        }
        if !attrs.calling_station_id.is_empty() {
            packet.add_attribute(Attribute::string(
                AttributeType::CallingStationId as u8,
                attrs.calling_station_id.clone(),
            )?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eapaka_proto::auth::calculate_response_authenticator;
    use eapaka_proto::message_auth::calculate_message_authenticator;
    use std::net::UdpSocket as StdUdpSocket;
    use std::thread;

    /// One-shot fake server: verifies the request shape and answers with
    /// the packet produced by `respond`.
    fn spawn_server(
        secret: &'static [u8],
        respond: impl FnOnce(Packet) -> Packet + Send + 'static,
    ) -> String {
        let socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        thread::spawn(move || {
            let mut buffer = vec![0u8; 4096];
            let (len, peer) = socket.recv_from(&mut buffer).unwrap();
            let request = Packet::decode(&buffer[..len]).unwrap();
            let request_auth = request.authenticator;

            let mut reply = respond(request);
            reply.authenticator =
                calculate_response_authenticator(&reply, &request_auth, secret);
            socket.send_to(&reply.encode().unwrap(), peer).unwrap();
        });
        addr
    }

    #[test]
    fn test_exchange_builds_request_and_parses_reply() {
        let secret: &[u8] = b"testing123";
        let addr = spawn_server(secret, |request| {
            assert_eq!(request.code, Code::AccessRequest);
            // User-Name present
            let user = request
                .find_attribute(AttributeType::UserName as u8)
                .unwrap();
            assert_eq!(user.as_string().unwrap(), "user@example");
            // Message-Authenticator checks out
            let ma_offset = {
                let raw = request.encode().unwrap();
                let mut offset = 20;
                let mut found = None;
                while offset + 2 <= raw.len() {
                    let len = raw[offset + 1] as usize;
                    if raw[offset] == AttributeType::MessageAuthenticator as u8 {
                        found = Some(offset + 2);
                        break;
                    }
                    offset += len;
                }
                found.unwrap()
            };
            let raw = request.encode().unwrap();
            let mut zeroed = raw.clone();
            zeroed[ma_offset..ma_offset + 16].fill(0);
            let expected = calculate_message_authenticator(&zeroed, b"testing123");
            assert_eq!(&raw[ma_offset..ma_offset + 16], expected);

            let mut reply = Packet::new(Code::AccessChallenge, request.identifier, [0u8; 16]);
            reply.add_attribute(
                Attribute::new(AttributeType::State as u8, b"state-1".to_vec()).unwrap(),
            );
            reply.add_attribute(
                Attribute::new(AttributeType::EapMessage as u8, vec![1, 0, 0, 5, 1]).unwrap(),
            );
            reply
        });

        let mut client =
            RadiusClient::new(addr, secret.to_vec(), Duration::from_millis(2000), 0);
        let eap = vec![2, 0, 0, 9, 1, b'u', b's', b'e', b'r'];
        let response = client
            .exchange_eap("user@example", &eap, &RequestAttributes::default())
            .unwrap();

        assert_eq!(response.code, Code::AccessChallenge);
        assert_eq!(response.eap, Some(vec![1, 0, 0, 5, 1]));
        assert_eq!(client.state, Some(b"state-1".to_vec()));
    }

    #[test]
    fn test_exchange_reassembles_fragmented_eap() {
        let secret: &[u8] = b"testing123";
        let payload: Vec<u8> = {
            // an EAP packet of 600 bytes total
            let mut p = vec![1u8, 7, 0x02, 0x58, 23];
            p.resize(600, 0xAB);
            p
        };
        let expected = payload.clone();
        let addr = spawn_server(secret, move |request| {
            let mut reply = Packet::new(Code::AccessChallenge, request.identifier, [0u8; 16]);
            for chunk in split_eap_message(&payload) {
                reply.add_attribute(
                    Attribute::new(AttributeType::EapMessage as u8, chunk).unwrap(),
                );
            }
            reply
        });

        let mut client =
            RadiusClient::new(addr, secret.to_vec(), Duration::from_millis(2000), 0);
        let response = client
            .exchange_eap("user@example", &[2, 0, 0, 4], &RequestAttributes::default())
            .unwrap();
        assert_eq!(response.eap, Some(expected));
    }

    #[test]
    fn test_exchange_times_out_without_server() {
        let socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        // socket kept open but never answered

        let mut client = RadiusClient::new(addr, b"secret".to_vec(), Duration::from_millis(30), 1);
        let started = Instant::now();
        let result = client.exchange_eap("user", &[2, 0, 0, 4], &RequestAttributes::default());
        assert!(matches!(result, Err(ClientError::Timeout(_))));
        // two tries of 30ms each
        assert!(started.elapsed() >= Duration::from_millis(55));
    }

    #[test]
    fn test_state_echoed_on_next_request() {
        let secret: &[u8] = b"testing123";
        let addr = spawn_server(secret, |request| {
            let state = request.find_attribute(AttributeType::State as u8).unwrap();
            assert_eq!(state.value, b"prior-state".to_vec());
            Packet::new(Code::AccessReject, request.identifier, [0u8; 16])
        });

        let mut client =
            RadiusClient::new(addr, secret.to_vec(), Duration::from_millis(2000), 0);
        client.state = Some(b"prior-state".to_vec());
        let response = client
            .exchange_eap("user", &[2, 0, 0, 4], &RequestAttributes::default())
            .unwrap();
        assert_eq!(response.code, Code::AccessReject);
    }

    #[test]
    fn test_invalid_nas_ip_rejected() {
        let mut client = RadiusClient::new(
            "127.0.0.1:1812",
            b"secret".to_vec(),
            Duration::from_millis(10),
            0,
        );
        let attrs = RequestAttributes {
            nas_ip_address: "not-an-ip".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            client.exchange_eap("user", &[2, 0, 0, 4], &attrs),
            Err(ClientError::InvalidNasIpAddress(_))
        ));
    }

    #[test]
    fn test_empty_payload_rejected() {
        let mut client = RadiusClient::new(
            "127.0.0.1:1812",
            b"secret".to_vec(),
            Duration::from_millis(10),
            0,
        );
        assert!(matches!(
            client.exchange_eap("user", &[], &RequestAttributes::default()),
            Err(ClientError::EmptyEapPayload)
        ));
    }

    #[test]
    fn test_reset_state() {
        let mut client = RadiusClient::new(
            "127.0.0.1:1812",
            b"secret".to_vec(),
            Duration::from_millis(10),
            0,
        );
        client.state = Some(b"x".to_vec());
        client.reset_state();
        assert!(client.state.is_none());
    }
}
