//! Session trace output
//!
//! Emits one-line summaries of every RADIUS round and EAP step to stderr or
//! a testcase-configured file. Identities and AKA vector material are
//! masked unless `unsafe_log` is set; verbose level adds EAP hex dumps, a
//! RADIUS attribute table, and a walk of the AKA attributes.

use crate::client::ExchangeResponse;
use crate::peer::Session;
use eapaka_proto::aka::{AkaAttribute, AkaPacket};
use eapaka_proto::attributes::AttributeType;
use eapaka_proto::eap::{EapPacket, TYPE_AKA, TYPE_AKA_PRIME, TYPE_IDENTITY};
use eapaka_proto::mppe::MppeKeys;
use eapaka_proto::packet::Packet;
use std::fs::OpenOptions;
use std::io::Write;

/// Amount of trace detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceLevel {
    #[default]
    Normal,
    Verbose,
}

/// Trace writer for one session run.
pub struct TraceLogger {
    level: TraceLevel,
    unsafe_log: bool,
    dump_eap_hex: bool,
    dump_radius_attrs: bool,
    out: Box<dyn Write>,
}

impl TraceLogger {
    pub fn new(
        level: TraceLevel,
        unsafe_log: bool,
        dump_eap_hex: bool,
        dump_radius_attrs: bool,
        save_path: &str,
    ) -> Self {
        let out: Box<dyn Write> = if save_path.is_empty() {
            Box::new(std::io::stderr())
        } else {
            match OpenOptions::new().create(true).append(true).open(save_path) {
                Ok(file) => Box::new(file),
                // fall back to stderr when the trace file cannot be opened
                Err(_) => Box::new(std::io::stderr()),
            }
        };
        TraceLogger {
            level,
            unsafe_log,
            dump_eap_hex,
            dump_radius_attrs,
            out,
        }
    }

    /// Summarize one RADIUS round.
    pub fn log_radius(&mut self, response: &ExchangeResponse, session: &Session) {
        let state = if response
            .packet
            .find_attribute(AttributeType::State as u8)
            .is_some()
        {
            "present"
        } else {
            "absent"
        };
        let _ = writeln!(
            self.out,
            "radius={:?} state={} attrs={} outer={} inner={}",
            response.code,
            state,
            summarize_attrs(&response.packet),
            mask_identity(&session.outer_identity),
            mask_identity(&session.inner_identity),
        );

        if self.level == TraceLevel::Verbose {
            if self.dump_eap_hex {
                if let Some(eap) = &response.eap {
                    let _ = writeln!(self.out, "eap_hex={}", hex::encode(eap));
                }
            }
            if self.dump_radius_attrs {
                self.dump_attrs(&response.packet);
            }
            if let Some(eap) = &response.eap {
                self.dump_aka_attributes(eap);
            }
            self.warn_called_station_id(&response.packet);
        }
    }

    /// Log one EAP request/response step.
    pub fn log_eap_step(&mut self, req: &EapPacket, resp: &EapPacket, session: &Session) {
        let _ = writeln!(
            self.out,
            "eap request={} response={} outer={} inner={}",
            eap_type_name(req),
            eap_type_name(resp),
            mask_identity(&session.outer_identity),
            mask_identity(&session.inner_identity),
        );
    }

    /// Log MPPE key presence, with masked prefixes in verbose mode.
    pub fn log_mppe(&mut self, keys: &MppeKeys) {
        let mut line = format!(
            "mppe send={} recv={}",
            keys.send_key_present(),
            keys.recv_key_present()
        );
        if self.level == TraceLevel::Verbose {
            if let Some(send) = &keys.send_key {
                line.push_str(&format!(" send_prefix={}", mask_bytes(send)));
            }
            if let Some(recv) = &keys.recv_key {
                line.push_str(&format!(" recv_prefix={}", mask_bytes(recv)));
            }
        }
        let _ = writeln!(self.out, "{}", line);
    }

    fn dump_attrs(&mut self, packet: &Packet) {
        if packet.attributes.is_empty() {
            return;
        }
        let attrs: Vec<String> = packet
            .attributes
            .iter()
            .map(|attr| format!("{}(len={})", attr.attr_type, attr.value.len()))
            .collect();
        let _ = writeln!(self.out, "radius_attrs={}", attrs.join(","));
    }

    fn dump_aka_attributes(&mut self, eap_payload: &[u8]) {
        let pkt = match AkaPacket::parse(eap_payload) {
            Ok(pkt) => pkt,
            Err(_) => return,
        };
        let mut names = Vec::new();
        for attr in &pkt.attributes {
            names.push(format!("{}", attr.attr_type()));
            match attr {
                AkaAttribute::PermanentIdReq => {
                    let _ = writeln!(self.out, "aka_perm_id_req=true");
                }
                AkaAttribute::KdfInput(name) => {
                    let _ = writeln!(self.out, "aka_kdf_input={}", name);
                }
                AkaAttribute::Rand(value) => {
                    let _ = writeln!(self.out, "aka_rand={}", self.mask_aka_bytes(value));
                }
                AkaAttribute::Autn(value) => {
                    let _ = writeln!(self.out, "aka_autn={}", self.mask_aka_bytes(value));
                }
                AkaAttribute::Res(value) => {
                    let _ = writeln!(self.out, "aka_res={}", self.mask_aka_bytes(value));
                }
                _ => {}
            }
        }
        if !names.is_empty() {
            let _ = writeln!(self.out, "aka_attrs={}", names.join(","));
        }
    }

    fn mask_aka_bytes(&self, value: &[u8]) -> String {
        if self.unsafe_log {
            return hex::encode(value);
        }
        if value.is_empty() {
            return String::new();
        }
        format!("{}(len={})", mask_bytes(value), value.len())
    }

    fn warn_called_station_id(&mut self, packet: &Packet) {
        let called = match packet
            .find_attribute(AttributeType::CalledStationId as u8)
            .and_then(|attr| attr.as_string().ok())
        {
            Some(called) if !called.is_empty() => called,
            _ => return,
        };
        if !called_station_id_ok(&called) {
            let _ = writeln!(self.out, "warn called_station_id format unexpected");
        }
    }
}

/// Check Called-Station-Id against the `XX-XX-XX-XX-XX-XX:SSID` form.
pub fn called_station_id_ok(value: &str) -> bool {
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() != 2 {
        return false;
    }
    let mac = parts[0];
    if mac.len() != 17 {
        return false;
    }
    for (i, byte) in mac.bytes().enumerate() {
        match i {
            2 | 5 | 8 | 11 | 14 => {
                if byte != b'-' {
                    return false;
                }
            }
            _ => {
                if !byte.is_ascii_hexdigit() {
                    return false;
                }
            }
        }
    }
    true
}

/// Mask an identity for logging: keep two characters at each end.
pub fn mask_identity(identity: &str) -> String {
    if identity.is_empty() {
        return String::new();
    }
    if identity.len() <= 4 {
        return "***".to_string();
    }
    format!(
        "{}***{}",
        &identity[..2],
        &identity[identity.len() - 2..]
    )
}

/// Summarize a RADIUS packet's attributes as a compact count for the
/// one-line round summary (the full table is available via `dump_attrs`
/// in verbose mode).
fn summarize_attrs(packet: &Packet) -> String {
    format!("count={}", packet.attributes.len())
}

/// Mask key material for logging: two-byte hex prefix only.
pub fn mask_bytes(value: &[u8]) -> String {
    if value.is_empty() {
        return String::new();
    }
    if value.len() <= 4 {
        return "***".to_string();
    }
    format!("{}***", hex::encode(&value[..2]))
}

fn eap_type_name(pkt: &EapPacket) -> String {
    match pkt.eap_type {
        Some(TYPE_IDENTITY) => "identity".to_string(),
        Some(TYPE_AKA) => "aka".to_string(),
        Some(TYPE_AKA_PRIME) => "aka'".to_string(),
        Some(other) => format!("type={}", other),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_identity() {
        assert_eq!(mask_identity(""), "");
        assert_eq!(mask_identity("ab"), "***");
        assert_eq!(mask_identity("user@example"), "us***le");
    }

    #[test]
    fn test_mask_bytes() {
        assert_eq!(mask_bytes(&[]), "");
        assert_eq!(mask_bytes(&[1, 2, 3]), "***");
        assert_eq!(mask_bytes(&[0xde, 0xad, 0xbe, 0xef, 0x01]), "dead***");
    }

    #[test]
    fn test_called_station_id_format() {
        assert!(called_station_id_ok("00-11-22-AA-BB-CC:corp-ssid"));
        assert!(!called_station_id_ok("00:11:22:AA:BB:CC:corp-ssid"));
        assert!(!called_station_id_ok("001122AABBCC:ssid"));
        assert!(!called_station_id_ok("00-11-22-AA-BB-CC"));
        assert!(!called_station_id_ok("00-11-22-AA-BB-GG:ssid"));
    }

    #[test]
    fn test_eap_type_name() {
        let identity = EapPacket::identity_response(1, "u");
        assert_eq!(eap_type_name(&identity), "identity");
        let aka = EapPacket::new(
            eapaka_proto::eap::EapCode::Request,
            1,
            Some(TYPE_AKA),
            vec![],
        );
        assert_eq!(eap_type_name(&aka), "aka");
    }
}
