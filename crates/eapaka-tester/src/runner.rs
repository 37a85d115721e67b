//! Session runner
//!
//! Sequences the EAP conversation against the RADIUS server and evaluates
//! the testcase expectations. Exit codes: 0 = pass, 1 = expectation
//! failure (including strict method mismatch), 2 = infrastructure error.

use crate::aka_method::{AkaError, AkaMethod, AkaMethodOptions, PermanentIdPolicy};
use crate::client::{ClientError, ExchangeResponse, RadiusClient, RequestAttributes};
use crate::config::{Config, ConfigError};
use crate::peer::{MethodMismatchPolicy, Peer, PeerError, Session};
use crate::sqnstore::{parse_sqn_hex, FileStore, MemoryStore, SqnStore, SqnStoreError};
use crate::testcase::Case;
use crate::trace::{called_station_id_ok, TraceLevel, TraceLogger};
use base64::Engine;
use eapaka_proto::eap::{EapPacket, TYPE_AKA, TYPE_AKA_PRIME};
use eapaka_proto::packet::Code;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const EXIT_PASS: i32 = 0;
pub const EXIT_EXPECTATION: i32 = 1;
pub const EXIT_INFRASTRUCTURE: i32 = 2;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("expectation failed: {0}")]
    Expectation(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid {label} hex: {value:?}")]
    InvalidHex { label: &'static str, value: String },

    #[error("invalid expected key literal: {0:?}")]
    InvalidKeyLiteral(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] SqnStoreError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Method(#[from] AkaError),

    #[error("eap error: {0}")]
    Eap(#[from] eapaka_proto::eap::EapError),
}

impl RunError {
    /// Map the failure to the process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Expectation(_) => EXIT_EXPECTATION,
            // strict method mismatch is an expectation-relevant outcome
            RunError::Peer(PeerError::MethodMismatch { .. }) => EXIT_EXPECTATION,
            _ => EXIT_INFRASTRUCTURE,
        }
    }
}

/// Execute a single testcase session to completion.
pub fn run_case(config: &Config, case: &Case) -> Result<(), RunError> {
    let merged = case.merged_config(config);

    let store = build_store(&merged, case)?;
    if case.sqn.reset {
        store.borrow_mut().reset(&merged.sim.imsi)?;
    }

    let mut peer = build_peer(&merged, case, store)?;
    if peer.session.outer_identity.is_empty() {
        return Err(RunError::Protocol("outer identity is required".into()));
    }

    let attrs = RequestAttributes {
        nas_ip_address: merged.radius_attrs.nas_ip_address.clone(),
        nas_identifier: merged.radius_attrs.nas_identifier.clone(),
        called_station_id: merged.radius_attrs.called_station_id.clone(),
        calling_station_id: merged.radius_attrs.calling_station_id.clone(),
    };
    if !attrs.called_station_id.is_empty() && !called_station_id_ok(&attrs.called_station_id) {
        warn!(
            called_station_id = %attrs.called_station_id,
            "called_station_id format unexpected"
        );
    }

    let mut client = RadiusClient::new(
        merged.radius.server_addr.clone(),
        merged.radius.secret.clone().into_bytes(),
        Duration::from_millis(merged.radius.timeout_ms),
        merged.radius.retries,
    );

    let mut logger = build_logger(case);
    let mut user_name = peer.session.outer_identity.clone();
    let mut response_packet = EapPacket::identity_response(0, &user_name);

    loop {
        let response = client.exchange_eap(&user_name, &response_packet.to_bytes(), &attrs)?;
        logger.log_radius(&response, &peer.session);

        match response.code {
            Code::AccessChallenge => {
                let eap_payload = response
                    .eap
                    .as_deref()
                    .ok_or_else(|| {
                        RunError::Protocol("missing EAP-Message in Access-Challenge".into())
                    })?;
                let request = EapPacket::parse(eap_payload)?;
                let next = peer
                    .handle(&request)?
                    .ok_or_else(|| RunError::Protocol("no response for challenge".into()))?;
                logger.log_eap_step(&request, &next, &peer.session);
                response_packet = next;
                if !peer.session.outer_identity.is_empty() {
                    user_name = peer.session.outer_identity.clone();
                }
            }
            Code::AccessAccept => {
                logger.log_mppe(&response.mppe);
                info!("server verdict: Access-Accept");
                return evaluate_expect(case, &response, true);
            }
            Code::AccessReject => {
                logger.log_mppe(&response.mppe);
                info!("server verdict: Access-Reject");
                return evaluate_expect(case, &response, false);
            }
            other => {
                return Err(RunError::Protocol(format!(
                    "unexpected RADIUS code {:?}",
                    other
                )));
            }
        }
    }
}

/// Build the SQN store honoring the testcase persist override.
fn build_store(
    config: &Config,
    case: &Case,
) -> Result<Rc<RefCell<dyn SqnStore>>, RunError> {
    let persist = case.sqn.persist.unwrap_or(true);
    if !persist {
        return Ok(Rc::new(RefCell::new(MemoryStore::new())));
    }
    match config.sqn_store.mode.as_str() {
        "memory" => Ok(Rc::new(RefCell::new(MemoryStore::new()))),
        "file" => {
            if config.sqn_store.path.is_empty() {
                return Err(RunError::Config(ConfigError::Invalid(
                    "sqn_store.path is required".into(),
                )));
            }
            Ok(Rc::new(RefCell::new(FileStore::new(&config.sqn_store.path))))
        }
        other => Err(RunError::Config(ConfigError::Invalid(format!(
            "unsupported sqn_store.mode {:?}",
            other
        )))),
    }
}

/// Build the peer with both AKA and AKA' methods registered.
fn build_peer(
    merged: &Config,
    case: &Case,
    store: Rc<RefCell<dyn SqnStore>>,
) -> Result<Peer, RunError> {
    let ki = decode_hex("ki", &merged.sim.ki, 16)?;
    let opc = decode_hex("opc", &merged.sim.opc, 16)?;
    let amf = decode_hex("amf", &merged.sim.amf, 2)?;
    let initial_sqn = parse_sqn_hex(&merged.sim.sqn_initial_hex)?;

    let permanent_id_policy: PermanentIdPolicy = merged
        .eap
        .permanent_id_policy
        .parse()
        .map_err(|msg: String| RunError::Config(ConfigError::Invalid(msg)))?;
    let outer_update = merged
        .eap
        .outer_identity_update_on_permanent_req
        .unwrap_or(true);
    let permanent_override = case.eap.permanent_identity_override.clone();

    let mut peer = Peer::new(Session::new(case.identity.clone()));
    for method_type in [TYPE_AKA, TYPE_AKA_PRIME] {
        let method = AkaMethod::new(AkaMethodOptions {
            method_type,
            imsi: merged.sim.imsi.clone(),
            ki: ki.clone(),
            opc: opc.clone(),
            amf: amf.clone(),
            net_name: if method_type == TYPE_AKA_PRIME {
                merged.eap.aka_prime.net_name.clone()
            } else {
                String::new()
            },
            realm: merged.identity.realm.clone(),
            initial_sqn,
            store: Some(store.clone()),
            permanent_id_policy,
            permanent_identity_override: permanent_override.clone(),
            outer_identity_update_on_permanent_req: outer_update,
        })?;
        peer.register(Box::new(method));
    }

    let policy: MethodMismatchPolicy = merged
        .eap
        .method_mismatch_policy
        .parse()
        .map_err(|msg: String| RunError::Config(ConfigError::Invalid(msg)))?;
    peer.set_policy(policy);

    Ok(peer)
}

/// Compare the final RADIUS verdict against the testcase expectations.
fn evaluate_expect(
    case: &Case,
    response: &ExchangeResponse,
    accepted: bool,
) -> Result<(), RunError> {
    let expected_accept = case.expect.result == "accept";
    if accepted != expected_accept {
        let actual = if accepted { "accept" } else { "reject" };
        return Err(RunError::Expectation(format!(
            "expect result={} got={}",
            case.expect.result, actual
        )));
    }

    if !accepted && !case.expect.reject_hint_contains.is_empty() {
        let hint = response.reply_message().unwrap_or_default();
        if hint.is_empty() {
            return Err(RunError::Expectation(
                "reject_hint_contains missing Reply-Message".into(),
            ));
        }
        if !hint.contains(&case.expect.reject_hint_contains) {
            return Err(RunError::Expectation(format!(
                "reject_hint_contains mismatch: want {:?} got {:?}",
                case.expect.reject_hint_contains, hint
            )));
        }
    }

    let require_present = case.expect.mppe.require_present.unwrap_or(expected_accept);
    if require_present
        && (!response.mppe.send_key_present() || !response.mppe.recv_key_present())
    {
        return Err(RunError::Expectation("mppe keys missing".into()));
    }

    if !case.expect.mppe.send_key.is_empty() {
        let expected = decode_key(&case.expect.mppe.send_key)?;
        if response.mppe.send_key.as_deref() != Some(expected.as_slice()) {
            return Err(RunError::Expectation("mppe send_key mismatch".into()));
        }
    }
    if !case.expect.mppe.recv_key.is_empty() {
        let expected = decode_key(&case.expect.mppe.recv_key)?;
        if response.mppe.recv_key.as_deref() != Some(expected.as_slice()) {
            return Err(RunError::Expectation("mppe recv_key mismatch".into()));
        }
    }

    Ok(())
}

/// Decode a `hex:`/`b64:`-prefixed expected key literal.
fn decode_key(value: &str) -> Result<Vec<u8>, RunError> {
    if let Some(hex_value) = value.strip_prefix("hex:") {
        return hex::decode(hex_value).map_err(|_| RunError::InvalidKeyLiteral(value.to_string()));
    }
    if let Some(b64_value) = value.strip_prefix("b64:") {
        return base64::engine::general_purpose::STANDARD
            .decode(b64_value)
            .map_err(|_| RunError::InvalidKeyLiteral(value.to_string()));
    }
    Err(RunError::InvalidKeyLiteral(value.to_string()))
}

fn decode_hex(label: &'static str, value: &str, expected: usize) -> Result<Vec<u8>, RunError> {
    let bytes = hex::decode(value).map_err(|_| RunError::InvalidHex {
        label,
        value: value.to_string(),
    })?;
    if bytes.len() != expected {
        return Err(RunError::InvalidHex {
            label,
            value: value.to_string(),
        });
    }
    Ok(bytes)
}

fn build_logger(case: &Case) -> TraceLogger {
    let level = if case.trace.level == "verbose" {
        TraceLevel::Verbose
    } else {
        TraceLevel::Normal
    };
    TraceLogger::new(
        level,
        case.trace.unsafe_log,
        case.trace.dump_eap_hex.unwrap_or(true),
        case.trace.dump_radius_attrs.unwrap_or(true),
        &case.trace.save_path,
    )
}
