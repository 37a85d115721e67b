//! EAP-AKA and EAP-AKA' method handler
//!
//! One handler implementation covers both methods, parameterized by the
//! EAP method type (23 or 50). Authentication failures that the protocol
//! expects the peer to signal in-band (permanent identity denied, bad
//! request MAC, bad MAC-A, an unrecognized non-skippable attribute, stale
//! SQN) are returned as successful results carrying an
//! Authentication-Reject or Synchronization-Failure response; the error
//! channel is reserved for wire-format and infrastructure problems.

use crate::peer::{EapMethod, Session, SessionPhase};
use crate::sqnstore::{SqnStore, SqnStoreError, SubscriberState};
use eapaka_proto::aka::{
    verify_message_mac, AkaAttribute, AkaCodecError, AkaPacket, AkaSubtype, MacAlgorithm,
};
use eapaka_proto::eap::{EapCode, EapPacket, TYPE_AKA, TYPE_AKA_PRIME};
use eapaka_proto::kdf::{derive_ck_ik_prime, derive_keys_aka, derive_keys_aka_prime};
use eapaka_proto::milenage::{sqn_bytes, Milenage};
use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Policy for answering AT_PERMANENT_ID_REQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermanentIdPolicy {
    /// Hand out the permanent identity whenever asked.
    #[default]
    Always,
    /// Only reuse an identity that already looks permanent, or a configured
    /// override; otherwise reject.
    Conservative,
    /// Never disclose the permanent identity.
    Deny,
}

impl FromStr for PermanentIdPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "always" => Ok(PermanentIdPolicy::Always),
            "conservative" => Ok(PermanentIdPolicy::Conservative),
            "deny" => Ok(PermanentIdPolicy::Deny),
            other => Err(format!("unsupported permanent_id_policy {:?}", other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum AkaError {
    #[error("unsupported method type {0}")]
    UnsupportedMethodType(u8),

    #[error("KI must be 16 bytes")]
    InvalidKi,

    #[error("OPC must be 16 bytes")]
    InvalidOpc,

    #[error("AMF must be 2 bytes")]
    InvalidAmf,

    #[error("IMSI is required")]
    MissingImsi,

    #[error("AT_RAND is required")]
    MissingRand,

    #[error("AT_AUTN is required")]
    MissingAutn,

    #[error("net_name is required for AKA'")]
    MissingNetworkName,

    #[error("inner identity is required")]
    MissingIdentity,

    #[error("AMF mismatch")]
    AmfMismatch,

    #[error("unexpected subtype {0}")]
    UnexpectedSubtype(u8),

    #[error(transparent)]
    Codec(#[from] AkaCodecError),

    #[error(transparent)]
    Store(#[from] SqnStoreError),
}

/// Configuration for one AKA/AKA' method instance.
pub struct AkaMethodOptions {
    pub method_type: u8,
    pub imsi: String,
    pub ki: Vec<u8>,
    pub opc: Vec<u8>,
    pub amf: Vec<u8>,
    /// Serving network name; required for AKA' when the server sends no
    /// AT_KDF_INPUT.
    pub net_name: String,
    pub realm: String,
    pub initial_sqn: u64,
    pub store: Option<Rc<RefCell<dyn SqnStore>>>,
    pub permanent_id_policy: PermanentIdPolicy,
    pub permanent_identity_override: String,
    pub outer_identity_update_on_permanent_req: bool,
}

/// The EAP-AKA/AKA' method handler.
pub struct AkaMethod {
    method_type: u8,
    imsi: String,
    ki: [u8; 16],
    opc: [u8; 16],
    amf: [u8; 2],
    net_name: String,
    realm: String,
    initial_sqn: u64,
    store: Option<Rc<RefCell<dyn SqnStore>>>,
    permanent_id_policy: PermanentIdPolicy,
    permanent_identity_override: String,
    outer_identity_update_on_permanent_req: bool,
}

impl AkaMethod {
    pub fn new(opts: AkaMethodOptions) -> Result<Self, AkaError> {
        if opts.method_type != TYPE_AKA && opts.method_type != TYPE_AKA_PRIME {
            return Err(AkaError::UnsupportedMethodType(opts.method_type));
        }
        let ki: [u8; 16] = opts.ki.as_slice().try_into().map_err(|_| AkaError::InvalidKi)?;
        let opc: [u8; 16] = opts
            .opc
            .as_slice()
            .try_into()
            .map_err(|_| AkaError::InvalidOpc)?;
        let amf: [u8; 2] = opts
            .amf
            .as_slice()
            .try_into()
            .map_err(|_| AkaError::InvalidAmf)?;
        if opts.imsi.is_empty() {
            return Err(AkaError::MissingImsi);
        }

        Ok(AkaMethod {
            method_type: opts.method_type,
            imsi: opts.imsi,
            ki,
            opc,
            amf,
            net_name: opts.net_name,
            realm: opts.realm,
            initial_sqn: opts.initial_sqn,
            store: opts.store,
            permanent_id_policy: opts.permanent_id_policy,
            permanent_identity_override: opts.permanent_identity_override,
            outer_identity_update_on_permanent_req: opts.outer_identity_update_on_permanent_req,
        })
    }

    fn milenage(&self) -> Milenage {
        Milenage::new_with_opc(self.ki, self.opc)
    }

    fn mac_algorithm(&self) -> MacAlgorithm {
        MacAlgorithm::for_method(self.method_type)
    }

    fn handle_identity(
        &self,
        req: &AkaPacket,
        session: &mut Session,
    ) -> Result<AkaPacket, AkaError> {
        if req.has_attribute(eapaka_proto::aka::AT_PERMANENT_ID_REQ) {
            let permanent = match self.select_permanent_identity(session) {
                Some(identity) => identity,
                None => return Ok(self.authentication_reject(req)),
            };
            session.inner_identity = permanent.clone();
            if self.outer_identity_update_on_permanent_req {
                session.outer_identity = permanent.clone();
            }
            let mut resp = AkaPacket::new(
                EapCode::Response,
                req.identifier,
                req.method_type,
                AkaSubtype::Identity,
            );
            resp.attributes.push(AkaAttribute::Identity(permanent));
            return Ok(resp);
        }

        // AT_ANY_ID_REQ, AT_FULLAUTH_ID_REQ, or no id-request attribute at
        // all: answer with the current identity.
        let identity = if !session.inner_identity.is_empty() {
            session.inner_identity.clone()
        } else if !session.outer_identity.is_empty() {
            session.outer_identity.clone()
        } else {
            return Err(AkaError::MissingIdentity);
        };

        let mut resp = AkaPacket::new(
            EapCode::Response,
            req.identifier,
            req.method_type,
            AkaSubtype::Identity,
        );
        resp.attributes.push(AkaAttribute::Identity(identity));
        Ok(resp)
    }

    fn select_permanent_identity(&self, session: &Session) -> Option<String> {
        match self.permanent_id_policy {
            PermanentIdPolicy::Deny => None,
            PermanentIdPolicy::Conservative => {
                if self.is_permanent_identity(&session.inner_identity) {
                    Some(session.inner_identity.clone())
                } else if self.is_permanent_identity(&session.outer_identity) {
                    Some(session.outer_identity.clone())
                } else if !self.permanent_identity_override.is_empty() {
                    Some(self.permanent_identity_override.clone())
                } else {
                    None
                }
            }
            PermanentIdPolicy::Always => {
                if !self.permanent_identity_override.is_empty() {
                    Some(self.permanent_identity_override.clone())
                } else {
                    Some(self.generate_permanent_identity())
                }
            }
        }
    }

    fn generate_permanent_identity(&self) -> String {
        let prefix = self.permanent_prefix();
        if self.realm.is_empty() {
            format!("{}{}", prefix, self.imsi)
        } else {
            format!("{}{}@{}", prefix, self.imsi, self.realm)
        }
    }

    fn permanent_prefix(&self) -> char {
        if self.method_type == TYPE_AKA_PRIME {
            '6'
        } else {
            '0'
        }
    }

    /// Only the leading character is checked against the method's permanent
    /// tag; the remainder is not validated as an IMSI.
    fn is_permanent_identity(&self, identity: &str) -> bool {
        identity.chars().next() == Some(self.permanent_prefix())
    }

    fn handle_challenge(
        &self,
        req: &AkaPacket,
        raw: &[u8],
        session: &mut Session,
    ) -> Result<AkaPacket, AkaError> {
        if let Some(attr_type) = req.unknown_non_skippable() {
            debug!(attr_type, "unrecognized non-skippable attribute, rejecting authentication");
            return Ok(self.authentication_reject(req));
        }
        let (rand, autn, net_name) = self.extract_challenge_params(req)?;

        let milenage = self.milenage();
        let (res, ck, ik, ak) = milenage.f2345(&rand);

        let identity = if !session.inner_identity.is_empty() {
            session.inner_identity.clone()
        } else if !session.outer_identity.is_empty() {
            session.outer_identity.clone()
        } else {
            return Err(AkaError::MissingIdentity);
        };

        // SQN XOR AK is AUTN[0..6]; needed both for CK'/IK' derivation and
        // for recovering the SQN below.
        let mut sqn_xor_ak = [0u8; 6];
        sqn_xor_ak.copy_from_slice(&autn[..6]);

        let k_aut = if self.method_type == TYPE_AKA_PRIME {
            let (ck_prime, ik_prime) = derive_ck_ik_prime(&ck, &ik, &net_name, &sqn_xor_ak);
            derive_keys_aka_prime(&identity, &ck_prime, &ik_prime).k_aut
        } else {
            derive_keys_aka(&identity, &ck, &ik).k_aut
        };

        match verify_message_mac(raw, &k_aut, self.mac_algorithm()) {
            Ok(true) => {}
            Ok(false) | Err(AkaCodecError::MissingMac) => {
                debug!("request AT_MAC missing or mismatched, rejecting authentication");
                return Ok(self.authentication_reject(req));
            }
            Err(err) => return Err(err.into()),
        }

        let mut sqn = [0u8; 6];
        for i in 0..6 {
            sqn[i] = autn[i] ^ ak[i];
        }
        let amf_in = [autn[6], autn[7]];
        if amf_in != self.amf {
            return Err(AkaError::AmfMismatch);
        }

        let mac_a = milenage.f1(&rand, &sqn, &amf_in);
        if mac_a != autn[8..16] {
            debug!("MAC-A mismatch, rejecting authentication");
            return Ok(self.authentication_reject(req));
        }

        // Freshness is only enforced when a store is configured; without
        // one the method never emits Synchronization-Failure.
        if let Some(store) = &self.store {
            let sqn_value = u64::from_be_bytes([0, 0, sqn[0], sqn[1], sqn[2], sqn[3], sqn[4], sqn[5]]);
            let mut state = store
                .borrow()
                .load(&self.imsi)?
                .unwrap_or_else(|| SubscriberState::with_initial_sqn(self.initial_sqn));
            if state.accept_sqn(sqn_value)? {
                // Persist before replying so a crash here can only force a
                // legitimate resync, never a stale-SQN double-accept.
                store.borrow_mut().save(&self.imsi, &state)?;
            } else {
                let auts = milenage.generate_auts(&rand, state.sqn_ms);
                return Ok(self.synchronization_failure(req, auts));
            }
        }

        session.phase = SessionPhase::ChallengeAnswered;

        let mut resp = AkaPacket::new(
            EapCode::Response,
            req.identifier,
            req.method_type,
            AkaSubtype::Challenge,
        );
        resp.attributes.push(AkaAttribute::Res(res.to_vec()));
        resp.seal_mac(&k_aut, self.mac_algorithm());
        Ok(resp)
    }

    fn extract_challenge_params(
        &self,
        req: &AkaPacket,
    ) -> Result<([u8; 16], [u8; 16], String), AkaError> {
        let mut rand = None;
        let mut autn = None;
        let mut net_name = String::new();
        for attr in &req.attributes {
            match attr {
                AkaAttribute::Rand(value) => rand = Some(*value),
                AkaAttribute::Autn(value) => autn = Some(*value),
                AkaAttribute::KdfInput(name) => net_name = name.clone(),
                _ => {}
            }
        }
        let rand = rand.ok_or(AkaError::MissingRand)?;
        let autn = autn.ok_or(AkaError::MissingAutn)?;

        if self.method_type == TYPE_AKA_PRIME {
            if net_name.is_empty() {
                net_name = self.net_name.clone();
            }
            if net_name.is_empty() {
                return Err(AkaError::MissingNetworkName);
            }
        }
        Ok((rand, autn, net_name))
    }

    fn authentication_reject(&self, req: &AkaPacket) -> AkaPacket {
        AkaPacket::new(
            EapCode::Response,
            req.identifier,
            req.method_type,
            AkaSubtype::AuthenticationReject,
        )
    }

    fn synchronization_failure(&self, req: &AkaPacket, auts: [u8; 14]) -> AkaPacket {
        let mut resp = AkaPacket::new(
            EapCode::Response,
            req.identifier,
            req.method_type,
            AkaSubtype::SynchronizationFailure,
        );
        resp.attributes.push(AkaAttribute::Auts(auts));
        resp
    }
}

impl EapMethod for AkaMethod {
    fn method_type(&self) -> u8 {
        self.method_type
    }

    fn handle(&self, req: &EapPacket, session: &mut Session) -> Result<EapPacket, AkaError> {
        let raw = req.to_bytes();
        let aka_req = AkaPacket::parse(&raw)?;
        if aka_req.method_type != self.method_type {
            return Err(AkaError::UnsupportedMethodType(aka_req.method_type));
        }

        let response = match aka_req.subtype {
            AkaSubtype::Identity => {
                if session.phase == SessionPhase::ChallengeAnswered {
                    return Err(AkaError::UnexpectedSubtype(aka_req.subtype.as_u8()));
                }
                let resp = self.handle_identity(&aka_req, session)?;
                session.phase = SessionPhase::IdentityAnswered;
                resp
            }
            AkaSubtype::Challenge => self.handle_challenge(&aka_req, &raw, session)?,
            other => return Err(AkaError::UnexpectedSubtype(other.as_u8())),
        };

        Ok(response.to_eap()?)
    }
}

/// Build the AUTN a network would send for the given vector inputs.
///
/// `AUTN = (SQN xor AK) || AMF || MAC-A`. Used by the integration tests to
/// play the server role.
pub fn build_autn(
    milenage: &Milenage,
    rand: &[u8; 16],
    sqn: u64,
    amf: &[u8; 2],
    ak: &[u8; 6],
) -> [u8; 16] {
    let sqn_bytes = sqn_bytes(sqn);
    let mac_a = milenage.f1(rand, &sqn_bytes, amf);

    let mut autn = [0u8; 16];
    for i in 0..6 {
        autn[i] = sqn_bytes[i] ^ ak[i];
    }
    autn[6..8].copy_from_slice(amf);
    autn[8..16].copy_from_slice(&mac_a);
    autn
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqnstore::MemoryStore;
    use eapaka_proto::aka::{AT_AUTS, AT_IDENTITY, AT_RES};
    use hex_literal::hex;

    const KI: [u8; 16] = hex!("465b5ce8b199b49faa5f0a2ee238a6bc");
    const OPC: [u8; 16] = hex!("cd63cb71954a9f4e48a5994e37a02baf");
    const AMF: [u8; 2] = [0x80, 0x00];
    const RAND: [u8; 16] = hex!("23553cbe9637a89d218ae64dae47bf35");

    fn method_options(method_type: u8) -> AkaMethodOptions {
        AkaMethodOptions {
            method_type,
            imsi: "440100123456789".to_string(),
            ki: KI.to_vec(),
            opc: OPC.to_vec(),
            amf: AMF.to_vec(),
            net_name: String::new(),
            realm: String::new(),
            initial_sqn: 0,
            store: None,
            permanent_id_policy: PermanentIdPolicy::Always,
            permanent_identity_override: String::new(),
            outer_identity_update_on_permanent_req: true,
        }
    }

    fn identity_request(identifier: u8, attrs: Vec<AkaAttribute>) -> EapPacket {
        let mut pkt = AkaPacket::new(EapCode::Request, identifier, TYPE_AKA, AkaSubtype::Identity);
        pkt.attributes = attrs;
        pkt.to_eap().unwrap()
    }

    /// Build a server-side Challenge request with a valid AT_MAC for the
    /// session identity.
    fn challenge_request(identifier: u8, sqn: u64, identity: &str) -> (EapPacket, Vec<u8>) {
        let milenage = Milenage::new_with_opc(KI, OPC);
        let (_res, ck, ik, ak) = milenage.f2345(&RAND);
        let autn = build_autn(&milenage, &RAND, sqn, &AMF, &ak);

        let k_aut = derive_keys_aka(identity, &ck, &ik).k_aut;

        let mut pkt = AkaPacket::new(EapCode::Request, identifier, TYPE_AKA, AkaSubtype::Challenge);
        pkt.attributes.push(AkaAttribute::Rand(RAND));
        pkt.attributes.push(AkaAttribute::Autn(autn));
        pkt.seal_mac(&k_aut, MacAlgorithm::HmacMd5);
        (pkt.to_eap().unwrap(), k_aut)
    }

    #[test]
    fn test_constructor_validation() {
        assert!(matches!(
            AkaMethod::new(AkaMethodOptions {
                method_type: 4,
                ..method_options(TYPE_AKA)
            }),
            Err(AkaError::UnsupportedMethodType(4))
        ));
        assert!(matches!(
            AkaMethod::new(AkaMethodOptions {
                ki: vec![0; 8],
                ..method_options(TYPE_AKA)
            }),
            Err(AkaError::InvalidKi)
        ));
        assert!(matches!(
            AkaMethod::new(AkaMethodOptions {
                amf: vec![0; 1],
                ..method_options(TYPE_AKA)
            }),
            Err(AkaError::InvalidAmf)
        ));
        assert!(matches!(
            AkaMethod::new(AkaMethodOptions {
                imsi: String::new(),
                ..method_options(TYPE_AKA)
            }),
            Err(AkaError::MissingImsi)
        ));
    }

    #[test]
    fn test_identity_response_uses_session_identity() {
        let method = AkaMethod::new(method_options(TYPE_AKA)).unwrap();
        let mut session = Session::new("user@example");

        let req = identity_request(1, vec![]);
        let resp = method.handle(&req, &mut session).unwrap();
        let aka = AkaPacket::parse(&resp.to_bytes()).unwrap();
        assert_eq!(aka.subtype, AkaSubtype::Identity);
        assert_eq!(
            aka.find_attribute(AT_IDENTITY),
            Some(&AkaAttribute::Identity("user@example".into()))
        );
    }

    #[test]
    fn test_any_and_fullauth_id_req_reuse_identity() {
        let method = AkaMethod::new(method_options(TYPE_AKA)).unwrap();
        for attr in [AkaAttribute::AnyIdReq, AkaAttribute::FullauthIdReq] {
            let mut session = Session::new("user@example");
            let req = identity_request(4, vec![attr]);
            let resp = method.handle(&req, &mut session).unwrap();
            let aka = AkaPacket::parse(&resp.to_bytes()).unwrap();
            assert_eq!(
                aka.find_attribute(AT_IDENTITY),
                Some(&AkaAttribute::Identity("user@example".into()))
            );
        }
    }

    #[test]
    fn test_permanent_id_always_generates_from_imsi() {
        let method = AkaMethod::new(AkaMethodOptions {
            realm: "wlan.mnc010.mcc440.3gppnetwork.org".to_string(),
            ..method_options(TYPE_AKA)
        })
        .unwrap();
        let mut session = Session::new("2pseudonym@example");

        let req = identity_request(2, vec![AkaAttribute::PermanentIdReq]);
        let resp = method.handle(&req, &mut session).unwrap();
        let aka = AkaPacket::parse(&resp.to_bytes()).unwrap();

        let expected = "0440100123456789@wlan.mnc010.mcc440.3gppnetwork.org";
        assert_eq!(
            aka.find_attribute(AT_IDENTITY),
            Some(&AkaAttribute::Identity(expected.into()))
        );
        assert_eq!(session.inner_identity, expected);
        assert_eq!(session.outer_identity, expected);
    }

    #[test]
    fn test_permanent_id_override_without_outer_update() {
        let method = AkaMethod::new(AkaMethodOptions {
            permanent_identity_override: "0440100123456789@wlan.example".to_string(),
            outer_identity_update_on_permanent_req: false,
            ..method_options(TYPE_AKA)
        })
        .unwrap();
        let mut session = Session::new("2pseudonym@example");

        let req = identity_request(1, vec![AkaAttribute::PermanentIdReq]);
        let resp = method.handle(&req, &mut session).unwrap();
        let aka = AkaPacket::parse(&resp.to_bytes()).unwrap();

        assert_eq!(resp.identifier, 1);
        assert_eq!(aka.subtype, AkaSubtype::Identity);
        assert_eq!(
            aka.find_attribute(AT_IDENTITY),
            Some(&AkaAttribute::Identity("0440100123456789@wlan.example".into()))
        );
        assert_eq!(session.inner_identity, "0440100123456789@wlan.example");
        assert_eq!(session.outer_identity, "2pseudonym@example");
    }

    #[test]
    fn test_permanent_id_deny_rejects() {
        let method = AkaMethod::new(AkaMethodOptions {
            permanent_id_policy: PermanentIdPolicy::Deny,
            ..method_options(TYPE_AKA)
        })
        .unwrap();
        let mut session = Session::new("2pseudonym@example");

        let req = identity_request(3, vec![AkaAttribute::PermanentIdReq]);
        let resp = method.handle(&req, &mut session).unwrap();
        let aka = AkaPacket::parse(&resp.to_bytes()).unwrap();
        assert_eq!(aka.subtype, AkaSubtype::AuthenticationReject);
        assert!(aka.attributes.is_empty());
    }

    #[test]
    fn test_permanent_id_conservative_reuses_permanent_outer() {
        let method = AkaMethod::new(AkaMethodOptions {
            permanent_id_policy: PermanentIdPolicy::Conservative,
            ..method_options(TYPE_AKA)
        })
        .unwrap();
        let mut session = Session::new("0440100123456789@example");

        let req = identity_request(1, vec![AkaAttribute::PermanentIdReq]);
        let resp = method.handle(&req, &mut session).unwrap();
        let aka = AkaPacket::parse(&resp.to_bytes()).unwrap();
        assert_eq!(
            aka.find_attribute(AT_IDENTITY),
            Some(&AkaAttribute::Identity("0440100123456789@example".into()))
        );
    }

    #[test]
    fn test_permanent_id_conservative_rejects_pseudonym() {
        let method = AkaMethod::new(AkaMethodOptions {
            permanent_id_policy: PermanentIdPolicy::Conservative,
            ..method_options(TYPE_AKA)
        })
        .unwrap();
        let mut session = Session::new("2pseudonym@example");

        let req = identity_request(1, vec![AkaAttribute::PermanentIdReq]);
        let resp = method.handle(&req, &mut session).unwrap();
        let aka = AkaPacket::parse(&resp.to_bytes()).unwrap();
        assert_eq!(aka.subtype, AkaSubtype::AuthenticationReject);
    }

    #[test]
    fn test_challenge_produces_res_and_mac() {
        let store: Rc<RefCell<dyn SqnStore>> = Rc::new(RefCell::new(MemoryStore::new()));
        let method = AkaMethod::new(AkaMethodOptions {
            store: Some(store.clone()),
            ..method_options(TYPE_AKA)
        })
        .unwrap();
        let mut session = Session::new("0440100123456789@example");

        let (req, k_aut) = challenge_request(7, 0x21, "0440100123456789@example");
        let resp = method.handle(&req, &mut session).unwrap();
        let raw = resp.to_bytes();
        let aka = AkaPacket::parse(&raw).unwrap();

        assert_eq!(aka.subtype, AkaSubtype::Challenge);
        assert_eq!(aka.identifier, 7);
        let milenage = Milenage::new_with_opc(KI, OPC);
        let expected_res = milenage.f2345(&RAND).0;
        assert_eq!(
            aka.find_attribute(AT_RES),
            Some(&AkaAttribute::Res(expected_res.to_vec()))
        );
        assert!(verify_message_mac(&raw, &k_aut, MacAlgorithm::HmacMd5).unwrap());
        assert_eq!(session.phase, SessionPhase::ChallengeAnswered);

        // the accepted SQN was persisted before the reply
        let state = store.borrow().load("440100123456789").unwrap().unwrap();
        assert_eq!(state.sqn_ms, 0x21);
    }

    #[test]
    fn test_challenge_replay_emits_synchronization_failure() {
        let store: Rc<RefCell<dyn SqnStore>> = Rc::new(RefCell::new(MemoryStore::new()));
        let method = AkaMethod::new(AkaMethodOptions {
            store: Some(store.clone()),
            ..method_options(TYPE_AKA)
        })
        .unwrap();
        let mut session = Session::new("0440100123456789@example");

        let (req, _) = challenge_request(1, 0x21, "0440100123456789@example");
        method.handle(&req, &mut session).unwrap();

        // replaying the same SQN must trigger AUTS
        let (req, _) = challenge_request(2, 0x21, "0440100123456789@example");
        let resp = method.handle(&req, &mut session).unwrap();
        let aka = AkaPacket::parse(&resp.to_bytes()).unwrap();
        assert_eq!(aka.subtype, AkaSubtype::SynchronizationFailure);

        let milenage = Milenage::new_with_opc(KI, OPC);
        let expected_auts = milenage.generate_auts(&RAND, 0x21);
        assert_eq!(
            aka.find_attribute(AT_AUTS),
            Some(&AkaAttribute::Auts(expected_auts))
        );
    }

    #[test]
    fn test_challenge_without_store_skips_freshness() {
        let method = AkaMethod::new(method_options(TYPE_AKA)).unwrap();
        let mut session = Session::new("0440100123456789@example");

        for identifier in [1, 2] {
            let (req, _) = challenge_request(identifier, 0x21, "0440100123456789@example");
            let resp = method.handle(&req, &mut session).unwrap();
            let aka = AkaPacket::parse(&resp.to_bytes()).unwrap();
            // same SQN accepted twice: no store, no sync-failure
            assert_eq!(aka.subtype, AkaSubtype::Challenge);
        }
    }

    #[test]
    fn test_challenge_bad_request_mac_rejects() {
        let method = AkaMethod::new(method_options(TYPE_AKA)).unwrap();
        let mut session = Session::new("0440100123456789@example");

        let milenage = Milenage::new_with_opc(KI, OPC);
        let ak = milenage.f2345(&RAND).3;
        let autn = build_autn(&milenage, &RAND, 0x21, &AMF, &ak);
        let mut pkt = AkaPacket::new(EapCode::Request, 1, TYPE_AKA, AkaSubtype::Challenge);
        pkt.attributes.push(AkaAttribute::Rand(RAND));
        pkt.attributes.push(AkaAttribute::Autn(autn));
        pkt.seal_mac(&[0u8; 16], MacAlgorithm::HmacMd5); // wrong key

        let resp = method.handle(&pkt.to_eap().unwrap(), &mut session).unwrap();
        let aka = AkaPacket::parse(&resp.to_bytes()).unwrap();
        assert_eq!(aka.subtype, AkaSubtype::AuthenticationReject);
    }

    #[test]
    fn test_challenge_missing_mac_rejects() {
        let method = AkaMethod::new(method_options(TYPE_AKA)).unwrap();
        let mut session = Session::new("0440100123456789@example");

        let milenage = Milenage::new_with_opc(KI, OPC);
        let ak = milenage.f2345(&RAND).3;
        let autn = build_autn(&milenage, &RAND, 0x21, &AMF, &ak);
        let mut pkt = AkaPacket::new(EapCode::Request, 1, TYPE_AKA, AkaSubtype::Challenge);
        pkt.attributes.push(AkaAttribute::Rand(RAND));
        pkt.attributes.push(AkaAttribute::Autn(autn));

        let resp = method.handle(&pkt.to_eap().unwrap(), &mut session).unwrap();
        let aka = AkaPacket::parse(&resp.to_bytes()).unwrap();
        assert_eq!(aka.subtype, AkaSubtype::AuthenticationReject);
    }

    #[test]
    fn test_challenge_amf_mismatch_is_hard_error() {
        let method = AkaMethod::new(method_options(TYPE_AKA)).unwrap();
        let mut session = Session::new("0440100123456789@example");

        let milenage = Milenage::new_with_opc(KI, OPC);
        let (_res, ck, ik, ak) = milenage.f2345(&RAND);
        let wrong_amf = [0x00, 0x01];
        let autn = build_autn(&milenage, &RAND, 0x21, &wrong_amf, &ak);
        let k_aut = derive_keys_aka("0440100123456789@example", &ck, &ik).k_aut;

        let mut pkt = AkaPacket::new(EapCode::Request, 1, TYPE_AKA, AkaSubtype::Challenge);
        pkt.attributes.push(AkaAttribute::Rand(RAND));
        pkt.attributes.push(AkaAttribute::Autn(autn));
        pkt.seal_mac(&k_aut, MacAlgorithm::HmacMd5);

        assert!(matches!(
            method.handle(&pkt.to_eap().unwrap(), &mut session),
            Err(AkaError::AmfMismatch)
        ));
    }

    #[test]
    fn test_challenge_corrupted_mac_a_rejects() {
        let method = AkaMethod::new(method_options(TYPE_AKA)).unwrap();
        let mut session = Session::new("0440100123456789@example");

        let milenage = Milenage::new_with_opc(KI, OPC);
        let (_res, ck, ik, ak) = milenage.f2345(&RAND);
        let mut autn = build_autn(&milenage, &RAND, 0x21, &AMF, &ak);
        autn[12] ^= 0xFF; // corrupt MAC-A
        let k_aut = derive_keys_aka("0440100123456789@example", &ck, &ik).k_aut;

        let mut pkt = AkaPacket::new(EapCode::Request, 1, TYPE_AKA, AkaSubtype::Challenge);
        pkt.attributes.push(AkaAttribute::Rand(RAND));
        pkt.attributes.push(AkaAttribute::Autn(autn));
        pkt.seal_mac(&k_aut, MacAlgorithm::HmacMd5);

        let resp = method.handle(&pkt.to_eap().unwrap(), &mut session).unwrap();
        let aka = AkaPacket::parse(&resp.to_bytes()).unwrap();
        assert_eq!(aka.subtype, AkaSubtype::AuthenticationReject);
    }

    #[test]
    fn test_challenge_missing_rand_is_hard_error() {
        let method = AkaMethod::new(method_options(TYPE_AKA)).unwrap();
        let mut session = Session::new("user@example");

        let mut pkt = AkaPacket::new(EapCode::Request, 1, TYPE_AKA, AkaSubtype::Challenge);
        pkt.attributes.push(AkaAttribute::Autn([0u8; 16]));
        assert!(matches!(
            method.handle(&pkt.to_eap().unwrap(), &mut session),
            Err(AkaError::MissingRand)
        ));
    }

    #[test]
    fn test_aka_prime_requires_net_name() {
        let method = AkaMethod::new(method_options(TYPE_AKA_PRIME)).unwrap();
        let mut session = Session::new("6440100123456789@example");

        let mut pkt = AkaPacket::new(EapCode::Request, 1, TYPE_AKA_PRIME, AkaSubtype::Challenge);
        pkt.attributes.push(AkaAttribute::Rand(RAND));
        pkt.attributes.push(AkaAttribute::Autn([0u8; 16]));
        assert!(matches!(
            method.handle(&pkt.to_eap().unwrap(), &mut session),
            Err(AkaError::MissingNetworkName)
        ));
    }

    #[test]
    fn test_aka_prime_challenge_with_kdf_input() {
        let store: Rc<RefCell<dyn SqnStore>> = Rc::new(RefCell::new(MemoryStore::new()));
        let method = AkaMethod::new(AkaMethodOptions {
            store: Some(store),
            ..method_options(TYPE_AKA_PRIME)
        })
        .unwrap();
        let identity = "6440100123456789@example";
        let mut session = Session::new(identity);

        let milenage = Milenage::new_with_opc(KI, OPC);
        let (_res, ck, ik, ak) = milenage.f2345(&RAND);
        let autn = build_autn(&milenage, &RAND, 0x21, &AMF, &ak);
        let mut sqn_xor_ak = [0u8; 6];
        sqn_xor_ak.copy_from_slice(&autn[..6]);
        let (ck_prime, ik_prime) = derive_ck_ik_prime(&ck, &ik, "WLAN", &sqn_xor_ak);
        let k_aut = derive_keys_aka_prime(identity, &ck_prime, &ik_prime).k_aut;

        let mut pkt = AkaPacket::new(EapCode::Request, 5, TYPE_AKA_PRIME, AkaSubtype::Challenge);
        pkt.attributes.push(AkaAttribute::Rand(RAND));
        pkt.attributes.push(AkaAttribute::Autn(autn));
        pkt.attributes.push(AkaAttribute::KdfInput("WLAN".into()));
        pkt.attributes.push(AkaAttribute::Kdf(1));
        pkt.seal_mac(&k_aut, MacAlgorithm::HmacSha256);

        let resp = method.handle(&pkt.to_eap().unwrap(), &mut session).unwrap();
        let raw = resp.to_bytes();
        let aka = AkaPacket::parse(&raw).unwrap();
        assert_eq!(aka.subtype, AkaSubtype::Challenge);
        assert!(verify_message_mac(&raw, &k_aut, MacAlgorithm::HmacSha256).unwrap());
    }

    #[test]
    fn test_identity_after_challenge_is_unexpected() {
        let method = AkaMethod::new(method_options(TYPE_AKA)).unwrap();
        let mut session = Session::new("0440100123456789@example");
        session.phase = SessionPhase::ChallengeAnswered;

        let req = identity_request(1, vec![]);
        assert!(matches!(
            method.handle(&req, &mut session),
            Err(AkaError::UnexpectedSubtype(5))
        ));
    }

    #[test]
    fn test_unsupported_subtype_is_hard_error() {
        let method = AkaMethod::new(method_options(TYPE_AKA)).unwrap();
        let mut session = Session::new("user@example");

        let pkt = AkaPacket::new(EapCode::Request, 1, TYPE_AKA, AkaSubtype::Notification);
        assert!(matches!(
            method.handle(&pkt.to_eap().unwrap(), &mut session),
            Err(AkaError::UnexpectedSubtype(12))
        ));
    }

    #[test]
    fn test_unknown_non_skippable_attribute_rejects_challenge() {
        let method = AkaMethod::new(method_options(TYPE_AKA)).unwrap();
        let mut session = Session::new("user@example");

        let mut raw =
            AkaPacket::new(EapCode::Request, 1, TYPE_AKA, AkaSubtype::Challenge).encode();
        raw.extend_from_slice(&[60, 1, 0, 0]);
        let len = raw.len() as u16;
        raw[2..4].copy_from_slice(&len.to_be_bytes());

        let req = EapPacket::parse(&raw).unwrap();
        let resp = method.handle(&req, &mut session).unwrap();
        let aka = AkaPacket::parse(&resp.to_bytes()).unwrap();
        assert_eq!(aka.subtype, AkaSubtype::AuthenticationReject);
        assert!(aka.attributes.is_empty());
    }
}
