//! EAP peer dispatcher
//!
//! Routes server EAP-Requests to the registered method handlers, answers
//! Identity requests from the session's outer identity, and applies the
//! method-mismatch policy when an expected method type is pinned.

use crate::aka_method::AkaError;
use eapaka_proto::eap::{EapCode, EapPacket, TYPE_IDENTITY};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// How to react when the server offers a different method than expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MethodMismatchPolicy {
    /// Abort the session with a `MethodMismatch` error.
    Strict,
    /// Log a warning and proceed.
    #[default]
    Warn,
    /// Proceed silently.
    Allow,
}

impl FromStr for MethodMismatchPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "strict" => Ok(MethodMismatchPolicy::Strict),
            "warn" => Ok(MethodMismatchPolicy::Warn),
            "allow" => Ok(MethodMismatchPolicy::Allow),
            other => Err(format!("unsupported method_mismatch_policy {:?}", other)),
        }
    }
}

/// Progress of the method conversation within one session.
///
/// Identity requests are not accepted once a Challenge has been answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Start,
    IdentityAnswered,
    ChallengeAnswered,
}

/// Outer/inner identity state for the current EAP session.
///
/// The outer identity is asserted in EAP-Response/Identity and the RADIUS
/// User-Name; the inner identity is bound into key derivation. Both can be
/// rewritten by the AKA identity handler when a permanent identity is
/// issued.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub outer_identity: String,
    pub inner_identity: String,
    pub phase: SessionPhase,
}

impl Session {
    pub fn new(outer_identity: impl Into<String>) -> Self {
        Session {
            outer_identity: outer_identity.into(),
            inner_identity: String::new(),
            phase: SessionPhase::Start,
        }
    }
}

/// An EAP method capability registered with the peer.
pub trait EapMethod {
    /// The EAP method type byte this handler answers for.
    fn method_type(&self) -> u8;

    /// Process one EAP-Request for this method.
    fn handle(&self, req: &EapPacket, session: &mut Session) -> Result<EapPacket, AkaError>;
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("unsupported EAP code {0}")]
    UnsupportedCode(u8),

    #[error("unsupported EAP method {0}")]
    UnsupportedMethod(u8),

    #[error("method mismatch expected={expected} received={received}")]
    MethodMismatch { expected: u8, received: u8 },

    #[error("outer identity is required")]
    MissingOuterIdentity,

    #[error(transparent)]
    Method(#[from] AkaError),
}

/// EAP peer holding the session and the registered method handlers.
pub struct Peer {
    pub session: Session,
    methods: HashMap<u8, Box<dyn EapMethod>>,
    policy: MethodMismatchPolicy,
    expected_method: Option<u8>,
}

impl Peer {
    pub fn new(session: Session) -> Self {
        Peer {
            session,
            methods: HashMap::new(),
            policy: MethodMismatchPolicy::default(),
            expected_method: None,
        }
    }

    pub fn register(&mut self, method: Box<dyn EapMethod>) {
        self.methods.insert(method.method_type(), method);
    }

    pub fn set_policy(&mut self, policy: MethodMismatchPolicy) {
        self.policy = policy;
    }

    /// Pin the method type the session is expected to negotiate.
    pub fn set_expected_method(&mut self, method_type: u8) {
        self.expected_method = Some(method_type);
    }

    /// Process a server request.
    ///
    /// Returns `Ok(None)` for EAP Success/Failure (terminal signal to the
    /// caller); otherwise the response packet to send next.
    pub fn handle(&mut self, req: &EapPacket) -> Result<Option<EapPacket>, PeerError> {
        match req.code {
            EapCode::Success | EapCode::Failure => return Ok(None),
            EapCode::Request => {}
            EapCode::Response => return Err(PeerError::UnsupportedCode(req.code.as_u8())),
        }

        let req_type = req.eap_type.unwrap_or(0);
        if req_type == TYPE_IDENTITY {
            if self.session.outer_identity.is_empty() {
                return Err(PeerError::MissingOuterIdentity);
            }
            return Ok(Some(EapPacket::identity_response(
                req.identifier,
                &self.session.outer_identity,
            )));
        }

        let method = self
            .methods
            .get(&req_type)
            .ok_or(PeerError::UnsupportedMethod(req_type))?;

        if let Some(expected) = self.expected_method {
            if expected != req_type {
                match self.policy {
                    MethodMismatchPolicy::Strict => {
                        return Err(PeerError::MethodMismatch {
                            expected,
                            received: req_type,
                        });
                    }
                    MethodMismatchPolicy::Warn => {
                        warn!(expected, received = req_type, "EAP method mismatch");
                    }
                    MethodMismatchPolicy::Allow => {}
                }
            }
        }

        let response = method.handle(req, &mut self.session)?;
        Ok(Some(response))
    }
}
