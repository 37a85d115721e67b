use crate::config::Config;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestcaseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid testcase: {0}")]
    Invalid(String),
}

/// A single test case session definition loaded from YAML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Case {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,

    /// Outer identity asserted in EAP-Response/Identity and User-Name.
    #[serde(default)]
    pub identity: String,

    #[serde(default)]
    pub radius: CaseRadius,
    #[serde(default)]
    pub eap: CaseEap,
    #[serde(default)]
    pub sqn: CaseSqn,
    #[serde(default)]
    pub expect: Expect,
    #[serde(default)]
    pub trace: CaseTrace,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseRadius {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub attributes: CaseRadiusAttrs,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseRadiusAttrs {
    #[serde(default)]
    pub nas_ip_address: String,
    #[serde(default)]
    pub nas_identifier: String,
    #[serde(default)]
    pub called_station_id: String,
    #[serde(default)]
    pub calling_station_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseEap {
    #[serde(default)]
    pub method_mismatch_policy: String,
    #[serde(default)]
    pub outer_identity_update_on_permanent_req: Option<bool>,
    #[serde(default)]
    pub permanent_id_policy: String,
    #[serde(default)]
    pub permanent_identity_override: String,
    #[serde(default)]
    pub aka_prime: CaseAkaPrime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseAkaPrime {
    #[serde(default)]
    pub net_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseSqn {
    #[serde(default)]
    pub reset: bool,
    /// When false, forces the store to memory regardless of configuration.
    #[serde(default)]
    pub persist: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Expect {
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub reject_hint_contains: String,
    #[serde(default)]
    pub mppe: ExpectMppe,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpectMppe {
    #[serde(default)]
    pub require_present: Option<bool>,
    /// Literal expected key with `hex:` or `b64:` prefix.
    #[serde(default)]
    pub send_key: String,
    #[serde(default)]
    pub recv_key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseTrace {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub unsafe_log: bool,
    #[serde(default)]
    pub dump_eap_hex: Option<bool>,
    #[serde(default)]
    pub dump_radius_attrs: Option<bool>,
    #[serde(default)]
    pub save_path: String,
}

impl Case {
    /// Load and validate a testcase YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TestcaseError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a testcase YAML payload.
    pub fn from_yaml(contents: &str) -> Result<Self, TestcaseError> {
        let case: Case = serde_yaml::from_str(contents)?;
        case.validate()?;
        Ok(case)
    }

    /// Check the schema constraints.
    pub fn validate(&self) -> Result<(), TestcaseError> {
        if self.version != 1 {
            return Err(TestcaseError::Invalid("version must be 1".into()));
        }
        if self.identity.trim().is_empty() {
            return Err(TestcaseError::Invalid("identity is required".into()));
        }
        match self.expect.result.as_str() {
            "accept" | "reject" => {}
            _ => {
                return Err(TestcaseError::Invalid(
                    "expect.result must be accept or reject".into(),
                ));
            }
        }
        if !self.eap.method_mismatch_policy.is_empty()
            && !matches!(
                self.eap.method_mismatch_policy.as_str(),
                "strict" | "warn" | "allow"
            )
        {
            return Err(TestcaseError::Invalid(
                "eap.method_mismatch_policy must be strict, warn, or allow".into(),
            ));
        }
        if !self.eap.permanent_id_policy.is_empty()
            && !matches!(
                self.eap.permanent_id_policy.as_str(),
                "always" | "conservative" | "deny"
            )
        {
            return Err(TestcaseError::Invalid(
                "eap.permanent_id_policy must be always, conservative, or deny".into(),
            ));
        }
        if !self.trace.level.is_empty() && !matches!(self.trace.level.as_str(), "normal" | "verbose")
        {
            return Err(TestcaseError::Invalid(
                "trace.level must be normal or verbose".into(),
            ));
        }
        if !self.expect.mppe.send_key.is_empty() && !has_key_prefix(&self.expect.mppe.send_key) {
            return Err(TestcaseError::Invalid(
                "expect.mppe.send_key must start with hex: or b64:".into(),
            ));
        }
        if !self.expect.mppe.recv_key.is_empty() && !has_key_prefix(&self.expect.mppe.recv_key) {
            return Err(TestcaseError::Invalid(
                "expect.mppe.recv_key must start with hex: or b64:".into(),
            ));
        }
        Ok(())
    }

    /// Override config values with the testcase's optional fields.
    pub fn merged_config(&self, base: &Config) -> Config {
        let mut out = base.clone();

        if let Some(timeout_ms) = self.radius.timeout_ms {
            out.radius.timeout_ms = timeout_ms;
        }
        if let Some(retries) = self.radius.retries {
            out.radius.retries = retries;
        }
        if !self.radius.attributes.nas_ip_address.is_empty() {
            out.radius_attrs.nas_ip_address = self.radius.attributes.nas_ip_address.clone();
        }
        if !self.radius.attributes.nas_identifier.is_empty() {
            out.radius_attrs.nas_identifier = self.radius.attributes.nas_identifier.clone();
        }
        if !self.radius.attributes.called_station_id.is_empty() {
            out.radius_attrs.called_station_id = self.radius.attributes.called_station_id.clone();
        }
        if !self.radius.attributes.calling_station_id.is_empty() {
            out.radius_attrs.calling_station_id = self.radius.attributes.calling_station_id.clone();
        }

        if !self.eap.method_mismatch_policy.is_empty() {
            out.eap.method_mismatch_policy = self.eap.method_mismatch_policy.clone();
        }
        if let Some(update) = self.eap.outer_identity_update_on_permanent_req {
            out.eap.outer_identity_update_on_permanent_req = Some(update);
        }
        if !self.eap.permanent_id_policy.is_empty() {
            out.eap.permanent_id_policy = self.eap.permanent_id_policy.clone();
        }
        if !self.eap.aka_prime.net_name.is_empty() {
            out.eap.aka_prime.net_name = self.eap.aka_prime.net_name.clone();
        }

        out
    }
}

fn has_key_prefix(value: &str) -> bool {
    value.starts_with("hex:") || value.starts_with("b64:")
}
