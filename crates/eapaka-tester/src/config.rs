use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tool configuration loaded from YAML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub radius: RadiusConfig,
    #[serde(default)]
    pub radius_attrs: RadiusAttrs,
    #[serde(default)]
    pub eap: EapConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub sim: SimConfig,
    #[serde(default)]
    pub sqn_store: SqnStoreConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RadiusConfig {
    #[serde(default)]
    pub server_addr: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retries: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RadiusAttrs {
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
pub struct EapConfig {
    #[serde(default)]
    pub method_mismatch_policy: String,
    #[serde(default)]
    pub outer_identity_update_on_permanent_req: Option<bool>,
    #[serde(default)]
    pub permanent_id_policy: String,
    #[serde(default)]
    pub aka_prime: AkaPrimeConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AkaPrimeConfig {
    #[serde(default)]
    pub net_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub realm: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub imsi: String,
    #[serde(default)]
    pub ki: String,
    #[serde(default)]
    pub opc: String,
    #[serde(default)]
    pub amf: String,
    #[serde(default)]
    pub sqn_initial_hex: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SqnStoreConfig {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub path: String,
}

pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_METHOD_MISMATCH_POLICY: &str = "warn";
pub const DEFAULT_PERMANENT_ID_POLICY: &str = "always";

impl Config {
    /// Load and validate a config YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a config YAML payload.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(contents)?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Fill in defaults for optional fields.
    pub fn apply_defaults(&mut self) {
        if self.radius.timeout_ms == 0 {
            self.radius.timeout_ms = DEFAULT_TIMEOUT_MS;
        }
        if self.radius.retries == 0 {
            self.radius.retries = DEFAULT_RETRIES;
        }
        if self.eap.method_mismatch_policy.is_empty() {
            self.eap.method_mismatch_policy = DEFAULT_METHOD_MISMATCH_POLICY.to_string();
        }
        if self.eap.permanent_id_policy.is_empty() {
            self.eap.permanent_id_policy = DEFAULT_PERMANENT_ID_POLICY.to_string();
        }
        if self.eap.outer_identity_update_on_permanent_req.is_none() {
            self.eap.outer_identity_update_on_permanent_req = Some(true);
        }
        if self.sqn_store.mode.is_empty() {
            self.sqn_store.mode = "file".to_string();
        }
    }

    /// Check required fields and basic format constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.radius.server_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("radius.server_addr is required".into()));
        }
        if self.radius.secret.trim().is_empty() {
            return Err(ConfigError::Invalid("radius.secret is required".into()));
        }
        if self.sim.imsi.trim().is_empty() {
            return Err(ConfigError::Invalid("sim.imsi is required".into()));
        }
        validate_hex_len("sim.ki", &self.sim.ki, 32)?;
        validate_hex_len("sim.opc", &self.sim.opc, 32)?;
        validate_hex_len("sim.amf", &self.sim.amf, 4)?;
        validate_hex_len("sim.sqn_initial_hex", &self.sim.sqn_initial_hex, 12)?;

        match self.sqn_store.mode.as_str() {
            "memory" | "file" => {}
            _ => {
                return Err(ConfigError::Invalid(
                    "sqn_store.mode must be memory or file".into(),
                ));
            }
        }
        if self.sqn_store.mode == "file" && self.sqn_store.path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "sqn_store.path is required for file mode".into(),
            ));
        }
        if !matches!(
            self.eap.method_mismatch_policy.as_str(),
            "strict" | "warn" | "allow"
        ) {
            return Err(ConfigError::Invalid(
                "eap.method_mismatch_policy must be strict, warn, or allow".into(),
            ));
        }
        if !matches!(
            self.eap.permanent_id_policy.as_str(),
            "always" | "conservative" | "deny"
        ) {
            return Err(ConfigError::Invalid(
                "eap.permanent_id_policy must be always, conservative, or deny".into(),
            ));
        }
        Ok(())
    }
}

fn validate_hex_len(label: &str, value: &str, expected: usize) -> Result<(), ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::Invalid(format!("{} is required", label)));
    }
    if value.len() != expected {
        return Err(ConfigError::Invalid(format!(
            "{} must be {} hex chars",
            label, expected
        )));
    }
    if !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConfigError::Invalid(format!("{} must be hex", label)));
    }
    Ok(())
}
