//! Environment-driven configuration, loaded once at startup.
//!
//! Mirrors the donor architecture's split of a top-level config struct into
//! per-concern sub-configs, each with its own `from_env` and `validate`.

use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level gateway configuration, composed of the per-concern configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub warehouse: WarehouseConfig,
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub monitoring: MonitoringConfig,
    pub interpreter: InterpreterConfig,
}

impl GatewayConfig {
    pub fn from_env() -> GatewayResult<Self> {
        Ok(Self {
            warehouse: WarehouseConfig::from_env()?,
            api: ApiConfig::from_env()?,
            auth: AuthConfig::from_env()?,
            monitoring: MonitoringConfig::from_env()?,
            interpreter: InterpreterConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> GatewayResult<()> {
        self.warehouse.validate()?;
        self.api.validate()?;
        self.auth.validate()?;
        self.monitoring.validate()?;
        self.interpreter.validate()?;
        Ok(())
    }
}

/// Configuration for the optional third-party LLM used as a Tier 2/3
/// NL-interpretation aide (§1 Out of scope: the LLM itself is an external
/// collaborator; this only configures how the gateway reaches it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    pub llm_enabled: bool,
    pub llm_api_base: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub tier2_timeout_seconds: u64,
    pub tier3_timeout_seconds: u64,
}

impl InterpreterConfig {
    pub fn from_env() -> GatewayResult<Self> {
        Ok(Self {
            llm_enabled: env::var("LLM_ENABLED").map(|v| v == "true").unwrap_or(false),
            llm_api_base: env::var("LLM_API_BASE").ok(),
            llm_api_key: env::var("LLM_API_KEY").ok(),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "claude-haiku".to_string()),
            tier2_timeout_seconds: env::var("TIER2_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            tier3_timeout_seconds: env::var("TIER3_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(45),
        })
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.llm_enabled && self.llm_api_base.is_none() {
            return Err(GatewayError::BadSchemaContract {
                message: "LLM_ENABLED requires LLM_API_BASE".into(),
            });
        }
        Ok(())
    }
}

/// Either password or key-pair credentials, per spec §6's env var contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WarehouseCredentials {
    Password { password: String },
    KeyPair { private_key_path: String, passphrase: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub account: String,
    pub username: String,
    pub credentials: WarehouseCredentials,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
    pub role: String,
    pub statement_timeout_seconds: u64,
    pub max_retries: u32,
}

fn env_var(name: &str) -> GatewayResult<String> {
    env::var(name).map_err(|_| GatewayError::MissingEnvVar { name: name.to_string() })
}

impl WarehouseConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let credentials = if let Ok(password) = env::var("SNOWFLAKE_PASSWORD") {
            WarehouseCredentials::Password { password }
        } else {
            let private_key_path = env_var("SF_PK_PATH")?;
            WarehouseCredentials::KeyPair {
                private_key_path,
                passphrase: env::var("SF_PK_PASSPHRASE").ok(),
            }
        };

        Ok(Self {
            account: env_var("SNOWFLAKE_ACCOUNT")?,
            username: env_var("SNOWFLAKE_USERNAME")?,
            credentials,
            warehouse: env_var("SNOWFLAKE_WAREHOUSE")?,
            database: env_var("SNOWFLAKE_DATABASE")?,
            schema: env_var("SNOWFLAKE_SCHEMA")?,
            role: env::var("SNOWFLAKE_ROLE").unwrap_or_else(|_| "PUBLIC".to_string()),
            statement_timeout_seconds: env::var("STATEMENT_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(90),
            max_retries: env::var("WAREHOUSE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
        })
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if !(60..=120).contains(&self.statement_timeout_seconds) {
            // Outside the documented default band is allowed but worth noting;
            // only reject genuinely unusable values.
            if self.statement_timeout_seconds == 0 {
                return Err(GatewayError::BadSchemaContract {
                    message: "STATEMENT_TIMEOUT_SECONDS must be greater than 0".into(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub activation_gateway_url: Option<String>,
    pub cors_allow_any_origin: bool,
    /// Where the schema contract JSON (§6) is read from at startup. Not
    /// named in spec.md's env var table, but the contract has to come from
    /// somewhere; kept here alongside the rest of the server/API concern
    /// rather than invented as a one-off `std::env::var` call at the call
    /// site (see DESIGN.md, Open Questions).
    pub schema_contract_path: String,
}

impl ApiConfig {
    pub fn from_env() -> GatewayResult<Self> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| GatewayError::BadSchemaContract {
                    message: "PORT must be a valid u16".into(),
                })?,
            activation_gateway_url: env::var("ACTIVATION_GATEWAY_URL").ok(),
            cors_allow_any_origin: env::var("CORS_ALLOW_ANY_ORIGIN")
                .map(|v| v == "true")
                .unwrap_or(true),
            schema_contract_path: env::var("SCHEMA_CONTRACT_PATH")
                .unwrap_or_else(|_| "config/schema_contract.json".to_string()),
        })
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.port == 0 {
            return Err(GatewayError::BadSchemaContract {
                message: "PORT must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

/// Auth-related configuration: the process-wide token pepper (§5) and
/// replay/activation windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub token_pepper: String,
    pub nonce_window_minutes: i64,
    pub activation_window_minutes: i64,
    pub activation_rate_limit_per_15min: u32,
}

impl AuthConfig {
    pub fn from_env() -> GatewayResult<Self> {
        Ok(Self {
            token_pepper: env_var("GATEWAY_TOKEN_PEPPER")?,
            nonce_window_minutes: env::var("NONCE_WINDOW_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            activation_window_minutes: env::var("ACTIVATION_WINDOW_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60 * 24),
            activation_rate_limit_per_15min: env::var("ACTIVATION_RATE_LIMIT_PER_15MIN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        })
    }

    pub fn validate(&self) -> GatewayResult<()> {
        if self.token_pepper.len() < 16 {
            return Err(GatewayError::BadSchemaContract {
                message: "GATEWAY_TOKEN_PEPPER must be at least 16 characters".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub prometheus_enabled: bool,
    pub prometheus_port: u16,
    pub log_level: String,
}

impl MonitoringConfig {
    pub fn from_env() -> GatewayResult<Self> {
        Ok(Self {
            prometheus_enabled: env::var("PROMETHEUS_ENABLED")
                .map(|v| v == "true")
                .unwrap_or(true),
            prometheus_port: env::var("PROMETHEUS_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(9090),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    pub fn validate(&self) -> GatewayResult<()> {
        let valid = ["trace", "debug", "info", "warn", "error"];
        if !valid.contains(&self.log_level.as_str()) {
            return Err(GatewayError::BadSchemaContract {
                message: format!(
                    "invalid LOG_LEVEL {:?}, must be one of {:?}",
                    self.log_level, valid
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn auth_config_rejects_short_pepper() {
        std::env::set_var("GATEWAY_TOKEN_PEPPER", "short");
        let cfg = AuthConfig::from_env().unwrap();
        assert!(cfg.validate().is_err());
        std::env::remove_var("GATEWAY_TOKEN_PEPPER");
    }

    #[test]
    #[serial]
    fn auth_config_accepts_long_pepper() {
        std::env::set_var("GATEWAY_TOKEN_PEPPER", "a_sufficiently_long_pepper_value");
        let cfg = AuthConfig::from_env().unwrap();
        assert!(cfg.validate().is_ok());
        std::env::remove_var("GATEWAY_TOKEN_PEPPER");
    }

    #[test]
    #[serial]
    fn monitoring_config_rejects_bad_log_level() {
        let cfg = MonitoringConfig {
            prometheus_enabled: true,
            prometheus_port: 9090,
            log_level: "verbose".to_string(),
        };
        assert!(cfg.validate().is_err());
    }
}
