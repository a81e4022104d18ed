//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (0 <= TTLs <= 30 days, timeouts > 0)
//! - Reject chain names that would break the storage key layout
//! - Detect duplicate chain scopes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::GatewayConfig;

/// Upper bound for either nonce TTL.
pub const MAX_NONCE_TTL_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// A single semantic problem, tagged with the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.storage.db_path.trim().is_empty() {
        errors.push(ValidationError::new("storage.db_path", "must not be empty"));
    }

    for (field, ttl) in [
        ("nonce.local_nonce_ttl_ms", config.nonce.local_nonce_ttl_ms),
        ("nonce.pending_nonce_ttl_ms", config.nonce.pending_nonce_ttl_ms),
    ] {
        if ttl < 0 {
            errors.push(ValidationError::new(field, "must be greater than or equal to zero"));
        } else if ttl > MAX_NONCE_TTL_MS {
            errors.push(ValidationError::new(
                field,
                format!("must not exceed {} ms (30 days)", MAX_NONCE_TTL_MS),
            ));
        }
    }
    if config.nonce.reconcile_interval_secs == 0 {
        errors.push(ValidationError::new("nonce.reconcile_interval_secs", "must be greater than zero"));
    }

    if config.chains.is_empty() {
        errors.push(ValidationError::new("chains", "at least one chain must be configured"));
    }

    let mut seen_names = HashSet::new();
    for (i, chain) in config.chains.iter().enumerate() {
        let field = |name: &str| format!("chains[{}].{}", i, name);

        if chain.name.trim().is_empty() {
            errors.push(ValidationError::new(field("name"), "must not be empty"));
        } else if chain.name.contains('/') {
            errors.push(ValidationError::new(field("name"), "must not contain '/'"));
        } else if !seen_names.insert(chain.name.as_str()) {
            errors.push(ValidationError::new(
                field("name"),
                format!("duplicate chain '{}'", chain.name),
            ));
        }

        if chain.rpc_timeout_secs == 0 {
            errors.push(ValidationError::new(field("rpc_timeout_secs"), "must be greater than zero"));
        }
        if url::Url::parse(&chain.rpc_url).is_err() {
            errors.push(ValidationError::new(
                field("rpc_url"),
                format!("'{}' is not a valid URL", chain.rpc_url),
            ));
        }
        for url in &chain.failover_urls {
            if url::Url::parse(url).is_err() {
                errors.push(ValidationError::new(
                    field("failover_urls"),
                    format!("'{}' is not a valid URL", url),
                ));
            }
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ChainConfig;

    fn valid() -> GatewayConfig {
        GatewayConfig {
            chains: vec![ChainConfig::default()],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn test_negative_ttls_rejected() {
        let mut config = valid();
        config.nonce.local_nonce_ttl_ms = -5;
        config.nonce.pending_nonce_ttl_ms = -5;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].field, "nonce.local_nonce_ttl_ms");
    }

    #[test]
    fn test_oversized_ttls_rejected() {
        let mut config = valid();
        config.nonce.local_nonce_ttl_ms = i64::MAX;
        config.nonce.pending_nonce_ttl_ms = MAX_NONCE_TTL_MS;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "nonce.local_nonce_ttl_ms");
    }

    #[test]
    fn test_chain_name_rules() {
        let mut config = valid();
        config.chains.push(ChainConfig::default());
        config.chains.push(ChainConfig {
            name: "eth/mainnet".to_string(),
            ..Default::default()
        });
        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["chains[1].name", "chains[2].name"]);
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = valid();
        config.storage.db_path = String::new();
        config.chains[0].rpc_timeout_secs = 0;
        config.chains[0].rpc_url = "::nope::".to_string();
        config.observability.metrics_address = "nowhere".to_string();
        assert_eq!(validate_config(&config).unwrap_err().len(), 4);
    }
}
