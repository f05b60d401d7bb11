//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses parse and value ranges are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::uri::Authority;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("upstream.address: {value:?} is not a host:port authority")]
    InvalidUpstream { value: String },

    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_socket_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_socket_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if let Some(address) = &config.upstream.address {
        let valid = address
            .parse::<Authority>()
            .map(|authority| authority.port_u16().is_some())
            .unwrap_or(false);
        if !valid {
            errors.push(ValidationError::InvalidUpstream { value: address.clone() });
        }
    }

    let positives: [(&'static str, u64); 4] = [
        ("listener.max_connections", config.listener.max_connections as u64),
        ("upstream.connect_timeout_secs", config.upstream.connect_timeout_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        (
            "envelope.max_buffer_bytes",
            config.envelope.max_buffer_bytes.map_or(1, |limit| limit as u64),
        ),
    ];
    for (field, value) in positives {
        if value == 0 {
            errors.push(ValidationError::NotPositive { field });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
