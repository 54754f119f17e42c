//! Error types for vpn-throttle.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThrottleError {
    #[error("Invalid IP address: {0}")]
    AddressParse(String),

    #[error("Command `{command}` failed (exit code {code:?}): {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Invalid UDP port: {0}")]
    InvalidPort(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limit lookup failed: {0}")]
    RateLookup(String),

    #[error("Invalid rate: {0} kbps (must be positive)")]
    InvalidRate(u32),

    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ThrottleError {
    /// Process exit code reported when this error aborts an invocation.
    pub fn exit_code(&self) -> i32 {
        match self {
            ThrottleError::Config(_) | ThrottleError::MissingEnv(_) => 1,
            ThrottleError::Command { .. } => 2,
            ThrottleError::AddressParse(_)
            | ThrottleError::InvalidPort(_)
            | ThrottleError::InvalidRate(_) => 3,
            ThrottleError::Parse(_) => 4,
            ThrottleError::RateLookup(_) => 5,
        }
    }
}

/// Exit code for an arbitrary error chain, looking through `anyhow` context.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ThrottleError>())
        .map(ThrottleError::exit_code)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_codes_are_distinct_per_kind() {
        let command = ThrottleError::Command {
            command: "tc class add".to_string(),
            code: Some(2),
            stderr: "RTNETLINK answers: File exists".to_string(),
        };
        assert_eq!(command.exit_code(), 2);
        assert_eq!(ThrottleError::AddressParse("x".into()).exit_code(), 3);
        assert_eq!(ThrottleError::Parse("x".into()).exit_code(), 4);
        assert_eq!(ThrottleError::RateLookup("x".into()).exit_code(), 5);
        assert_eq!(ThrottleError::MissingEnv("PLUTO_VERB").exit_code(), 1);
    }

    #[test]
    fn test_exit_code_through_context() {
        let err: anyhow::Error = Err::<(), _>(ThrottleError::Parse("no flowid".into()))
            .context("Failed to discover rule")
            .unwrap_err();
        assert_eq!(exit_code_for(&err), 4);
    }

    #[test]
    fn test_exit_code_for_foreign_error() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(exit_code_for(&err), 1);
    }

    #[test]
    fn test_command_error_display() {
        let err = ThrottleError::Command {
            command: "tc qdisc show dev eth0".to_string(),
            code: Some(1),
            stderr: "Cannot find device".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command `tc qdisc show dev eth0` failed (exit code Some(1)): Cannot find device"
        );
    }
}
