use std::fmt;

use crate::types::Mode;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    Unauthorized,
    RateLimited { reset: Option<String> },
    Decode(String),
    Timeout,
    Validation(String),
    UnknownAppliance(String),
    UnsupportedMode { appliance_id: String, mode: Mode },
    OutOfRange {
        value: f64,
        lower: Option<f64>,
        upper: Option<f64>,
    },
    UnsupportedFanOrSwing { setting: &'static str, value: String },
    UnsupportedPreset(String),
    Unavailable(String),
    Config(String),
    Io(std::io::Error),
}

impl Error {
    /// Transport failures are retried by the next poll cycle; everything
    /// else is deterministic given the current catalog.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Http(_)
                | Error::Unauthorized
                | Error::RateLimited { .. }
                | Error::Decode(_)
                | Error::Timeout
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Unauthorized => write!(f, "access token rejected"),
            Error::RateLimited { reset: Some(at) } => {
                write!(f, "rate limited until {at}")
            }
            Error::RateLimited { reset: None } => write!(f, "rate limited"),
            Error::Decode(msg) => write!(f, "malformed response: {msg}"),
            Error::Timeout => write!(f, "request timed out"),
            Error::Validation(msg) => write!(f, "invalid record: {msg}"),
            Error::UnknownAppliance(id) => write!(f, "unknown appliance: {id}"),
            Error::UnsupportedMode { appliance_id, mode } => {
                write!(f, "mode {mode} not supported by {appliance_id}")
            }
            Error::OutOfRange {
                value,
                lower,
                upper,
            } => {
                write!(f, "temperature {value} not valid for current mode")?;
                match (lower, upper) {
                    (Some(lo), Some(hi)) => write!(f, " (nearest: {lo}, {hi})"),
                    (Some(lo), None) => write!(f, " (maximum: {lo})"),
                    (None, Some(hi)) => write!(f, " (minimum: {hi})"),
                    (None, None) => write!(f, " (mode has no setpoint)"),
                }
            }
            Error::UnsupportedFanOrSwing { setting, value } => {
                write!(f, "{setting} {value:?} not supported in current mode")
            }
            Error::UnsupportedPreset(value) => write!(f, "preset {value:?} not supported"),
            Error::Unavailable(id) => write!(f, "appliance unavailable: {id}"),
            Error::Config(msg) => write!(f, "config error: {msg}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else if e.is_decode() {
            Error::Decode(e.to_string())
        } else {
            Error::Http(e)
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_reports_neighbours() {
        let err = Error::OutOfRange {
            value: 20.3,
            lower: Some(20.0),
            upper: Some(20.5),
        };
        assert_eq!(
            err.to_string(),
            "temperature 20.3 not valid for current mode (nearest: 20, 20.5)"
        );
    }

    #[test]
    fn out_of_range_without_steps() {
        let err = Error::OutOfRange {
            value: 24.0,
            lower: None,
            upper: None,
        };
        assert!(err.to_string().ends_with("(mode has no setpoint)"));
    }

    #[test]
    fn transport_classification() {
        assert!(Error::Timeout.is_transport());
        assert!(Error::Unauthorized.is_transport());
        assert!(!Error::Unavailable("a".into()).is_transport());
        assert!(!Error::Validation("x".into()).is_transport());
    }
}
