//! Customized unified error type.

use std::error;
use std::fmt;
use std::io;
use std::net;
use std::num;
use std::string;

/// Customized error type for Chartpax.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ChartpaxError(pub String);

impl ChartpaxError {
    pub fn msg(msg: impl ToString) -> Self {
        ChartpaxError(msg.to_string())
    }
}

impl fmt::Display for ChartpaxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0) // do not display literal quotes
    }
}

impl error::Error for ChartpaxError {}

// Helper macro for saving boiler-plate `impl From<X>`s for transparent
// conversion from various common error types to `ChartpaxError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for ChartpaxError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                ChartpaxError(e.to_string())
            }
        }
    };
}

// Helper macro for saving boiler-plate `impl From<X<T>>`s for transparent
// conversion from various common generic error types to `ChartpaxError`.
macro_rules! impl_from_error_generic {
    ($error:ty) => {
        impl<T> From<$error> for ChartpaxError {
            fn from(e: $error) -> ChartpaxError {
                ChartpaxError::msg(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(string::FromUtf8Error);
impl_from_error!(num::ParseIntError);
impl_from_error!(net::AddrParseError);
impl_from_error!(rmp_serde::encode::Error);
impl_from_error!(rmp_serde::decode::Error);
impl_from_error!(serde_json::Error);
impl_from_error!(toml::ser::Error);
impl_from_error!(toml::de::Error);
impl_from_error!(ctrlc::Error);
impl_from_error!(tokio::time::error::Elapsed);
impl_from_error!(tokio::task::JoinError);

impl_from_error_generic!(tokio::sync::watch::error::SendError<T>);
impl_from_error_generic!(tokio::sync::mpsc::error::SendError<T>);

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = ChartpaxError("what the heck?".into());
        assert_eq!(format!("{}", e), String::from("what the heck?"));
    }

    #[test]
    fn from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "oh no!");
        let e = ChartpaxError::from(io_error);
        assert!(e.0.contains("oh no!"));
    }

    #[test]
    fn from_json_error() {
        let json_error =
            serde_json::from_str::<u64>("not a number").unwrap_err();
        let e = ChartpaxError::from(json_error);
        assert!(!e.0.is_empty());
    }
}
