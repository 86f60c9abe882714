//! Helper utilities, functions, and macros.

#[macro_use]
mod print;

#[macro_use]
mod config;

mod error;
mod safetcp;
mod digest;

pub use error::ChartpaxError;
pub use print::logger_init;
pub use digest::{password_digest, session_token};

pub(crate) use safetcp::{
    recv_frame, send_frame, tcp_bind_with_retry, tcp_connect_with_retry,
};
