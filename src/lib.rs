#![warn(
    clippy::all,
    clippy::cargo,
    clippy::perf,
    clippy::style,
    clippy::correctness,
    clippy::suspicious
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::multiple_crate_versions
)]

pub mod config;
pub mod error;
pub mod exchange;
pub mod http;
pub mod mechanism;

pub use config::AuthConfig;
pub use error::{Result, ScramHttpError};
pub use exchange::{ExchangeStage, ScramExchange};
pub use crate::http::{AuthRequest, AuthResponse, RequestBody, ScramHttpAuth, Transport};
pub use mechanism::Mechanism;
