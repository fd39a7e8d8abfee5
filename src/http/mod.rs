//! HTTP binding of the SCRAM exchange (RFC 7804).
//!
//! The pieces, from the wire inward:
//!
//! ```text
//!            +-------------------+
//! request -> |   ScramHttpAuth   | -> Transport (caller-supplied)
//!            |  (bounded retry   |      | send / drain
//!            |   challenge loop) | <- 401 + WWW-Authenticate
//!            +-------------------+
//!                     |
//!                     v
//!              ScramExchange (crate::exchange)
//! ```
//!
//! [`adapter`] drives the challenge loop, [`challenge`] encodes and decodes
//! the SCRAM headers, and [`request`] models the prepared request, its body's
//! resend capability, and the response chain.

pub mod adapter;
pub mod challenge;
pub mod request;

pub use adapter::{AuthSession, MAX_CHALLENGE_RETRIES, ScramHttpAuth, Transport};
pub use challenge::{Challenge, build_authorization, parse_challenge};
pub use request::{AuthRequest, AuthResponse, RequestBody, SeekRead};
