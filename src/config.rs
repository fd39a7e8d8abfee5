use std::time::Duration;

use crate::mechanism::Mechanism;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,

    /// Client-supported mechanisms. The server's preference order decides
    /// which one is used; this list only limits what we accept.
    pub mechanisms: Vec<Mechanism>,

    /// Upper bound on the whole multi-round-trip flow, including retries.
    /// `None` leaves the flow unbounded.
    pub flow_timeout: Option<Duration>,
}

impl AuthConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            mechanisms: Mechanism::ALL.to_vec(),
            flow_timeout: None,
        }
    }
}
