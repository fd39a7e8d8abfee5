//! SCRAM exchange engine.
//!
//! This module implements the client side of the four-message SCRAM handshake
//! (RFC 5802): client-first, server-first, client-final, server-final. The
//! engine is a pure state machine over accumulated exchange material - it
//! performs no I/O and knows nothing about HTTP. Base64 framing for the wire
//! is the HTTP adapter's job; everything here is RFC 5802 text.
//!
//! # Stage machine
//!
//! ```text
//! Initial --client_first()--> AwaitingFirstChallenge
//!         --handle_server_first()--> AwaitingFinalChallenge
//!         --handle_server_final()--> Complete
//! ```
//!
//! Stages only advance. A protocol or verification error moves the engine to
//! `Failed`, which is terminal. Calling an operation in the wrong stage
//! returns [`ScramHttpError::Exchange`] without changing the stage.
//!
//! # Example
//!
//! ```ignore
//! let mut exchange = ScramExchange::new(Mechanism::ScramSha256, "user", "pencil");
//!
//! let client_first = exchange.client_first()?;
//! // ... send, receive server-first ...
//! exchange.handle_server_first(&server_first)?;
//! let client_final = exchange.client_final()?;
//! // ... send, receive server-final ...
//! exchange.handle_server_final(&server_final)?;
//! assert_eq!(exchange.stage(), ExchangeStage::Complete);
//! ```

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use rand::RngCore;

use crate::error::{Result, ScramHttpError};
use crate::mechanism::{Mechanism, constant_time_eq};

/// Client nonce entropy before base64 encoding.
const NONCE_LEN: usize = 18;

/// Position in the four-message exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStage {
    /// Nothing sent yet.
    Initial,
    /// Client-first produced; waiting for the server's first challenge.
    AwaitingFirstChallenge,
    /// Server-first consumed; waiting for the server's final message.
    AwaitingFinalChallenge,
    /// Server signature verified.
    Complete,
    /// Protocol or verification failure. Terminal.
    Failed,
}

/// Client-side SCRAM exchange state.
///
/// One instance per authentication flow. Credentials are captured at
/// construction; messages are produced and consumed strictly in protocol
/// order.
#[derive(Debug, Clone)]
pub struct ScramExchange {
    mechanism: Mechanism,
    password: String,
    stage: ExchangeStage,
    client_nonce: String,
    client_first_bare: String,
    client_first: String,
    client_final: Option<String>,
    server_signature: Option<Vec<u8>>,
}

impl ScramExchange {
    /// Creates an exchange for the negotiated mechanism with a random nonce.
    pub fn new(mechanism: Mechanism, username: &str, password: &str) -> ScramExchange {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);
        Self::with_nonce_b64(mechanism, username, password, &B64.encode(nonce))
    }

    /// Creates an exchange with a caller-supplied nonce (for tests).
    #[cfg(test)]
    pub(crate) fn with_nonce(
        mechanism: Mechanism,
        username: &str,
        password: &str,
        nonce: &str,
    ) -> ScramExchange {
        Self::with_nonce_b64(mechanism, username, password, nonce)
    }

    fn with_nonce_b64(
        mechanism: Mechanism,
        username: &str,
        password: &str,
        nonce: &str,
    ) -> ScramExchange {
        let user = sasl_escape_username(username);
        let client_first_bare = format!("n={user},r={nonce}");
        // Channel binding is not supported: gs2 header is always "n,,".
        let client_first = format!("n,,{client_first_bare}");

        ScramExchange {
            mechanism,
            password: password.to_string(),
            stage: ExchangeStage::Initial,
            client_nonce: nonce.to_string(),
            client_first_bare,
            client_first,
            client_final: None,
            server_signature: None,
        }
    }

    pub fn mechanism(&self) -> Mechanism {
        self.mechanism
    }

    pub fn stage(&self) -> ExchangeStage {
        self.stage
    }

    /// The message backing the `Authorization` header at the current stage,
    /// if one has been produced.
    pub fn current_message(&self) -> Option<&str> {
        match self.stage {
            ExchangeStage::AwaitingFirstChallenge => Some(self.client_first.as_str()),
            ExchangeStage::AwaitingFinalChallenge | ExchangeStage::Complete => {
                self.client_final.as_deref()
            }
            ExchangeStage::Initial | ExchangeStage::Failed => None,
        }
    }

    /// Produces the client-first message and advances the stage.
    ///
    /// Valid only at [`ExchangeStage::Initial`].
    pub fn client_first(&mut self) -> Result<String> {
        if self.stage != ExchangeStage::Initial {
            return Err(ScramHttpError::Exchange(format!(
                "client-first requested at stage {:?}",
                self.stage
            )));
        }
        self.stage = ExchangeStage::AwaitingFirstChallenge;
        Ok(self.client_first.clone())
    }

    /// Consumes the server-first message: checks the combined nonce, derives
    /// the proof and the expected server signature, and advances the stage.
    ///
    /// # Errors
    ///
    /// [`ScramHttpError::MalformedChallenge`] if a field is missing, the salt
    /// base64 is invalid, or the combined nonce does not extend the client
    /// nonce (possible MITM). Any failure moves the engine to `Failed`.
    pub fn handle_server_first(&mut self, server_first: &str) -> Result<()> {
        if self.stage != ExchangeStage::AwaitingFirstChallenge {
            return Err(ScramHttpError::Exchange(format!(
                "server-first received at stage {:?}",
                self.stage
            )));
        }
        match self.apply_server_first(server_first) {
            Ok(()) => {
                self.stage = ExchangeStage::AwaitingFinalChallenge;
                Ok(())
            }
            Err(e) => {
                self.stage = ExchangeStage::Failed;
                Err(e)
            }
        }
    }

    fn apply_server_first(&mut self, server_first: &str) -> Result<()> {
        let (combined_nonce, salt, iterations) = parse_server_first(server_first)?;

        // Security check: the combined nonce must start with our nonce
        if !combined_nonce.starts_with(&self.client_nonce) {
            return Err(ScramHttpError::MalformedChallenge(
                "combined nonce does not extend the client nonce".into(),
            ));
        }

        let client_final_without_proof = format!("c=biws,r={combined_nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_without_proof
        );

        let keys = self
            .mechanism
            .derive_keys(&self.password, &salt, iterations, &auth_message);

        self.client_final = Some(format!(
            "{client_final_without_proof},p={}",
            B64.encode(&keys.proof)
        ));
        self.server_signature = Some(keys.server_signature);
        Ok(())
    }

    /// Returns the client-final message computed by
    /// [`handle_server_first`](Self::handle_server_first).
    pub fn client_final(&self) -> Result<String> {
        match (&self.stage, &self.client_final) {
            (ExchangeStage::AwaitingFinalChallenge, Some(message)) => Ok(message.clone()),
            _ => Err(ScramHttpError::Exchange(format!(
                "client-final requested at stage {:?}",
                self.stage
            ))),
        }
    }

    /// Verifies the server-final message against the locally computed server
    /// signature and advances the stage to `Complete`.
    ///
    /// This is the mutual-authentication step: it proves the server knows the
    /// password too.
    ///
    /// # Errors
    ///
    /// [`ScramHttpError::AuthenticationFailed`] on a signature mismatch or a
    /// server-reported `e=` error; [`ScramHttpError::MalformedChallenge`] when
    /// the message carries neither `v=` nor `e=`. Any failure moves the
    /// engine to `Failed`.
    pub fn handle_server_final(&mut self, server_final: &str) -> Result<()> {
        if self.stage != ExchangeStage::AwaitingFinalChallenge {
            return Err(ScramHttpError::Exchange(format!(
                "server-final received at stage {:?}",
                self.stage
            )));
        }
        match self.verify_server_final(server_final) {
            Ok(()) => {
                self.stage = ExchangeStage::Complete;
                Ok(())
            }
            Err(e) => {
                self.stage = ExchangeStage::Failed;
                Err(e)
            }
        }
    }

    fn verify_server_final(&self, server_final: &str) -> Result<()> {
        // Server-reported failure takes precedence
        if let Some(err) = server_final.split(',').find_map(|p| p.strip_prefix("e=")) {
            return Err(ScramHttpError::AuthenticationFailed(format!(
                "server reported: {err}"
            )));
        }

        let verifier = server_final
            .split(',')
            .find_map(|p| p.strip_prefix("v="))
            .ok_or_else(|| {
                ScramHttpError::MalformedChallenge("server-final missing signature (v=)".into())
            })?;

        let signature = B64.decode(verifier.trim().as_bytes()).map_err(|e| {
            ScramHttpError::MalformedChallenge(format!("invalid server signature base64: {e}"))
        })?;

        let expected = self.server_signature.as_ref().ok_or_else(|| {
            ScramHttpError::Exchange("server signature not yet derived".into())
        })?;

        if !constant_time_eq(&signature, expected) {
            return Err(ScramHttpError::AuthenticationFailed(
                "server signature mismatch: server may not know the password".into(),
            ));
        }

        Ok(())
    }
}

/// Parses a server-first message into (combined nonce, salt, iterations).
///
/// Unknown extension fields are ignored.
fn parse_server_first(server_first: &str) -> Result<(String, Vec<u8>, u32)> {
    let mut nonce = None;
    let mut salt = None;
    let mut iterations = None;

    for part in server_first.split(',') {
        if let Some(v) = part.strip_prefix("r=") {
            nonce = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("s=") {
            salt = Some(B64.decode(v.as_bytes()).map_err(|e| {
                ScramHttpError::MalformedChallenge(format!("invalid salt base64: {e}"))
            })?);
        } else if let Some(v) = part.strip_prefix("i=") {
            // RFC 5802 requires a positive iteration count
            iterations = v.parse::<u32>().ok().filter(|i| *i > 0);
        }
    }

    Ok((
        nonce.ok_or_else(|| {
            ScramHttpError::MalformedChallenge("server-first missing nonce (r=)".into())
        })?,
        salt.ok_or_else(|| {
            ScramHttpError::MalformedChallenge("server-first missing salt (s=)".into())
        })?,
        iterations.ok_or_else(|| {
            ScramHttpError::MalformedChallenge(
                "server-first missing or invalid iteration count (i=)".into(),
            )
        })?,
    ))
}

/// SASL-escape a username per RFC 5802.
///
/// Escapes `=` as `=3D` and `,` as `=2C`.
fn sasl_escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange() -> ScramExchange {
        ScramExchange::with_nonce(
            Mechanism::ScramSha256,
            "user",
            "pencil",
            "fyko+d2lbbFgONRv9qkxdawL",
        )
    }

    /// Server-first answering `exchange()`, with the server extending the nonce.
    const SERVER_FIRST: &str =
        "r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096";

    /// Computes the server-final a correct server would send for `exchange()`.
    fn valid_server_final() -> String {
        let auth_message = format!(
            "n=user,r=fyko+d2lbbFgONRv9qkxdawL,{SERVER_FIRST},c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j"
        );
        let salt = B64.decode("QSXCR+Q6sek8bf92").unwrap();
        let keys = Mechanism::ScramSha256.derive_keys("pencil", &salt, 4096, &auth_message);
        format!("v={}", B64.encode(&keys.server_signature))
    }

    #[test]
    fn builds_client_first_message() {
        let mut ex = exchange();
        let msg = ex.client_first().unwrap();
        assert_eq!(msg, "n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL");
        assert_eq!(ex.stage(), ExchangeStage::AwaitingFirstChallenge);
        assert_eq!(ex.current_message(), Some(msg.as_str()));
    }

    #[test]
    fn escapes_special_chars_in_username() {
        let mut ex = ScramExchange::with_nonce(Mechanism::ScramSha256, "a=b,c", "pw", "xyz");
        let msg = ex.client_first().unwrap();
        assert_eq!(msg, "n,,n=a=3Db=2Cc,r=xyz");
    }

    #[test]
    fn random_nonces_are_unique() {
        let a = ScramExchange::new(Mechanism::ScramSha256, "user", "pw");
        let b = ScramExchange::new(Mechanism::ScramSha256, "user", "pw");
        assert_ne!(a.client_nonce, b.client_nonce);
    }

    #[test]
    fn client_first_rejected_after_initial_stage() {
        let mut ex = exchange();
        ex.client_first().unwrap();
        let err = ex.client_first().unwrap_err();
        assert!(matches!(err, ScramHttpError::Exchange(_)));
        // Sequencing misuse does not poison the exchange
        assert_eq!(ex.stage(), ExchangeStage::AwaitingFirstChallenge);
    }

    #[test]
    fn parse_server_first_any_field_order() {
        let (r, s, i) = parse_server_first("i=1000,s=Zm9v,r=xyz").unwrap();
        assert_eq!(r, "xyz");
        assert_eq!(s, b"foo");
        assert_eq!(i, 1000);
    }

    #[test]
    fn parse_server_first_ignores_extensions() {
        let (r, _, i) = parse_server_first("r=nonce,s=c2FsdA==,i=4096,x=unknown").unwrap();
        assert_eq!(r, "nonce");
        assert_eq!(i, 4096);
    }

    #[test]
    fn parse_server_first_missing_fields() {
        for (input, needle) in [
            ("s=c2FsdA==,i=4096", "nonce"),
            ("r=abc,i=4096", "salt"),
            ("r=abc,s=c2FsdA==", "iteration"),
            ("r=abc,s=c2FsdA==,i=notanumber", "iteration"),
            ("r=abc,s=c2FsdA==,i=0", "iteration"),
        ] {
            let err = parse_server_first(input).unwrap_err();
            assert!(err.to_string().contains(needle), "{input}");
        }
    }

    #[test]
    fn rejects_nonce_that_does_not_extend_ours() {
        let mut ex = exchange();
        ex.client_first().unwrap();
        let err = ex
            .handle_server_first("r=somebodyelse,s=c2FsdA==,i=4096")
            .unwrap_err();
        assert!(matches!(err, ScramHttpError::MalformedChallenge(_)));
        assert_eq!(ex.stage(), ExchangeStage::Failed);
    }

    #[test]
    fn rejects_invalid_salt_base64() {
        let mut ex = exchange();
        ex.client_first().unwrap();
        let err = ex
            .handle_server_first("r=fyko+d2lbbFgONRv9qkxdawLext,s=!!!,i=4096")
            .unwrap_err();
        assert!(err.to_string().contains("base64"));
    }

    #[test]
    fn client_final_requires_server_first() {
        let mut ex = exchange();
        ex.client_first().unwrap();
        let err = ex.client_final().unwrap_err();
        assert!(matches!(err, ScramHttpError::Exchange(_)));
    }

    #[test]
    fn client_final_carries_proof_and_combined_nonce() {
        let mut ex = exchange();
        ex.client_first().unwrap();
        ex.handle_server_first(SERVER_FIRST).unwrap();

        let msg = ex.client_final().unwrap();
        assert!(msg.starts_with("c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,p="));
        assert_eq!(ex.stage(), ExchangeStage::AwaitingFinalChallenge);
    }

    #[test]
    fn accepts_valid_server_signature() {
        let mut ex = exchange();
        ex.client_first().unwrap();
        ex.handle_server_first(SERVER_FIRST).unwrap();
        ex.client_final().unwrap();

        ex.handle_server_final(&valid_server_final()).unwrap();
        assert_eq!(ex.stage(), ExchangeStage::Complete);
    }

    #[test]
    fn rejects_wrong_server_signature() {
        let mut ex = exchange();
        ex.client_first().unwrap();
        ex.handle_server_first(SERVER_FIRST).unwrap();

        let bogus = format!("v={}", B64.encode([0u8; 32]));
        let err = ex.handle_server_final(&bogus).unwrap_err();
        assert!(err.is_auth());
        assert_eq!(ex.stage(), ExchangeStage::Failed);
    }

    #[test]
    fn surfaces_server_error_field() {
        let mut ex = exchange();
        ex.client_first().unwrap();
        ex.handle_server_first(SERVER_FIRST).unwrap();

        let err = ex.handle_server_final("e=invalid-proof").unwrap_err();
        assert!(err.is_auth());
        assert!(err.to_string().contains("invalid-proof"));
    }

    #[test]
    fn rejects_server_final_without_verifier() {
        let mut ex = exchange();
        ex.client_first().unwrap();
        ex.handle_server_first(SERVER_FIRST).unwrap();

        let err = ex.handle_server_final("x=whatever").unwrap_err();
        assert!(matches!(err, ScramHttpError::MalformedChallenge(_)));
    }

    #[test]
    fn replay_through_fresh_engine_is_idempotent() {
        let run = || {
            let mut ex = exchange();
            ex.client_first().unwrap();
            ex.handle_server_first(SERVER_FIRST).unwrap();
            let client_final = ex.client_final().unwrap();
            let verdict = ex.handle_server_final(&valid_server_final());
            (client_final, verdict.is_ok())
        };

        let (final_a, ok_a) = run();
        let (final_b, ok_b) = run();
        assert_eq!(final_a, final_b);
        assert_eq!(ok_a, ok_b);
        assert!(ok_a);
    }

    #[test]
    fn failed_stage_is_terminal() {
        let mut ex = exchange();
        ex.client_first().unwrap();
        ex.handle_server_first("r=wrong,s=c2FsdA==,i=1").unwrap_err();

        assert!(ex.handle_server_first(SERVER_FIRST).is_err());
        assert!(ex.client_final().is_err());
        assert!(ex.handle_server_final("v=AAAA").is_err());
        assert_eq!(ex.stage(), ExchangeStage::Failed);
    }
}
