//! Flow driver binding the SCRAM exchange engine to the HTTP
//! request/response cycle.
//!
//! One call to [`ScramHttpAuth::execute`] runs one logical request flow: send
//! the prepared request, and for every 401 challenge advance the exchange,
//! recompute the `Authorization` header, and resend over the same transport -
//! up to a fixed ceiling of challenges. The retry sequence is an explicit
//! bounded loop; each step depends on the previous response, so there is
//! nothing to parallelize.
//!
//! Responsibilities per challenge round, in order: ceiling guard, body
//! rewind, challenge decode, engine advance, header rewrite, drain of the 401
//! (releases its pooled connection), cookie propagation, resend, history
//! chaining.

use http::StatusCode;
use http::header::{AUTHORIZATION, COOKIE, HeaderValue, SET_COOKIE};
use tokio::time::Instant;

use crate::config::AuthConfig;
use crate::error::{Result, ScramHttpError};
use crate::exchange::{ExchangeStage, ScramExchange};
use crate::http::challenge::{Challenge, build_authorization, parse_challenge};
use crate::http::request::{AuthRequest, AuthResponse};
use crate::mechanism::Mechanism;

/// Maximum number of data-carrying 401 challenges handled before the flow
/// gives up and hands the last 401 back to the caller.
///
/// A bare mechanism advertisement (a 401 with no `data` parameter) does not
/// consume a retry: a cold flow spends one round learning the mechanism
/// before any exchange data moves, and counting that round would make the
/// server-final leg of a full exchange unreachable. At most one advertisement
/// is answered per flow (a second one arrives mid-exchange and is rejected as
/// a challenge without data), so the loop stays bounded at four dispatches.
pub const MAX_CHALLENGE_RETRIES: u32 = 2;

/// Transport collaborator contract.
///
/// The adapter never opens connections itself; it sends prepared requests
/// through one transport instance per flow, which is expected to keep the
/// connection context stable across resends.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Sends (or resends) the prepared request.
    async fn send(&mut self, request: &mut AuthRequest) -> Result<AuthResponse>;

    /// Consumes the response body and releases the underlying connection.
    ///
    /// Called on every intermediate 401 before its retry is issued; skipping
    /// it would leak a pooled connection per challenge round.
    async fn drain(&mut self, response: &mut AuthResponse) -> Result<()>;
}

/// Client-side SCRAM authenticator for HTTP requests.
///
/// Holds only configuration; every [`execute`](Self::execute) call owns a
/// fresh [`AuthSession`], so one authenticator can serve many sequential
/// flows. Concurrent flows need separate requests but may share the
/// authenticator.
#[derive(Debug, Clone)]
pub struct ScramHttpAuth {
    config: AuthConfig,
}

impl ScramHttpAuth {
    pub fn new(config: AuthConfig) -> ScramHttpAuth {
        ScramHttpAuth { config }
    }

    /// Runs one authenticated request flow to completion.
    ///
    /// Returns the final response: a non-401 on success, or the last 401 when
    /// the server keeps rejecting past the retry ceiling (the caller reads
    /// the status code). Protocol failures - failed negotiation, malformed
    /// challenges, failed mutual verification, an unrewindable body - abort
    /// the flow with an error instead of falling back to an unauthenticated
    /// request.
    pub async fn execute<T: Transport>(
        &self,
        transport: &mut T,
        request: &mut AuthRequest,
    ) -> Result<AuthResponse> {
        let deadline = self.config.flow_timeout.map(|t| Instant::now() + t);
        let mut session = AuthSession::new();

        session.prepare(request)?;
        let mut response = send_bounded(transport, request, deadline).await?;

        loop {
            if response.status != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            if session.stage() == ExchangeStage::Complete {
                // Re-challenge after a verified server-final is a hard rejection.
                tracing::warn!("server re-challenged after verified exchange, returning 401");
                return Ok(response);
            }
            if session.retries >= MAX_CHALLENGE_RETRIES {
                tracing::warn!(
                    retries = session.retries,
                    "challenge ceiling reached, returning last 401"
                );
                return Ok(response);
            }

            request.body.rewind(session.saved_body_pos)?;

            let challenge = parse_challenge(&response.headers)?;
            tracing::debug!(
                mechanism = %challenge.mechanism,
                round = session.retries + 1,
                sid = challenge.sid.as_deref().unwrap_or("-"),
                "handling SCRAM challenge"
            );

            if let Some(header) = session.answer(&challenge, &self.config)? {
                request.headers.insert(AUTHORIZATION, header);
            }
            if challenge.data.is_some() {
                session.retries += 1;
            }

            transport.drain(&mut response).await?;

            // Some servers bind SCRAM session state to a cookie as well as
            // sid; every Set-Cookie instance is carried over
            let mut cookie = String::new();
            for value in response.headers.get_all(SET_COOKIE) {
                if let Ok(value) = value.to_str() {
                    if !cookie.is_empty() {
                        cookie.push_str("; ");
                    }
                    cookie.push_str(value);
                }
            }
            if !cookie.is_empty()
                && let Ok(value) = HeaderValue::from_str(&cookie)
            {
                request.headers.insert(COOKIE, value);
            }

            let mut next = send_bounded(transport, request, deadline).await?;

            let mut chain = std::mem::take(&mut response.history);
            chain.push(response);
            next.history = chain;
            response = next;
        }
    }
}

async fn send_bounded<T: Transport>(
    transport: &mut T,
    request: &mut AuthRequest,
    deadline: Option<Instant>,
) -> Result<AuthResponse> {
    match deadline {
        Some(deadline) => {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(ScramHttpError::Deadline)?;
            match tokio::time::timeout(remaining, transport.send(request)).await {
                Ok(result) => result,
                Err(_) => Err(ScramHttpError::Deadline),
            }
        }
        None => transport.send(request).await,
    }
}

/// Per-flow authentication state: exchange engine, session identifier, saved
/// body position and challenge count.
///
/// One session per logical request flow. Body-position tracking is
/// instance-global, so sharing a session between two in-flight requests is
/// undefined; construct a fresh one per credential usage.
#[derive(Debug)]
pub struct AuthSession {
    exchange: Option<ScramExchange>,
    sid: Option<String>,
    saved_body_pos: Option<u64>,
    retries: u32,
}

impl AuthSession {
    pub fn new() -> AuthSession {
        AuthSession {
            exchange: None,
            sid: None,
            saved_body_pos: None,
            retries: 0,
        }
    }

    /// Pre-send hook: attaches the header for the engine's current stage when
    /// the flow already holds a session identifier, and records the body
    /// position for later rewinds.
    pub fn prepare(&mut self, request: &mut AuthRequest) -> Result<()> {
        if self.sid.is_some()
            && let Some(exchange) = &self.exchange
            && let Some(message) = exchange.current_message()
        {
            let header = build_authorization(exchange.mechanism(), self.sid.as_deref(), message)?;
            request.headers.insert(AUTHORIZATION, header);
        }
        self.saved_body_pos = request.body.position();
        Ok(())
    }

    fn stage(&self) -> ExchangeStage {
        self.exchange
            .as_ref()
            .map_or(ExchangeStage::Initial, ScramExchange::stage)
    }

    /// Advances the engine with one decoded challenge.
    ///
    /// Returns the new `Authorization` header, or `None` when the standing
    /// header is resent unchanged (resend demanded after a verified
    /// server-final).
    fn answer(&mut self, challenge: &Challenge, config: &AuthConfig) -> Result<Option<HeaderValue>> {
        if self.exchange.is_none() {
            let mechanism = Mechanism::select(
                &config.mechanisms,
                std::slice::from_ref(&challenge.mechanism),
            )?;
            self.exchange = Some(ScramExchange::new(
                mechanism,
                &config.username,
                &config.password,
            ));
        }
        let Some(exchange) = self.exchange.as_mut() else {
            return Err(ScramHttpError::Exchange("exchange state missing".into()));
        };

        if !exchange
            .mechanism()
            .as_str()
            .eq_ignore_ascii_case(&challenge.mechanism)
        {
            return Err(ScramHttpError::MalformedChallenge(format!(
                "server switched mechanism to {} mid-flow",
                challenge.mechanism
            )));
        }

        // sid is assigned by the first challenge that carries one and is
        // immutable afterwards
        if self.sid.is_none()
            && let Some(sid) = &challenge.sid
        {
            self.sid = Some(sid.clone());
        }

        let message = match exchange.stage() {
            ExchangeStage::Initial => {
                let client_first = exchange.client_first()?;
                match challenge.data.as_deref() {
                    // Some servers fold server-first into the initial challenge
                    Some(data) => {
                        exchange.handle_server_first(data)?;
                        exchange.client_final()?
                    }
                    None => client_first,
                }
            }
            ExchangeStage::AwaitingFirstChallenge => {
                let data = challenge.data.as_deref().ok_or_else(|| {
                    ScramHttpError::MalformedChallenge("challenge carries no data field".into())
                })?;
                exchange.handle_server_first(data)?;
                exchange.client_final()?
            }
            ExchangeStage::AwaitingFinalChallenge => {
                let data = challenge.data.as_deref().ok_or_else(|| {
                    ScramHttpError::MalformedChallenge("challenge carries no data field".into())
                })?;
                exchange.handle_server_final(data)?;
                // Verified; the standing client-final header is still correct.
                return Ok(None);
            }
            stage @ (ExchangeStage::Complete | ExchangeStage::Failed) => {
                return Err(ScramHttpError::Exchange(format!(
                    "challenge received in terminal stage {stage:?}"
                )));
            }
        };

        build_authorization(exchange.mechanism(), self.sid.as_deref(), &message).map(Some)
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}
