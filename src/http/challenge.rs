//! `WWW-Authenticate` / `Authorization` header codec for SCRAM (RFC 7804).
//!
//! Wire shape, inbound and outbound:
//!
//! ```text
//! WWW-Authenticate: SCRAM-SHA-256 realm="ingest", sid=AAAABBBB, data=<base64>
//! Authorization:    SCRAM-SHA-256 sid=AAAABBBB, data=<base64>
//! ```
//!
//! The `data` parameter carries a base64-encoded RFC 5802 message. SCRAM
//! parameters are comma-separated, and so are repeated header instances once
//! a transport merges them - the two cannot be told apart afterwards, so a
//! 401 carrying more than one `WWW-Authenticate` instance is rejected as
//! malformed instead of guessed at.

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use http::HeaderMap;
use http::header::{HeaderValue, WWW_AUTHENTICATE};

use crate::error::{Result, ScramHttpError};
use crate::mechanism::Mechanism;

/// One decoded challenge from a 401 response.
#[derive(Debug, Clone)]
pub struct Challenge {
    /// Auth-scheme token as the server sent it, e.g. `SCRAM-SHA-256`.
    pub mechanism: String,
    /// Server-assigned session identifier.
    pub sid: Option<String>,
    /// Base64-decoded SCRAM payload; absent on a bare mechanism advertisement.
    pub data: Option<String>,
    /// Protection-space label, if the server names one.
    pub realm: Option<String>,
}

/// Extracts the single SCRAM challenge from a 401 response's headers.
pub fn parse_challenge(headers: &HeaderMap) -> Result<Challenge> {
    let mut values = headers.get_all(WWW_AUTHENTICATE).iter();
    let value = values.next().ok_or_else(|| {
        ScramHttpError::MalformedChallenge("401 response without WWW-Authenticate".into())
    })?;
    if values.next().is_some() {
        return Err(ScramHttpError::MalformedChallenge(
            "multiple WWW-Authenticate headers".into(),
        ));
    }

    let value = value.to_str().map_err(|_| {
        ScramHttpError::MalformedChallenge("WWW-Authenticate is not valid ASCII".into())
    })?;

    let (mechanism, params) = match value.trim().split_once(' ') {
        Some((mechanism, params)) => (mechanism.trim(), params),
        None => (value.trim(), ""),
    };
    if mechanism.is_empty() {
        return Err(ScramHttpError::MalformedChallenge(
            "challenge without auth scheme".into(),
        ));
    }

    let mut sid = None;
    let mut data = None;
    let mut realm = None;

    for pair in params.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key, raw)) = pair.split_once('=') else {
            // token68 tails of foreign schemes end up here; they carry
            // nothing SCRAM cares about
            continue;
        };
        let raw = raw.trim().trim_matches('"');
        match key.trim() {
            "sid" => sid = Some(raw.to_string()),
            "realm" => realm = Some(raw.to_string()),
            "data" => {
                let decoded = B64.decode(raw.as_bytes()).map_err(|e| {
                    ScramHttpError::MalformedChallenge(format!("invalid challenge base64: {e}"))
                })?;
                data = Some(String::from_utf8(decoded).map_err(|_| {
                    ScramHttpError::MalformedChallenge("challenge data is not UTF-8".into())
                })?);
            }
            _ => {}
        }
    }

    Ok(Challenge {
        mechanism: mechanism.to_string(),
        sid,
        data,
        realm,
    })
}

/// Formats `Authorization: <mechanism> [sid=<token>, ]data=<base64>`.
///
/// `sid` is omitted only before the first challenge assigns one.
pub fn build_authorization(
    mechanism: Mechanism,
    sid: Option<&str>,
    message: &str,
) -> Result<HeaderValue> {
    let data = B64.encode(message.as_bytes());
    let value = match sid {
        Some(sid) => format!("{mechanism} sid={sid}, data={data}"),
        None => format!("{mechanism} data={data}"),
    };
    HeaderValue::from_str(&value).map_err(|e| {
        ScramHttpError::MalformedChallenge(format!("unusable authorization header value: {e}"))
    })
}
