//! Prepared request and response model shared with the transport collaborator.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};

use crate::error::{Result, ScramHttpError};

/// Stream body that can report and restore its read position.
pub trait SeekRead: Read + Seek + Send {}
impl<T: Read + Seek + Send> SeekRead for T {}

/// Outgoing request body, modeled by resend capability.
///
/// Whether a retry can replay the body is a property of the variant, not an
/// exception discovered at resend time.
pub enum RequestBody {
    /// No body.
    Empty,
    /// Fully buffered body; always resendable.
    Buffered(Bytes),
    /// Stream with seek/tell capability; rewindable to a saved position.
    Seekable(Box<dyn SeekRead>),
    /// One-shot stream; a retry cannot replay it.
    Stream(Box<dyn Read + Send>),
}

impl RequestBody {
    /// Current byte offset, known only for seekable streams.
    pub fn position(&mut self) -> Option<u64> {
        match self {
            RequestBody::Seekable(body) => body.stream_position().ok(),
            _ => None,
        }
    }

    /// Restores the body for retransmission.
    ///
    /// Buffered bodies need no work. A stream without a saved position cannot
    /// be replayed; failing here beats silently resending a half-consumed
    /// body.
    pub fn rewind(&mut self, saved: Option<u64>) -> Result<()> {
        match (self, saved) {
            (RequestBody::Empty | RequestBody::Buffered(_), _) => Ok(()),
            (RequestBody::Seekable(body), Some(pos)) => {
                body.seek(SeekFrom::Start(pos))?;
                Ok(())
            }
            (RequestBody::Seekable(_), None) | (RequestBody::Stream(_), _) => {
                Err(ScramHttpError::UnrewindableBody)
            }
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Buffered(b) => write!(f, "Buffered({} bytes)", b.len()),
            RequestBody::Seekable(_) => f.write_str("Seekable(..)"),
            RequestBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A prepared HTTP request the transport can send repeatedly.
#[derive(Debug)]
pub struct AuthRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl AuthRequest {
    pub fn new(method: Method, uri: Uri) -> AuthRequest {
        AuthRequest {
            method,
            uri,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn with_body(mut self, body: RequestBody) -> AuthRequest {
        self.body = body;
        self
    }
}

/// A received response plus the ordered chain of prior 401s in its flow.
#[derive(Debug, Clone)]
pub struct AuthResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Prior responses of the same flow, oldest first. Filled in by the
    /// adapter when a challenge round completes.
    pub history: Vec<AuthResponse>,
}

impl AuthResponse {
    pub fn new(status: StatusCode) -> AuthResponse {
        AuthResponse {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            history: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn buffered_body_has_no_position_and_always_rewinds() {
        let mut body = RequestBody::Buffered(Bytes::from_static(b"payload"));
        assert_eq!(body.position(), None);
        assert!(body.rewind(None).is_ok());
    }

    #[test]
    fn seekable_body_reports_and_restores_position() {
        let mut cursor = Cursor::new(b"xxxxpayload".to_vec());
        cursor.set_position(4);
        let mut body = RequestBody::Seekable(Box::new(cursor));

        assert_eq!(body.position(), Some(4));

        // Simulate the transport consuming the stream
        if let RequestBody::Seekable(s) = &mut body {
            let mut sink = Vec::new();
            s.read_to_end(&mut sink).unwrap();
            assert_eq!(sink, b"payload");
        }
        assert_eq!(body.position(), Some(11));

        body.rewind(Some(4)).unwrap();
        assert_eq!(body.position(), Some(4));
    }

    #[test]
    fn stream_body_cannot_rewind() {
        let reader = Cursor::new(b"oneshot".to_vec());
        let mut body = RequestBody::Stream(Box::new(reader));
        assert_eq!(body.position(), None);
        let err = body.rewind(None).unwrap_err();
        assert!(matches!(err, ScramHttpError::UnrewindableBody));
    }

    #[test]
    fn seekable_body_without_saved_position_cannot_rewind() {
        let mut body = RequestBody::Seekable(Box::new(Cursor::new(Vec::new())));
        let err = body.rewind(None).unwrap_err();
        assert!(matches!(err, ScramHttpError::UnrewindableBody));
    }
}
