use std::fmt;

use thiserror::Error;

/// The raw request/response pair of the most recent HTTP round trip.
///
/// Kept by the client for diagnostics and embedded into [`Error::Protocol`]
/// so that an unexpected server response is self-describing.
#[derive(Debug, Clone, Default)]
pub struct RawExchange {
    pub method: String,
    pub url: String,
    pub request_headers: String,
    pub request_body: String,
    pub status: Option<u16>,
    pub response_headers: String,
    pub response_body: String,
}

impl fmt::Display for RawExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "last request:")?;
        writeln!(f, "{} {}", self.method, self.url)?;
        writeln!(f, "{}", self.request_headers)?;
        if !self.request_body.is_empty() {
            writeln!(f, "{}", self.request_body)?;
        }
        writeln!(f, "last response:")?;
        match self.status {
            Some(status) => writeln!(f, "HTTP {status}")?,
            None => writeln!(f, "(no response received)")?,
        }
        writeln!(f, "{}", self.response_headers)?;
        if !self.response_body.is_empty() {
            writeln!(f, "{}", self.response_body)?;
        }
        Ok(())
    }
}

/// Failure inside the HTTP transport, before any CalDAV interpretation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("http error: {0}")]
    Http(#[from] hyper_util::client::legacy::Error),
    #[error("body error: {0}")]
    Body(#[from] hyper::Error),
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] hyper::http::Error),
}

/// Errors surfaced by the CalDAV client and session.
///
/// The recoverable cases callers typically branch on (authentication, stale
/// etag, not-found) have their own variants; everything unanticipated lands
/// in [`Error::Protocol`], which carries the full raw exchange.
#[derive(Debug, Error)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(#[from] TransportError),

    #[error("authentication failed (HTTP 401)")]
    Authentication,

    #[error("server does not advertise calendar-access; not a CalDAV server")]
    NotCalDav,

    #[error("stale entity tag for {href}; the resource changed on the server")]
    StalePrecondition { href: String },

    #[error("resource not found: {href}")]
    NotFound { href: String },

    #[error("resource already exists: {href}")]
    AlreadyExists { href: String },

    #[error("no calendar selected; call find_calendars() and select_calendar() first")]
    NoCalendarSelected,

    #[error("no UID line found in the supplied iCalendar data")]
    MissingUid,

    #[error("invalid timestamp {value:?}; expected yyyymmddThhmmssZ in GMT")]
    InvalidTimestamp { value: String },

    #[error("invalid entity tag {etag:?}")]
    InvalidEtag { etag: String },

    #[error("property update rejected with status {status:?}")]
    PropertyUpdateRejected { status: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("unexpected server response (HTTP {status})\n{exchange}")]
    Protocol {
        status: u16,
        exchange: Box<RawExchange>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
