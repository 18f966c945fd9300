use crate::http::classify::TimeoutDetails;
use crate::response::Response;
use reqwest::StatusCode;
use snafu::{IntoError, Location, Snafu};

/// Error surface of the request pipeline.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HttpError {
    #[snafu(display("transport error"))]
    Transport {
        source: reqwest::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("i/o error during request execution"))]
    Io {
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to buffer request body"))]
    BodyRead {
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("invalid request URL: {url}"))]
    InvalidUrl {
        url: String,
        source: url::ParseError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("invalid value for header {name}"))]
    InvalidHeader {
        name: String,
        source: reqwest::header::InvalidHeaderValue,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("{details}"))]
    Timeout {
        details: Box<TimeoutDetails>,
        #[snafu(implicit)]
        location: Location,
    },

    /// The breaker is open. `last` replays an independent clone of the last
    /// failure observed before it opened, when one was captured.
    #[snafu(display("circuit breaker is open"))]
    CircuitOpen {
        last: Option<Box<Response>>,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("max attempts ({attempts}) exhausted; last status {last_status:?}"))]
    MaxAttempts {
        attempts: u32,
        last_status: Option<StatusCode>,
        #[snafu(source(from(HttpError, Box::new)))]
        source: Box<HttpError>,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("HTTP status error: {status}"))]
    HttpStatus {
        status: StatusCode,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("request cancelled"))]
    Cancelled {
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("response body exceeds the configured cap of {limit} bytes"))]
    BodyLimit {
        limit: u64,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to decode response body"))]
    Decode {
        source: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to encode request body"))]
    Encode {
        source: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

impl HttpError {
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        IoSnafu.into_error(err)
    }

    /// True when the pipeline was short-circuited by an open breaker.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, HttpError::CircuitOpen { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpError::Timeout { .. })
    }

    /// The enriched timeout diagnostics, when this is a timeout.
    pub fn timeout_details(&self) -> Option<&TimeoutDetails> {
        match self {
            HttpError::Timeout { details, .. } => Some(details),
            _ => None,
        }
    }

    /// `(attempt, max_attempts)` for errors that carry exhaustion state.
    pub fn attempts(&self) -> Option<(u32, u32)> {
        match self {
            HttpError::MaxAttempts { attempts, .. } => Some((*attempts, *attempts)),
            HttpError::Timeout { details, .. } => Some((details.attempt, details.max_attempts)),
            _ => None,
        }
    }

    /// The replayed last-failure response of an open breaker, if captured.
    pub fn replayed_response(&mut self) -> Option<Response> {
        match self {
            HttpError::CircuitOpen { last, .. } => last.take().map(|b| *b),
            _ => None,
        }
    }
}
