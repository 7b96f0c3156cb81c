use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use events::UserRoleParseError;
use log::*;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: WebErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum WebErrorKind {
    /// The requested subscriber role or id is not usable as a subscription key.
    InvalidSubscriber,
}

impl Error {
    pub fn invalid_subscriber(message: &str) -> Self {
        Error {
            source: Some(message.to_string().into()),
            error_kind: WebErrorKind::InvalidSubscriber,
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self.error_kind {
            WebErrorKind::InvalidSubscriber => {
                let reason = self
                    .source
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "invalid subscriber".to_string());
                debug!("Rejecting WebSocket request: {reason}");
                (StatusCode::BAD_REQUEST, reason).into_response()
            }
        }
    }
}

impl From<UserRoleParseError> for Error {
    fn from(err: UserRoleParseError) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: WebErrorKind::InvalidSubscriber,
        }
    }
}
