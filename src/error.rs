use std::io;

use chrono::NaiveDate;
use thiserror::Error;

/// type alias for all operations in this crate that could fail with a [`SwapError`]
pub type Result<T> = std::result::Result<T, SwapError>;

/// The Error variants used throughout the marketplace and its storage engines.
///
/// The first group is the taxonomy callers of the marketplace see. The second group wraps
/// lower level errors from the storage engines and third party crates.
#[derive(Debug, Error)]
pub enum SwapError {
    /// there is no caller identity attached to the operation
    #[error("authentication required")]
    Unauthenticated,

    /// the caller lacks the role or ownership the operation requires
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// the referenced listing (or user) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// the date range ends before it starts
    #[error("invalid date range: {from} to {to}")]
    InvalidRange {
        /// first day of the range
        from: NaiveDate,
        /// last day of the range
        to: NaiveDate,
    },

    /// the listing has already been purchased
    #[error("listing {0} has already been sold")]
    AlreadySold(String),

    /// the buyer owns the listing
    #[error("cannot purchase your own listing {0}")]
    SelfPurchase(String),

    /// malformed input fields, e.g. an unsupported lot
    #[error("invalid input: {0}")]
    Validation(String),

    /// the store could not be reached, or rejected the command
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// a compare-and-swap update kept losing to concurrent writers
    #[error("concurrent update conflict on {0}")]
    Conflict(String),

    /// a set command was issued against a string key, or vice versa
    #[error("WRONGTYPE operation against key {0} holding the wrong kind of value")]
    WrongType(String),

    /// invalid data found in a command log, or an unparsable argument
    #[error("parse error: {0}")]
    Parsing(String),

    /// file or socket IO failure inside a storage engine
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// serialization failure
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// failure reported by the sled engine
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
}

/// The distinguishable kinds of failure surfaced to the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// no caller identity
    Unauthenticated,
    /// missing role or ownership
    Forbidden,
    /// unknown listing or user
    NotFound,
    /// degenerate or malformed date range
    InvalidRange,
    /// listing already purchased
    AlreadySold,
    /// buyer owns the listing
    SelfPurchase,
    /// malformed input fields
    Validation,
    /// lost a race against a concurrent update
    Conflict,
    /// transport or backend failure
    StoreUnavailable,
    /// anything else
    Internal,
}

impl ErrorKind {
    /// the HTTP status code this kind maps to
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::Unauthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidRange | ErrorKind::Validation => 400,
            ErrorKind::AlreadySold | ErrorKind::SelfPurchase | ErrorKind::Conflict => 409,
            ErrorKind::StoreUnavailable => 503,
            ErrorKind::Internal => 500,
        }
    }
}

impl SwapError {
    /// classifies this error into the kind reported to callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            SwapError::Unauthenticated => ErrorKind::Unauthenticated,
            SwapError::Forbidden(_) => ErrorKind::Forbidden,
            SwapError::NotFound(_) => ErrorKind::NotFound,
            SwapError::InvalidRange { .. } => ErrorKind::InvalidRange,
            SwapError::AlreadySold(_) => ErrorKind::AlreadySold,
            SwapError::SelfPurchase(_) => ErrorKind::SelfPurchase,
            SwapError::Validation(_) | SwapError::Parsing(_) => ErrorKind::Validation,
            SwapError::Conflict(_) => ErrorKind::Conflict,
            SwapError::StoreUnavailable(_) | SwapError::Io(_) | SwapError::Sled(_) => {
                ErrorKind::StoreUnavailable
            }
            SwapError::WrongType(_) | SwapError::Serde(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_http_status() {
        assert_eq!(SwapError::Unauthenticated.kind().status(), 401);
        assert_eq!(SwapError::Forbidden("x".into()).kind().status(), 403);
        assert_eq!(SwapError::NotFound("x".into()).kind().status(), 404);
        assert_eq!(SwapError::AlreadySold("x".into()).kind().status(), 409);
        assert_eq!(SwapError::SelfPurchase("x".into()).kind().status(), 409);
        assert_eq!(SwapError::StoreUnavailable("down".into()).kind().status(), 503);

        let io = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(SwapError::from(io).kind(), ErrorKind::StoreUnavailable);
    }

    #[test]
    fn invalid_range_message_names_both_dates() {
        let err = SwapError::InvalidRange {
            from: NaiveDate::from_ymd_opt(2024, 11, 8).unwrap(),
            to: NaiveDate::from_ymd_opt(2024, 11, 4).unwrap(),
        };
        assert_eq!(err.to_string(), "invalid date range: 2024-11-08 to 2024-11-04");
    }
}
