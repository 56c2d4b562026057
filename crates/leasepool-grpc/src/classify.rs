//! Advisory classification of RPC failures.
//!
//! Given an error surfaced from a connection operation, decides whether it
//! represents a connection-level failure (reconnect/retry is worth
//! attempting) or an application-level failure specific to the request.
//! Purely advisory to callers; the pool never consults it.
//!
//! The decision table: a [`Status`] carrying `Cancelled` or `Unavailable`
//! is a connection failure: those are the signatures of a server shutting
//! down gracefully or a channel already torn down. Any other status code is
//! an application failure. Everything that is not a status at all (dial
//! failures, closed transports, end-of-stream on a reused connection,
//! cancellation) is a connection failure.

use thiserror::Error;
use tonic::{Code, Status};

use leasepool::BoxError;

/// Whether a failure condemns the connection or only the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The connection itself is suspect; reconnecting is appropriate.
    Connection,

    /// The request failed; the connection is fine.
    Application,
}

/// An application-level RPC failure, preserving the status text and code.
#[derive(Debug, Error)]
#[error("error on rpc request {message} ({code:?})")]
pub struct RpcError {
    code: Code,
    message: String,
}

impl RpcError {
    /// The status code of the failed request.
    #[must_use]
    pub fn code(&self) -> Code {
        self.code
    }

    /// The status message of the failed request.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A classified failure: connection failures pass the original error
/// through verbatim, application failures are wrapped as [`RpcError`].
#[derive(Debug)]
pub enum Classified {
    /// Connection-level failure, original error untouched.
    Connection(BoxError),

    /// Application-level failure with the original status text and code.
    Application(RpcError),
}

impl Classified {
    /// The class of this failure.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Connection(_) => ErrorClass::Connection,
            Self::Application(_) => ErrorClass::Application,
        }
    }
}

/// Classify a failure without consuming it.
#[must_use]
pub fn classify(err: &(dyn std::error::Error + 'static)) -> ErrorClass {
    match find_status(err) {
        Some(status) if !is_connection_code(status.code()) => ErrorClass::Application,
        _ => ErrorClass::Connection,
    }
}

/// Shorthand for `classify(err) == ErrorClass::Connection`.
#[must_use]
pub fn is_connection_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    classify(err) == ErrorClass::Connection
}

/// Classify a failure, wrapping application errors descriptively.
#[must_use]
pub fn decode(err: BoxError) -> Classified {
    match find_status(&*err) {
        Some(status) if !is_connection_code(status.code()) => Classified::Application(RpcError {
            code: status.code(),
            message: status.message().to_owned(),
        }),
        _ => Classified::Connection(err),
    }
}

/// Extract the status code from a failure, if it carries one.
#[must_use]
pub fn status_code(err: &(dyn std::error::Error + 'static)) -> Option<Code> {
    find_status(err).map(Status::code)
}

const fn is_connection_code(code: Code) -> bool {
    matches!(code, Code::Cancelled | Code::Unavailable)
}

/// Find a `Status` in the error or anywhere down its source chain.
fn find_status<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a Status> {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(status) = err.downcast_ref::<Status>() {
            return Some(status);
        }
        current = err.source();
    }
    None
}
