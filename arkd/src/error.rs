//!
//! Error classification.
//!
//! anyhow carries errors end to end. Errors that are the caller's fault
//! get a [RequestError] tag so the transport can classify them without
//! unwinding the chain; everything untagged that reaches the round loop
//! becomes a round failure or, past the point of no return, fatal.
//!

use std::error::Error as StdError;
use std::fmt;


/// How a request error surfaces on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestErrorKind {
	/// The request data is malformed or violates a protocol rule.
	Invalid,
	/// A referenced entity does not exist.
	NotFound,
	/// The request referred to a round step that has already passed.
	Late,
}

/// Tag for errors that are reported to the RPC caller verbatim.
///
/// A tagged error never fails a round; the round loop replies with it
/// and carries on.
pub struct RequestError {
	kind: RequestErrorKind,
	/// Identifiers of the entities that could not be found.
	ids: Vec<String>,
	message: String,
}

impl RequestError {
	fn new(
		kind: RequestErrorKind,
		ids: Vec<String>,
		message: impl fmt::Display,
	) -> RequestError {
		RequestError {
			kind,
			ids,
			message: message.to_string(),
		}
	}

	pub fn invalid(message: impl fmt::Display) -> RequestError {
		Self::new(RequestErrorKind::Invalid, Vec::new(), message)
	}

	pub fn late(message: impl fmt::Display) -> RequestError {
		Self::new(RequestErrorKind::Late, Vec::new(), message)
	}

	pub fn not_found(
		ids: impl IntoIterator<Item = impl fmt::Display>,
		message: impl fmt::Display,
	) -> RequestError {
		let ids = ids.into_iter().map(|i| i.to_string()).collect();
		Self::new(RequestErrorKind::NotFound, ids, message)
	}

	pub fn kind(&self) -> RequestErrorKind {
		self.kind
	}

	pub fn identifiers(&self) -> &[String] {
		&self.ids
	}
}

impl fmt::Display for RequestError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self.kind {
			RequestErrorKind::Invalid => write!(f, "invalid request: {}", self.message),
			RequestErrorKind::NotFound => write!(f, "not found: {}", self.message),
			RequestErrorKind::Late => write!(f, "too late: {}", self.message),
		}
	}
}

impl fmt::Debug for RequestError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

impl StdError for RequestError {}

/// The request classification of an error, if it carries one.
///
/// Transports map this to their wire error codes; [None] means the error
/// is internal and must not leak details to the caller.
pub fn request_kind(e: &anyhow::Error) -> Option<RequestErrorKind> {
	e.downcast_ref::<RequestError>().map(|r| r.kind())
}

/// Classify the error of a fallible call as an invalid request.
pub trait RequestErrorExt<T> {
	fn invalid_request(self, message: impl fmt::Display) -> anyhow::Result<T>;
}

impl<T, E: Into<anyhow::Error>> RequestErrorExt<T> for Result<T, E> {
	fn invalid_request(self, message: impl fmt::Display) -> anyhow::Result<T> {
		self.map_err(|e| e.into().context(RequestError::invalid(message)))
	}
}

/// Return an error tagged [RequestErrorKind::Invalid].
macro_rules! invalid_request {
	($($arg:tt)*) => {
		Err($crate::anyhow::Error::new($crate::error::RequestError::invalid(format!($($arg)*))))
	};
}
pub(crate) use invalid_request;

/// Return an error tagged [RequestErrorKind::NotFound].
macro_rules! not_found {
	($ids:expr, $($arg:tt)*) => {
		Err($crate::anyhow::Error::new(
			$crate::error::RequestError::not_found($ids, format!($($arg)*)),
		))
	};
}
pub(crate) use not_found;
