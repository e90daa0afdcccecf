//! Status/reason codes returned by every top-level entry point.
//!
//! Mirrors the `(status, reason)` pair the reference firmware passes to
//! `reply_reason()`: a coarse [`Status`] for the host-visible outcome, plus an
//! optional negative [`Reason`] pinning down which sub-step failed.

use core::fmt;

/// Coarse outcome of a host command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Success,
    /// No or garbled tag response during select/authenticate/read/write.
    ErfTrans,
    /// A write was deliberately aborted by the tear-off hook.
    ETearoff,
    /// Bad input from the caller.
    EInvArg,
    /// Generic soft failure not otherwise classified.
    ESoft,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Success => "SUCCESS",
            Status::ErfTrans => "ERFTRANS",
            Status::ETearoff => "ETEAROFF",
            Status::EInvArg => "EINVARG",
            Status::ESoft => "ESOFT",
        };
        f.write_str(s)
    }
}

/// Negative reason code distinguishing a sub-failure within a [`Status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reason {
    /// UID request timed out.
    UidTimeout = -2,
    /// Select reply missing or UID mismatch.
    SelectMismatch = -3,
    /// 82xx password-write: first ACK (write-page request) missing.
    Auth82xxFirstAck = -4,
    /// 82xx password-write: second ACK (password frame) missing.
    Auth82xxSecondAck = -5,
    /// PLAIN authentication requested against an `AUT=1` tag.
    PlainOnAuth = -6,
    /// Unrecognised authentication command.
    UnknownCmd = -7,
    /// Authenticate reply had the wrong bit length.
    AuthReplyLength = -8,
    /// Write-page first ACK missing or malformed.
    WriteFirstAck = -9,
    /// Write-page second ACK missing or malformed.
    WriteSecondAck = -10,
    /// A single page read failed; recorded per-page rather than aborting.
    PageReadFail = -11,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), *self as i32)
    }
}

impl Reason {
    fn message(&self) -> &'static str {
        match self {
            Reason::UidTimeout => "UID request timed out",
            Reason::SelectMismatch => "select reply missing or UID mismatch",
            Reason::Auth82xxFirstAck => "82xx write-page ACK missing",
            Reason::Auth82xxSecondAck => "82xx password ACK missing",
            Reason::PlainOnAuth => "PLAIN authentication against AUT=1 tag",
            Reason::UnknownCmd => "unknown authentication command",
            Reason::AuthReplyLength => "authenticate reply had wrong length",
            Reason::WriteFirstAck => "write first ACK missing",
            Reason::WriteSecondAck => "write second ACK missing",
            Reason::PageReadFail => "page read failed",
        }
    }
}

/// Error type returned by fallible top-level operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HitagError {
    pub status: Status,
    pub reason: Option<Reason>,
}

impl HitagError {
    pub fn new(status: Status, reason: Reason) -> Self {
        HitagError {
            status,
            reason: Some(reason),
        }
    }

    pub fn status_only(status: Status) -> Self {
        HitagError {
            status,
            reason: None,
        }
    }
}

impl fmt::Display for HitagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            Some(reason) => write!(f, "{}: {}", self.status, reason),
            None => write!(f, "{}", self.status),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HitagError {}

pub type HitagResult<T> = Result<T, HitagError>;
