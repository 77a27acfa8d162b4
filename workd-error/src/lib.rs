// Copyright 2026 The Vimana Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error type shared by every workd crate.
//!
//! An [`Error`] is a gRPC status code plus a stack of messages. Each layer
//! the error passes through pushes a tip with [`ResultExt::err_tip`], so the
//! message a Kubelet or data-plane client finally sees reads from the root
//! cause outwards.

pub use tonic::Code;

#[macro_export]
macro_rules! make_err {
    ($code:expr, $($arg:tt)+) => {{
        $crate::Error::new(
            $code,
            format!("{}", format_args!($($arg)+)),
        )
    }};
}

#[macro_export]
macro_rules! make_input_err {
    ($($arg:tt)+) => {{
        $crate::make_err!($crate::Code::InvalidArgument, $($arg)+)
    }};
}

#[macro_export]
macro_rules! error_if {
    ($cond:expr, $($arg:tt)+) => {{
        if $cond {
            Err($crate::make_err!($crate::Code::InvalidArgument, $($arg)+))?;
        }
    }};
}

/// Separator pushed between the message stacks of two merged errors.
const MERGE_SEPARATOR: &str = "---";

#[derive(Debug, Eq, PartialEq, Clone)]
pub struct Error {
    pub code: Code,
    pub messages: Vec<String>,
}

impl Error {
    pub fn new(code: Code, msg: String) -> Self {
        Self {
            code,
            messages: if msg.is_empty() { Vec::new() } else { vec![msg] },
        }
    }

    #[inline]
    #[must_use]
    pub fn append<S: ToString>(mut self, msg: S) -> Self {
        self.messages.push(msg.to_string());
        self
    }

    /// Keeps this error's code and appends the other error's messages.
    #[must_use]
    pub fn merge<E: Into<Self>>(mut self, other: E) -> Self {
        let other: Self = other.into();
        self.messages.push(MERGE_SEPARATOR.to_string());
        self.messages.extend(other.messages);
        self
    }

    pub fn message_string(&self) -> String {
        self.messages.join(" : ")
    }
}

impl core::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.code)?;
        if !self.messages.is_empty() {
            write!(f, ": {}", self.message_string())?;
        }
        Ok(())
    }
}

impl From<core::num::ParseIntError> for Error {
    fn from(err: core::num::ParseIntError) -> Self {
        make_err!(Code::InvalidArgument, "{err}")
    }
}

impl From<core::net::AddrParseError> for Error {
    fn from(err: core::net::AddrParseError) -> Self {
        make_err!(Code::InvalidArgument, "{err}")
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        make_err!(Code::Internal, "{err}")
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        make_err!(Code::DeadlineExceeded, "{err}")
    }
}

impl From<serde_json5::Error> for Error {
    fn from(err: serde_json5::Error) -> Self {
        make_err!(Code::InvalidArgument, "{err}")
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        make_err!(code_from_io_kind(err.kind()), "{err}")
    }
}

impl From<Code> for Error {
    fn from(code: Code) -> Self {
        Self::new(code, String::new())
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        make_err!(Code::Internal, "{err}")
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        make_err!(status.code(), "{}", status.message())
    }
}

impl From<Error> for tonic::Status {
    fn from(val: Error) -> Self {
        Self::new(val.code, val.message_string())
    }
}

/// Socket and filesystem failures seen by the CRI listener, the data plane
/// and the proxy loader.
const fn code_from_io_kind(kind: std::io::ErrorKind) -> Code {
    use std::io::ErrorKind;
    match kind {
        ErrorKind::NotFound => Code::NotFound,
        ErrorKind::PermissionDenied => Code::PermissionDenied,
        ErrorKind::AlreadyExists | ErrorKind::AddrInUse => Code::AlreadyExists,
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe => Code::Unavailable,
        ErrorKind::InvalidInput | ErrorKind::InvalidData => Code::InvalidArgument,
        ErrorKind::TimedOut => Code::DeadlineExceeded,
        ErrorKind::Interrupted => Code::Aborted,
        ErrorKind::UnexpectedEof | ErrorKind::Other => Code::Internal,
        _ => Code::Unknown,
    }
}

pub trait ResultExt<T> {
    fn err_tip_with_code<F, S>(self, tip_fn: F) -> Result<T, Error>
    where
        Self: Sized,
        S: ToString,
        F: (FnOnce(&Error) -> (Code, S)) + Sized;

    #[inline]
    fn err_tip<F, S>(self, tip_fn: F) -> Result<T, Error>
    where
        Self: Sized,
        S: ToString,
        F: (FnOnce() -> S) + Sized,
    {
        self.err_tip_with_code(|e| (e.code, tip_fn()))
    }
}

impl<T, E: Into<Error>> ResultExt<T> for Result<T, E> {
    #[inline]
    fn err_tip_with_code<F, S>(self, tip_fn: F) -> Result<T, Error>
    where
        Self: Sized,
        S: ToString,
        F: (FnOnce(&Error) -> (Code, S)) + Sized,
    {
        self.map_err(|e| {
            let mut error: Error = e.into();
            let (code, message) = tip_fn(&error);
            error.code = code;
            error.append(message)
        })
    }
}

/// A missing value is an internal fault unless the tip says otherwise.
impl<T> ResultExt<T> for Option<T> {
    #[inline]
    fn err_tip_with_code<F, S>(self, tip_fn: F) -> Result<T, Error>
    where
        Self: Sized,
        S: ToString,
        F: (FnOnce(&Error) -> (Code, S)) + Sized,
    {
        self.ok_or_else(|| {
            let error = Error::from(Code::Internal);
            let (code, message) = tip_fn(&error);
            Error::new(code, message.to_string())
        })
    }
}
