//! # Method Invoker
//!
//! Performs a single call of any [`CallShape`] against a live server, using only a
//! `MethodDescriptor` and a JSON payload.
//!
//! ## How it works
//!
//! 1. **Prepare**: the payload is validated and encoded up front into an [`Outgoing`] value.
//!    A bad payload fails here, before any connection is attempted.
//! 2. **Connect**: a `tonic` channel is opened to the target address (`http://` is assumed
//!    when no scheme is given).
//! 3. **Call**: the [`Invoker`] drives the call for the method's shape. Streamed responses are
//!    handed one by one to an `on_message` callback.
//!
//! Every step races against a [`CancellationToken`]. Cancelling drops the in-flight call,
//! which resets the HTTP/2 stream, and the call resolves to [`InvokeError::Cancelled`].
//!
//! ## Payload framing
//!
//! Calls that stream requests (client and bidirectional streaming) take a JSON array; each
//! element is sent as one message, in order. Other calls take a single JSON object.
mod client;

pub use client::Invoker;

use crate::BoxError;
use crate::codec::{self, CodecError};
use crate::tree::CallShape;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use std::error::Error as _;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

/// Coarse classification of an [`InvokeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeErrorKind {
    Transport,
    Remote,
    Codec,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// The server could not be reached, or the connection broke mid-call.
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    /// The server answered with a non-OK status.
    #[error("Server returned '{code:?}': '{message}'")]
    Remote { code: tonic::Code, message: String },
    #[error("Invalid message: {0}")]
    Codec(#[from] CodecError),
    #[error("Request was cancelled")]
    Cancelled,
}

impl InvokeError {
    pub fn kind(&self) -> InvokeErrorKind {
        match self {
            InvokeError::Transport { .. } => InvokeErrorKind::Transport,
            InvokeError::Remote { .. } => InvokeErrorKind::Remote,
            InvokeError::Codec(_) => InvokeErrorKind::Codec,
            InvokeError::Cancelled => InvokeErrorKind::Cancelled,
        }
    }

    pub(crate) fn transport(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        InvokeError::Transport {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Splits a `tonic::Status` into what actually went wrong.
    ///
    /// Statuses raised locally carry their cause as a source: a [`CodecError`] from our own
    /// codec, or an I/O or HTTP/2 failure. Statuses sent by the server have no source.
    pub(crate) fn from_status(status: tonic::Status) -> Self {
        let Some(source) = status.source() else {
            return InvokeError::Remote {
                code: status.code(),
                message: status.message().to_owned(),
            };
        };

        if let Some(err) = source.downcast_ref::<CodecError>() {
            return InvokeError::Codec(err.clone());
        }

        InvokeError::Transport {
            message: status.message().to_owned(),
            source: Some(Box::new(status)),
        }
    }
}

/// Request messages for one call, already validated against the method's input type.
#[derive(Debug, Clone)]
pub enum Outgoing {
    /// The request of a unary or server streaming call.
    Single(DynamicMessage),
    /// The request sequence of a client or bidirectional streaming call.
    Stream(Vec<DynamicMessage>),
}

impl Outgoing {
    /// Encodes `payload` for `method`, following the framing described in the module docs.
    ///
    /// Errors inside a request sequence are reported below the element index (`[2].name`).
    pub fn prepare(method: &MethodDescriptor, payload: &str) -> Result<Self, CodecError> {
        let input = method.input();
        let value = codec::parse(payload)?;

        if !CallShape::of(method).streams_requests() {
            return codec::to_message(&input, &value).map(Outgoing::Single);
        }

        let items = value.as_array().ok_or_else(|| {
            CodecError::new(
                "",
                format!(
                    "{} streams its requests, expected a JSON array of messages",
                    method.full_name()
                ),
            )
        })?;

        items
            .iter()
            .enumerate()
            .map(|(index, item)| codec::to_message_at(&input, item, &format!("[{index}]")))
            .collect::<Result<Vec<_>, _>>()
            .map(Outgoing::Stream)
    }
}

/// Opens a channel to `address`.
///
/// The address may be `host:port`, in which case plaintext `http://` is used.
pub async fn connect(address: &str) -> Result<Channel, InvokeError> {
    let uri = if address.contains("://") {
        address.to_owned()
    } else {
        format!("http://{address}")
    };

    let endpoint = Endpoint::new(uri)
        .map_err(|err| InvokeError::transport(format!("Invalid address '{address}'"), err))?;

    debug!(address, "connecting");

    endpoint
        .connect()
        .await
        .map_err(|err| InvokeError::transport(format!("Failed to connect to '{address}'"), err))
}

/// Calls `method` on the server at `address`.
///
/// Returns the rendered JSON of the last response. For calls that stream responses every
/// response is also passed to `on_message` as it arrives, and the result is the last one
/// (an empty string when the server sent none).
///
/// The payload is encoded before connecting, so a [`CodecError`] never costs a network
/// round trip. The connection is owned by this call and closed when it returns.
pub async fn invoke<F>(
    address: &str,
    method: &MethodDescriptor,
    payload: &str,
    on_message: F,
    cancel: &CancellationToken,
) -> Result<String, InvokeError>
where
    F: FnMut(&str) + Send,
{
    let outgoing = Outgoing::prepare(method, payload)?;
    let channel = until_cancelled(cancel, connect(address)).await??;

    Invoker::new(channel)
        .call(method, outgoing, on_message, cancel)
        .await
}

/// Runs `future` unless `cancel` fires first.
pub(crate) async fn until_cancelled<F>(
    cancel: &CancellationToken,
    future: F,
) -> Result<F::Output, InvokeError>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(InvokeError::Cancelled),
        output = future => Ok(output),
    }
}
