//! # Generic gRPC Client
//!
//! Wraps a standard `tonic` client so it can call methods known only at runtime.
//!
//! The [`Invoker`] is generic over the underlying service, so it runs on a real
//! `tonic::transport::Channel` as well as on an in-process server. It does not know the
//! messages it exchanges: requests arrive as `DynamicMessage`s and responses are decoded by
//! the [`DynamicCodec`] into JSON values.
//!
//! ## Features
//!
//! * **Dynamic Pathing**: Constructs the HTTP/2 path (e.g., `/package.Service/Method`) at runtime.
//! * **Every call shape**: Unary, Server Streaming, Client Streaming and Bidirectional Streaming
//!   go through a single entry point, [`Invoker::call`].
//! * **Cancellation**: The whole call races against a `CancellationToken`.
use super::{InvokeError, Outgoing, until_cancelled};
use crate::BoxError;
use crate::codec::{CodecError, DynamicCodec};
use crate::tree::CallShape;
use http_body::Body as HttpBody;
use prost_reflect::MethodDescriptor;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Streaming, client::GrpcService, transport::Channel};
use tracing::debug;

/// Calls arbitrary methods over a gRPC service.
#[derive(Debug, Clone)]
pub struct Invoker<S = Channel> {
    service: S,
}

impl<S> Invoker<S>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// Encodes `payload` and performs the call. See [`Invoker::call`].
    pub async fn invoke<F>(
        &self,
        method: &MethodDescriptor,
        payload: &str,
        on_message: F,
        cancel: &CancellationToken,
    ) -> Result<String, InvokeError>
    where
        F: FnMut(&str) + Send,
    {
        let outgoing = Outgoing::prepare(method, payload)?;
        self.call(method, outgoing, on_message, cancel).await
    }

    /// Performs one call of `method` with already prepared request messages.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The JSON of the (last) response, empty if a stream sent nothing.
    /// * `Err(InvokeError::Remote)` - The server answered with a non-OK status.
    /// * `Err(InvokeError::Cancelled)` - `cancel` fired before the call completed.
    pub async fn call<F>(
        &self,
        method: &MethodDescriptor,
        outgoing: Outgoing,
        mut on_message: F,
        cancel: &CancellationToken,
    ) -> Result<String, InvokeError>
    where
        F: FnMut(&str) + Send,
    {
        let shape = CallShape::of(method);
        debug!(method = method.full_name(), %shape, "calling");

        until_cancelled(cancel, self.dispatch(method, shape, outgoing, &mut on_message)).await?
    }

    async fn dispatch<F>(
        &self,
        method: &MethodDescriptor,
        shape: CallShape,
        outgoing: Outgoing,
        on_message: &mut F,
    ) -> Result<String, InvokeError>
    where
        F: FnMut(&str) + Send,
    {
        let mut client = tonic::client::Grpc::new(self.service.clone());
        client
            .ready()
            .await
            .map_err(|err| InvokeError::transport("The client was not ready", err))?;

        let codec = DynamicCodec::new(method.output());
        let path = http_path(method)?;

        match (shape, outgoing) {
            (CallShape::Unary, Outgoing::Single(message)) => {
                let response = client
                    .unary(Request::new(message), path, codec)
                    .await
                    .map_err(InvokeError::from_status)?;
                render(&response.into_inner())
            }
            (CallShape::ServerStreaming, Outgoing::Single(message)) => {
                let stream = client
                    .server_streaming(Request::new(message), path, codec)
                    .await
                    .map_err(InvokeError::from_status)?
                    .into_inner();
                drain(stream, on_message).await
            }
            (CallShape::ClientStreaming, Outgoing::Stream(messages)) => {
                let response = client
                    .client_streaming(Request::new(tokio_stream::iter(messages)), path, codec)
                    .await
                    .map_err(InvokeError::from_status)?;
                render(&response.into_inner())
            }
            (CallShape::BidiStreaming, Outgoing::Stream(messages)) => {
                let stream = client
                    .streaming(Request::new(tokio_stream::iter(messages)), path, codec)
                    .await
                    .map_err(InvokeError::from_status)?
                    .into_inner();
                drain(stream, on_message).await
            }
            (shape, _) => Err(CodecError::new(
                "",
                format!("the prepared messages do not fit a {shape} call"),
            )
            .into()),
        }
    }
}

/// Forwards every response to `on_message` and returns the last one.
async fn drain<F>(
    mut stream: Streaming<serde_json::Value>,
    on_message: &mut F,
) -> Result<String, InvokeError>
where
    F: FnMut(&str),
{
    let mut last = String::new();
    let mut received = 0usize;

    while let Some(value) = stream.message().await.map_err(InvokeError::from_status)? {
        let text = render(&value)?;
        on_message(&text);
        last = text;
        received += 1;
    }

    debug!(received, "response stream finished");
    Ok(last)
}

fn render(value: &serde_json::Value) -> Result<String, InvokeError> {
    serde_json::to_string(value).map_err(|err| CodecError::new("", err.to_string()).into())
}

fn http_path(method: &MethodDescriptor) -> Result<http::uri::PathAndQuery, InvokeError> {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::from_str(&path)
        .map_err(|err| InvokeError::transport(format!("Invalid method path '{path}'"), err))
}
