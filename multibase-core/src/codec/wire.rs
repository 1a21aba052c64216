//! `tonic` integration.
//!
//! Requests are validated and turned into `DynamicMessage`s before a call starts, so the
//! encoder only has to write bytes. The decoder turns every response into JSON, reporting
//! failures as a `Status` whose source is the underlying [`CodecError`].
use super::CodecError;
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use std::sync::Arc;
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

/// A custom Codec that sends pre-built `DynamicMessage`s and receives `serde_json::Value`s.
///
/// It only needs the schema of the response, since requests arrive already encoded
/// against theirs.
pub struct DynamicCodec {
    res_desc: MessageDescriptor,
}

impl DynamicCodec {
    /// Creates a new `DynamicCodec`.
    ///
    /// # Arguments
    /// * `res_desc` - Descriptor for the response message type.
    pub fn new(res_desc: MessageDescriptor) -> Self {
        Self { res_desc }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = serde_json::Value;

    type Encoder = DynamicEncoder;
    type Decoder = JsonDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        JsonDecoder(self.res_desc.clone())
    }
}

/// Writes an already validated message to the wire.
pub struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        item.encode_raw(dst);
        Ok(())
    }
}

/// Responsible for decoding Protobuf bytes into a JSON value.
pub struct JsonDecoder(MessageDescriptor);

impl Decoder for JsonDecoder {
    type Item = serde_json::Value;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut msg = DynamicMessage::new(self.0.clone());
        msg.merge(src).map_err(|err| {
            codec_status(CodecError::new(
                "",
                format!("failed to decode protobuf bytes: {err}"),
            ))
        })?;

        let value = super::to_json(&msg).map_err(codec_status)?;

        Ok(Some(value))
    }
}

fn codec_status(err: CodecError) -> Status {
    let mut status = Status::internal(err.to_string());
    status.set_source(Arc::new(err));
    status
}
