//! Wire framing shared by both ends of a connection.
//!
//! Every frame is length prefixed. All integers are big endian.
//!
//! Request:
//!
//! | frame length | call id | method id | payload  |
//! |:------------:|:-------:|:---------:|:--------:|
//! |      4       |    4    |     4     | Variable |
//!
//! Response:
//!
//! | frame length | call id | status | payload or error text |
//! |:------------:|:-------:|:------:|:---------------------:|
//! |      4       |    4    |   1    |       Variable        |
//!
//! `frame length` counts the bytes that follow it.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_more::{Display, From};
use serde::{Serialize, de::DeserializeOwned};
use tokio_util::codec::{Decoder, Encoder};

pub const LENGTH_SIZE: usize = 4;
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

const REQUEST_HEADER_SIZE: usize = 8;
const RESPONSE_HEADER_SIZE: usize = 5;

#[derive(Debug, Display, From, Clone, PartialEq, Eq, derive_more::Error)]
pub enum FramingError {
    #[display("truncated frame: need {needed} bytes, have {available}")]
    #[from(ignore)]
    Truncated { needed: usize, available: usize },
    #[display("frame length {_0} is shorter than the frame header")]
    #[from(ignore)]
    LengthTooSmall(#[error(not(source))] u32),
    #[display("frame length {len} exceeds the limit of {max} bytes")]
    #[from(ignore)]
    FrameTooLarge { len: usize, max: usize },
    #[display("{_0} trailing bytes after frame")]
    #[from(ignore)]
    TrailingBytes(#[error(not(source))] usize),
    #[display("unknown response status {_0}")]
    #[from(ignore)]
    UnknownStatus(#[error(not(source))] u8),
    #[display("error text is not utf-8")]
    InvalidErrorText(std::str::Utf8Error),
}

/// Outcome carried by a response frame.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Success = 0,
    ApplicationError = 1,
    MethodNotFound = 2,
    MalformedRequest = 3,
}

impl TryFrom<u8> for Status {
    type Error = FramingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::Success),
            1 => Ok(Status::ApplicationError),
            2 => Ok(Status::MethodNotFound),
            3 => Ok(Status::MalformedRequest),
            other => Err(FramingError::UnknownStatus(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub call_id: u32,
    pub method_id: u32,
    pub payload: Bytes,
}

impl RequestFrame {
    pub fn new(call_id: u32, method_id: u32, payload: Bytes) -> Self {
        Self {
            call_id,
            method_id,
            payload,
        }
    }

    pub fn encoded_len(&self) -> usize {
        LENGTH_SIZE + REQUEST_HEADER_SIZE + self.payload.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u32((REQUEST_HEADER_SIZE + self.payload.len()) as u32);
        dst.put_u32(self.call_id);
        dst.put_u32(self.method_id);
        dst.put(self.payload.clone());
    }

    /// Decodes exactly one frame occupying all of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, FramingError> {
        let body = exact_frame_body(data, REQUEST_HEADER_SIZE)?;
        Ok(Self::from_body(body))
    }

    fn from_body(mut body: Bytes) -> Self {
        let call_id = body.get_u32();
        let method_id = body.get_u32();
        Self {
            call_id,
            method_id,
            payload: body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub call_id: u32,
    pub status: Status,
    /// Serialized response on success, utf-8 error text otherwise.
    pub body: Bytes,
}

impl ResponseFrame {
    pub fn success(call_id: u32, payload: Bytes) -> Self {
        Self {
            call_id,
            status: Status::Success,
            body: payload,
        }
    }

    pub fn error(call_id: u32, status: Status, text: impl Into<String>) -> Self {
        Self {
            call_id,
            status,
            body: Bytes::from(text.into()),
        }
    }

    pub fn encoded_len(&self) -> usize {
        LENGTH_SIZE + RESPONSE_HEADER_SIZE + self.body.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u32((RESPONSE_HEADER_SIZE + self.body.len()) as u32);
        dst.put_u32(self.call_id);
        dst.put_u8(self.status as u8);
        dst.put(self.body.clone());
    }

    /// Decodes exactly one frame occupying all of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, FramingError> {
        let body = exact_frame_body(data, RESPONSE_HEADER_SIZE)?;
        Self::from_body(body)
    }

    fn from_body(mut body: Bytes) -> Result<Self, FramingError> {
        let call_id = body.get_u32();
        let status = Status::try_from(body.get_u8())?;
        if status != Status::Success {
            std::str::from_utf8(&body)?;
        }
        Ok(Self {
            call_id,
            status,
            body,
        })
    }

    /// Maps the wire status onto the caller-visible outcome.
    pub fn into_result(self) -> Result<Bytes> {
        if self.status == Status::Success {
            return Ok(self.body);
        }
        let text = String::from_utf8_lossy(&self.body).into_owned();
        Err(match self.status {
            Status::MethodNotFound => Error::MethodNotFound(text),
            Status::MalformedRequest => Error::MalformedRequest(text),
            _ => Error::Application(text),
        })
    }
}

fn exact_frame_body(data: &[u8], header_size: usize) -> Result<Bytes, FramingError> {
    if data.len() < LENGTH_SIZE {
        return Err(FramingError::Truncated {
            needed: LENGTH_SIZE,
            available: data.len(),
        });
    }
    let len = (&data[..LENGTH_SIZE]).get_u32();
    if (len as usize) < header_size {
        return Err(FramingError::LengthTooSmall(len));
    }
    let total = LENGTH_SIZE + len as usize;
    if data.len() < total {
        return Err(FramingError::Truncated {
            needed: total,
            available: data.len(),
        });
    }
    if data.len() > total {
        return Err(FramingError::TrailingBytes(data.len() - total));
    }
    Ok(Bytes::copy_from_slice(&data[LENGTH_SIZE..]))
}

/// Splits one complete frame body off `src`, or returns `None` without
/// consuming anything when more bytes are needed.
fn split_frame_body(
    src: &mut BytesMut,
    header_size: usize,
    max_frame_length: usize,
) -> Result<Option<Bytes>, FramingError> {
    if src.len() < LENGTH_SIZE {
        return Ok(None);
    }
    let len = (&src[..LENGTH_SIZE]).get_u32();
    if (len as usize) < header_size {
        return Err(FramingError::LengthTooSmall(len));
    }
    if len as usize > max_frame_length {
        return Err(FramingError::FrameTooLarge {
            len: len as usize,
            max: max_frame_length,
        });
    }
    let total = LENGTH_SIZE + len as usize;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }
    let mut frame = src.split_to(total);
    frame.advance(LENGTH_SIZE);
    Ok(Some(frame.freeze()))
}

/// Client side: writes requests, reads responses.
#[derive(Debug, Clone, Copy)]
pub struct ClientCodec {
    max_frame_length: usize,
}

impl ClientCodec {
    pub fn new(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl Encoder<RequestFrame> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, item: RequestFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.encoded_len() - LENGTH_SIZE;
        if len > self.max_frame_length {
            return Err(FramingError::FrameTooLarge {
                len,
                max: self.max_frame_length,
            }
            .into());
        }
        item.encode_into(dst);
        Ok(())
    }
}

impl Decoder for ClientCodec {
    type Item = ResponseFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match split_frame_body(src, RESPONSE_HEADER_SIZE, self.max_frame_length)? {
            Some(body) => Ok(Some(ResponseFrame::from_body(body)?)),
            None => Ok(None),
        }
    }
}

/// Server side: reads requests, writes responses.
#[derive(Debug, Clone, Copy)]
pub struct ServerCodec {
    max_frame_length: usize,
}

impl ServerCodec {
    pub fn new(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }
}

impl Default for ServerCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl Encoder<ResponseFrame> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, item: ResponseFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.encoded_len() - LENGTH_SIZE;
        if len > self.max_frame_length {
            return Err(FramingError::FrameTooLarge {
                len,
                max: self.max_frame_length,
            }
            .into());
        }
        item.encode_into(dst);
        Ok(())
    }
}

impl Decoder for ServerCodec {
    type Item = RequestFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(split_frame_body(src, REQUEST_HEADER_SIZE, self.max_frame_length)?
            .map(RequestFrame::from_body))
    }
}

pub fn encode_payload<T: Serialize>(value: &T) -> Result<Bytes> {
    Ok(bincode::serialize(value)?.into())
}

pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
