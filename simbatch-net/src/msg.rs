//! Message definitions for the manager to worker protocol.
//!
//! Every exchange is one request followed by one reply, each carried in a
//! single frame (see [`crate::frame`]). A frame holds a bincode encoded
//! [`Message`], whose payload is itself a bincode encoded payload struct.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_repr::*;

use simbatch_core::{Experiment, Value};

use crate::error::{Error, Result};
use crate::frame::MAX_FRAME_LEN;

/// Payloads larger than this are compressed when compression is requested.
pub const COMPRESSION_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum MessageType {
    RunExperimentRequest = 1,
    RunExperimentResponse = 2,
    ErrorResponse = 3,
}

/// Defines a single message, which is a wrapper around a payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Specifies the type of message stored inside the payload
    pub type_: MessageType,
    compressed: bool,
    /// Size of uncompressed payload
    payload_size: u32,
    /// Byte representation of the payload struct
    #[serde(with = "serde_bytes")]
    payload: Vec<u8>,
}

impl Message {
    /// Creates a complete `Message` from a payload struct, optionally
    /// compressing the payload.
    pub fn from_payload<P: Payload>(payload: &P, compress: bool) -> Result<Message> {
        let type_ = payload.type_();
        let bytes = bincode::serialize(payload)?;
        let payload_size = bytes.len() as u32;
        let (payload, compressed) = pack(bytes, compress)?;
        Ok(Message {
            type_,
            compressed,
            payload_size,
            payload,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Message> {
        bincode::deserialize(bytes).map_err(|e| Error::Protocol(format!("bad message: {}", e)))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Unpacks the payload into a payload struct of the provided type.
    pub fn unpack_payload<P: Payload>(&self) -> Result<P> {
        let bytes = if self.compressed {
            if self.payload_size > MAX_FRAME_LEN {
                return Err(Error::Protocol(format!(
                    "announced payload of {} bytes exceeds the {} bytes limit",
                    self.payload_size, MAX_FRAME_LEN
                )));
            }
            decompress(&self.payload, self.payload_size)?
        } else {
            self.payload.clone()
        };
        bincode::deserialize(&bytes)
            .map_err(|e| Error::Protocol(format!("bad {:?} payload: {}", self.type_, e)))
    }
}

fn pack(bytes: Vec<u8>, compress: bool) -> Result<(Vec<u8>, bool)> {
    if compress && bytes.len() > COMPRESSION_THRESHOLD {
        #[cfg(feature = "lz4")]
        return Ok((lz4::block::compress(&bytes, None, false)?, true));
    }
    Ok((bytes, false))
}

#[cfg(feature = "lz4")]
fn decompress(bytes: &[u8], size: u32) -> Result<Vec<u8>> {
    lz4::block::decompress(bytes, Some(size as i32))
        .map_err(|e| Error::Protocol(format!("failed decompressing payload: {}", e)))
}

#[cfg(not(feature = "lz4"))]
fn decompress(_bytes: &[u8], _size: u32) -> Result<Vec<u8>> {
    Err(Error::Protocol(
        "compressed payload received, but lz4 support is disabled".to_string(),
    ))
}

pub trait Payload: Serialize + DeserializeOwned {
    /// Allows payload message structs to state their message type.
    fn type_(&self) -> MessageType;
}

/// Asks a worker to run one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunExperimentRequest {
    /// Name of the job, for logging on the worker side.
    pub job: String,
    pub experiment: Experiment,
    /// Whether the post-run experiment state should be sent back.
    pub save_result: bool,
}

impl Payload for RunExperimentRequest {
    fn type_(&self) -> MessageType {
        MessageType::RunExperimentRequest
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunExperimentResponse {
    pub result: Value,
    /// Experiment with its results filled in, present if requested.
    pub state: Option<Experiment>,
}

impl Payload for RunExperimentResponse {
    fn type_(&self) -> MessageType {
        MessageType::RunExperimentResponse
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum RemoteErrorKind {
    /// The simulation itself failed.
    Simulation = 1,
    /// The request could not be understood.
    Protocol = 2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl Payload for ErrorResponse {
    fn type_(&self) -> MessageType {
        MessageType::ErrorResponse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_payloads_are_compressed() {
        let mut experiment = Experiment::new("big", 1.).unwrap();
        experiment.set_condition_port("c", "text", Value::from("x".repeat(20_000)));
        let request = RunExperimentRequest {
            job: "big.exp".to_string(),
            experiment,
            save_result: false,
        };

        let msg = Message::from_payload(&request, true).unwrap();
        assert_eq!(msg.type_, MessageType::RunExperimentRequest);
        #[cfg(feature = "lz4")]
        assert!(msg.payload.len() < msg.payload_size as usize);

        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        let unpacked: RunExperimentRequest = decoded.unpack_payload().unwrap();
        assert_eq!(unpacked, request);
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        let err = Message::from_bytes(&[0xff, 0x01]).unwrap_err();
        assert!(err.is_protocol_error());
    }

    #[test]
    fn oversized_uncompressed_size_is_refused() {
        let forged = Message {
            type_: MessageType::ErrorResponse,
            compressed: true,
            payload_size: 0x7fff_ffff,
            payload: vec![0x1f, 0x00, 0x00, 0x00],
        };
        let bytes = forged.to_bytes().unwrap();
        let err = Message::from_bytes(&bytes)
            .unwrap()
            .unpack_payload::<ErrorResponse>()
            .unwrap_err();
        assert!(err.is_protocol_error());
        assert!(err.to_string().contains("exceeds"));
    }
}
