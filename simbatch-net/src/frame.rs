//! Length-prefixed framing.
//!
//! Each frame is a little-endian `u32` body length followed by the body.
//! The same framing is used in both directions.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::msg::{Message, Payload};
use crate::transport::Socket;

pub const HEADER_LEN: usize = 4;

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: u32 = 256 * 1024 * 1024;

pub fn write_frame(socket: &mut Socket, body: &[u8]) -> Result<()> {
    if body.len() > MAX_FRAME_LEN as usize {
        return Err(Error::Protocol(format!(
            "frame of {} bytes exceeds the {} bytes limit",
            body.len(),
            MAX_FRAME_LEN
        )));
    }
    let mut bytes = vec![0; HEADER_LEN];
    LittleEndian::write_u32(&mut bytes, body.len() as u32);
    bytes.extend_from_slice(body);
    trace!("writing frame of {} bytes", body.len());
    socket.send_all(&bytes)
}

/// Reads one frame body.
///
/// A peer closing before sending anything is a connection error, while a
/// peer closing in the middle of a frame is a protocol error.
pub fn read_frame(socket: &mut Socket) -> Result<Vec<u8>> {
    let header = socket.receive_exact(HEADER_LEN)?;
    if header.is_empty() {
        return Err(Error::Connection(
            "connection closed by peer before reply".to_string(),
        ));
    }
    if header.len() < HEADER_LEN {
        return Err(Error::Protocol(format!(
            "truncated frame header, got {} of {} bytes",
            header.len(),
            HEADER_LEN
        )));
    }

    let len = LittleEndian::read_u32(&header);
    if len > MAX_FRAME_LEN {
        return Err(Error::Protocol(format!(
            "announced frame of {} bytes exceeds the {} bytes limit",
            len, MAX_FRAME_LEN
        )));
    }
    let body = socket.receive_exact(len as usize)?;
    if body.len() < len as usize {
        return Err(Error::Protocol(format!(
            "truncated frame, got {} of {} bytes",
            body.len(),
            len
        )));
    }
    trace!("read frame of {} bytes", len);
    Ok(body)
}

/// Packs the payload into a message and sends it as one frame.
pub fn send_payload<P: Payload>(socket: &mut Socket, payload: &P, compress: bool) -> Result<()> {
    let msg = Message::from_payload(payload, compress)?;
    write_frame(socket, &msg.to_bytes()?)
}

/// Reads one frame and decodes the message it holds.
pub fn recv_msg(socket: &mut Socket) -> Result<Message> {
    let body = read_frame(socket)?;
    Message::from_bytes(&body)
}
