//! ZeroMQ I/O for the two shapes of socket this gateway uses.
//!
//! The external client-facing socket is a `ROUTER`; libzmq itself prepends
//! and strips exactly one identity frame per hop there, so the "label" for
//! that hop is free — [`recv_external`]/[`send_external`] just split it
//! off.
//!
//! The internal dispatcher<->worker fabric also runs over `ROUTER`/`DEALER`
//! pairs (over `inproc://`), but a client's envelope can itself be more
//! than one frame once it has passed through an external `ROUTER` hop, and
//! libzmq's automatic identity handling only ever adds/removes a single
//! frame per hop. So the envelope boundary within a *forwarded* packet has
//! to be carried explicitly. Each internal frame is therefore prefixed
//! with a one-byte tag recording whether it was part of the envelope —
//! the same thing the original system's deprecated ZMTP 1.x "label" bit
//! recorded, reimplemented at the application layer since modern libzmq
//! has no equivalent wire feature.

use super::packet::{Frame, Packet};

const TAG_PAYLOAD: u8 = 0;
const TAG_LABEL: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("zmq error: {0}")]
    Zmq(#[from] zmq::Error),
    #[error("internal frame missing its tag byte")]
    MissingTag,
    #[error("internal frame carries an unrecognized tag byte: {0}")]
    UnknownTag(u8),
    #[error("router recv produced no frames")]
    EmptyMessage,
    #[error("socket endpoint is not valid utf-8")]
    InvalidEndpoint,
}

fn encode_internal_frame(frame: &Frame) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.data.len() + 1);
    out.push(if frame.label { TAG_LABEL } else { TAG_PAYLOAD });
    out.extend_from_slice(&frame.data);
    out
}

fn decode_internal_frame(raw: &[u8]) -> Result<Frame, CodecError> {
    let (&tag, data) = raw.split_first().ok_or(CodecError::MissingTag)?;
    match tag {
        TAG_PAYLOAD => Ok(Frame::new(data)),
        TAG_LABEL => Ok(Frame::labeled(data)),
        other => Err(CodecError::UnknownTag(other)),
    }
}

/// Receive one message from the external `ROUTER` socket: the client
/// identity libzmq supplies, plus the payload frames that followed it.
///
/// # Errors
/// Returns [`CodecError`] on a zmq I/O failure or an empty message.
pub fn recv_external(socket: &zmq::Socket) -> Result<(Vec<u8>, Packet), CodecError> {
    let mut parts = socket.recv_multipart(0)?.into_iter();
    let identity = parts.next().ok_or(CodecError::EmptyMessage)?;
    let packet: Packet = parts.map(Frame::new).collect();
    Ok((identity, packet))
}

/// Send a reply back out the external `ROUTER` socket, addressed by the
/// identity frame captured from the matching [`recv_external`].
///
/// # Errors
/// Returns [`CodecError`] on a zmq I/O failure.
pub fn send_external(socket: &zmq::Socket, identity: &[u8], packet: &Packet) -> Result<(), CodecError> {
    let mut parts: Vec<Vec<u8>> = Vec::with_capacity(packet.len() + 1);
    parts.push(identity.to_vec());
    parts.extend(packet.iter().map(|f| f.data.clone()));
    socket.send_multipart(parts, 0)?;
    Ok(())
}

/// Receive one message from an internal `ROUTER` socket (dispatcher's view
/// of the worker pool): the worker identity libzmq supplies, plus the
/// tag-decoded frames that followed it.
///
/// # Errors
/// Returns [`CodecError`] on a zmq I/O failure, an empty message, or a
/// malformed tag byte.
pub fn recv_internal_router(socket: &zmq::Socket) -> Result<(Vec<u8>, Packet), CodecError> {
    let mut parts = socket.recv_multipart(0)?.into_iter();
    let identity = parts.next().ok_or(CodecError::EmptyMessage)?;
    let packet = parts.map(|raw| decode_internal_frame(&raw)).collect::<Result<Packet, _>>()?;
    Ok((identity, packet))
}

/// Send a message out an internal `ROUTER` socket, addressed by worker
/// identity, tag-encoding every frame so the receiving `DEALER` can
/// recover label boundaries.
///
/// # Errors
/// Returns [`CodecError`] on a zmq I/O failure.
pub fn send_internal_router(socket: &zmq::Socket, identity: &[u8], packet: &Packet) -> Result<(), CodecError> {
    let mut parts: Vec<Vec<u8>> = Vec::with_capacity(packet.len() + 1);
    parts.push(identity.to_vec());
    parts.extend(packet.iter().map(encode_internal_frame));
    socket.send_multipart(parts, 0)?;
    Ok(())
}

/// Receive one message from an internal `DEALER` socket (a worker's view
/// of the dispatcher), tag-decoding every frame.
///
/// # Errors
/// Returns [`CodecError`] on a zmq I/O failure or a malformed tag byte.
pub fn recv_internal_dealer(socket: &zmq::Socket) -> Result<Packet, CodecError> {
    socket.recv_multipart(0)?.iter().map(|raw| decode_internal_frame(raw)).collect()
}

/// Send a message out an internal `DEALER` socket, tag-encoding every
/// frame.
///
/// # Errors
/// Returns [`CodecError`] on a zmq I/O failure.
pub fn send_internal_dealer(socket: &zmq::Socket, packet: &Packet) -> Result<(), CodecError> {
    let parts: Vec<Vec<u8>> = packet.iter().map(encode_internal_frame).collect();
    socket.send_multipart(parts, 0)?;
    Ok(())
}
