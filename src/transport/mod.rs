//! The wire codec: frames, packets, and the ZeroMQ I/O built on them.
//!
//! See [`packet`] for the in-memory [`Packet`]/[`Frame`] representation and
//! its labeled-prefix invariant, and [`wire`] for how packets are read from
//! and written to the external and internal ZeroMQ sockets this gateway
//! uses.

pub mod packet;
pub mod wire;

pub use packet::{Frame, LabelOrderError, Packet};
pub use wire::{
    recv_external, recv_internal_dealer, recv_internal_router, send_external, send_internal_dealer,
    send_internal_router, CodecError,
};
