//! Frontend dispatcher: the ROUTER-facing external socket, the DEALER-DEALER
//! work queue shared by non-transactional requests, and the ROUTER-DEALER
//! per-transaction fabric that pins a transaction to the worker that began
//! it (spec §4.6).
//!
//! The "transaction handle" a client echoes back on a follow-up request is,
//! on the wire, nothing more than the ZeroMQ identity `txn_router` assigned
//! the worker's `DEALER` socket the moment that worker first replied to a
//! `begin`. Routing a follow-up request to the right worker is therefore
//! just addressing a ROUTER send by that identity — the dispatcher never
//! keeps its own transaction-to-worker table.

use crate::message::Reply;
use crate::transport::{
    recv_external, recv_internal_dealer, recv_internal_router, send_external, send_internal_dealer,
    send_internal_router, CodecError, Frame, Packet,
};

/// Owns the three sockets the dispatcher polls: the external client-facing
/// `ROUTER`, the internal non-transactional work queue, and the internal
/// per-transaction router.
pub struct Dispatcher {
    external: zmq::Socket,
    sql_work: zmq::Socket,
    txn_router: zmq::Socket,
}

impl Dispatcher {
    /// Bind the three sockets this dispatcher owns.
    ///
    /// # Errors
    /// Returns [`CodecError`] if any of the three binds fails.
    pub fn bind(ctx: &zmq::Context, listen: &str) -> Result<Self, CodecError> {
        let external = ctx.socket(zmq::ROUTER)?;
        external.bind(listen)?;

        let sql_work = ctx.socket(zmq::DEALER)?;
        sql_work.bind("inproc://sql-work")?;

        let txn_router = ctx.socket(zmq::ROUTER)?;
        txn_router.bind("inproc://txn-route")?;

        Ok(Self { external, sql_work, txn_router })
    }

    /// The address the external socket actually bound to, resolving an
    /// ephemeral `:0` port to the one the OS assigned. Used by callers that
    /// bind to port `0` and need to learn the real listen address.
    ///
    /// # Errors
    /// Returns [`CodecError`] if the socket cannot report its endpoint, or
    /// reports one that is not valid UTF-8.
    pub fn external_endpoint(&self) -> Result<String, CodecError> {
        self.external.get_last_endpoint()?.map_err(|_| CodecError::InvalidEndpoint)
    }

    /// Poll all three endpoints forever, servicing whichever is ready.
    ///
    /// # Errors
    /// Returns [`CodecError`] on a ZeroMQ I/O failure; this is fatal to the
    /// dispatcher thread.
    pub fn run(&self) -> Result<(), CodecError> {
        loop {
            let mut items = [
                self.external.as_poll_item(zmq::POLLIN),
                self.sql_work.as_poll_item(zmq::POLLIN),
                self.txn_router.as_poll_item(zmq::POLLIN),
            ];
            zmq::poll(&mut items, -1)?;

            if items[0].is_readable() {
                self.dispatch_request()?;
            }
            if items[1].is_readable() {
                self.dispatch_reply(false)?;
            }
            if items[2].is_readable() {
                self.dispatch_reply(true)?;
            }
        }
    }

    /// Receive one client request, classify it by frame count, and forward
    /// it onto the work queue or the transaction router.
    fn dispatch_request(&self) -> Result<(), CodecError> {
        let (client_addr, mut packet) = recv_external(&self.external)?;

        match packet.len() {
            1 => {
                let body = packet.pop_front().ok_or(CodecError::EmptyMessage)?;
                let forward: Packet =
                    [Frame::labeled(client_addr), Frame::new(body.data)].into_iter().collect();
                send_internal_dealer(&self.sql_work, &forward)
            }
            2 => {
                let txn_handle = packet.pop_front().ok_or(CodecError::EmptyMessage)?;
                let body = packet.pop_front().ok_or(CodecError::EmptyMessage)?;
                let forward: Packet =
                    [Frame::labeled(client_addr), Frame::new(body.data)].into_iter().collect();
                send_internal_router(&self.txn_router, &txn_handle.data, &forward)
            }
            _ => {
                let reply: Packet = [Frame::new(Reply::bad_proto().to_bytes())].into_iter().collect();
                send_external(&self.external, &client_addr, &reply)
            }
        }
    }

    /// Receive one worker reply and forward it to the client it is
    /// addressed to, prepending the worker's own routing identity as the
    /// transaction handle when the reply came off the transaction router.
    fn dispatch_reply(&self, from_txn: bool) -> Result<(), CodecError> {
        let (client_addr, out) = if from_txn {
            let (worker_id, mut packet) = recv_internal_router(&self.txn_router)?;
            let client_frame = packet.pop_front().ok_or(CodecError::EmptyMessage)?;
            let body = packet.pop_front().ok_or(CodecError::EmptyMessage)?;
            let out: Packet = [Frame::new(worker_id), Frame::new(body.data)].into_iter().collect();
            (client_frame.data, out)
        } else {
            let mut packet = recv_internal_dealer(&self.sql_work)?;
            let client_frame = packet.pop_front().ok_or(CodecError::EmptyMessage)?;
            let body = packet.pop_front().ok_or(CodecError::EmptyMessage)?;
            let out: Packet = [Frame::new(body.data)].into_iter().collect();
            (client_frame.data, out)
        };

        send_external(&self.external, &client_addr, &out)
    }
}
