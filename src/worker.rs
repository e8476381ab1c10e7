//! Worker executor: owns one [`WorkerConnection`] and alternates forever
//! between the non-transactional (`proc_sqls`) and transactional
//! (`proc_txn`) service loops described in spec §4.5.
//!
//! A worker never shares its connection or statement cache; the only data
//! it shares with the rest of the process is the read-only statement
//! registry and the sequence number allocator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::driver::{DriverError, Outcome, WorkerConnection};
use crate::error::ErrorCode;
use crate::message::{self, ParseError, Reply, Request};
use crate::registry::StatementDef;
use crate::sequencer::Sequencer;
use crate::transport::{recv_internal_dealer, recv_internal_router, send_internal_dealer, CodecError, Frame, Packet};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("internal message missing its client address or body frame")]
    MalformedInternalMessage,
}

/// A reply this worker owns but has not yet put on the wire.
///
/// At most one of these exists per worker at any time (invariant W2): it is
/// either the value handed between phases, or it has just been written and
/// dropped.
struct PendingReply {
    client_addr: Vec<u8>,
    reply: Reply,
}

/// Reads one internal-channel request: the labeled client address frame
/// followed by the unlabeled JSON body frame.
fn read_request(socket: &zmq::Socket) -> Result<(Vec<u8>, Result<Request, ParseError>), WorkerError> {
    let mut packet = recv_internal_dealer(socket)?;
    let addr = packet.pop_front().ok_or(WorkerError::MalformedInternalMessage)?;
    let body = packet.pop_front().ok_or(WorkerError::MalformedInternalMessage)?;
    Ok((addr.data, Request::parse(&body.data)))
}

fn write_reply(socket: &zmq::Socket, addr: &[u8], reply: &Reply) -> Result<(), WorkerError> {
    let packet: Packet =
        [Frame::labeled(addr.to_vec()), Frame::new(reply.to_bytes())].into_iter().collect();
    send_internal_dealer(socket, &packet)?;
    Ok(())
}

/// One worker's driver connection plus its view of shared, read-only
/// process state.
pub struct Worker {
    id: usize,
    conn: WorkerConnection,
    registry: Arc<HashMap<String, StatementDef>>,
    sequencer: Arc<Sequencer>,
    idle_timeout: Duration,
}

impl Worker {
    #[must_use]
    pub fn new(
        id: usize,
        conn: WorkerConnection,
        registry: Arc<HashMap<String, StatementDef>>,
        sequencer: Arc<Sequencer>,
        idle_timeout: Duration,
    ) -> Self {
        Self { id, conn, registry, sequencer, idle_timeout }
    }

    /// Run the worker's endless non-transactional/transactional alternation.
    ///
    /// # Errors
    /// Returns [`WorkerError`] if the internal ZeroMQ sockets fail; this is
    /// treated as fatal to the worker thread by the caller.
    pub fn run(mut self, ctx: &zmq::Context) -> Result<(), WorkerError> {
        let sql_sock = ctx.socket(zmq::DEALER)?;
        sql_sock.connect("inproc://sql-work")?;

        let mut pending: Option<PendingReply> = None;
        loop {
            let begin = self.proc_sqls(&sql_sock, pending.take())?;
            let seq = self.sequencer.next();
            let tagged = PendingReply { client_addr: begin.client_addr, reply: begin.reply.with_txn(seq) };
            pending = Some(self.proc_txn(ctx, tagged, seq)?);
        }
    }

    /// Non-transactional phase: service the shared work queue until a
    /// `begin` is executed, then hand its reply off to the caller.
    fn proc_sqls(
        &mut self,
        sock: &zmq::Socket,
        pending: Option<PendingReply>,
    ) -> Result<PendingReply, WorkerError> {
        if let Some(p) = pending {
            write_reply(sock, &p.client_addr, &p.reply)?;
        }

        loop {
            let (addr, parsed) = read_request(sock)?;
            let req = match parsed {
                Err(e) => {
                    write_reply(sock, &addr, &Reply::new(e.code(), e.to_string()))?;
                    continue;
                }
                Ok(req) => req,
            };

            if req.txn.is_some() {
                write_reply(sock, &addr, &Reply::new(ErrorCode::BadTxn, None).with_id(req.id))?;
                continue;
            }

            let reply = self.execute(&req);
            if req.begins_txn() {
                return Ok(PendingReply { client_addr: addr, reply });
            }
            write_reply(sock, &addr, &reply)?;
        }
    }

    /// Transactional phase: service only the client that opened the
    /// transaction, bounded by the idle timeout, until a terminal reply is
    /// produced.
    fn proc_txn(
        &mut self,
        ctx: &zmq::Context,
        pending: PendingReply,
        seq: u32,
    ) -> Result<PendingReply, WorkerError> {
        let sock = ctx.socket(zmq::DEALER)?;
        sock.connect("inproc://txn-route")?;

        let client_addr = pending.client_addr.clone();
        write_reply(&sock, &pending.client_addr, &pending.reply)?;

        let timeout_ms = i64::try_from(self.idle_timeout.as_millis()).unwrap_or(i64::MAX);

        loop {
            let mut items = [sock.as_poll_item(zmq::POLLIN)];
            let ready = zmq::poll(&mut items, timeout_ms).map_err(CodecError::from)?;
            if ready == 0 {
                self.conn.rollback();
                return Ok(PendingReply {
                    client_addr,
                    reply: Reply::new(ErrorCode::TxnTimeout, None).with_txn(seq),
                });
            }

            let (addr, parsed) = read_request(&sock)?;
            let req = match parsed {
                Err(e) => {
                    write_reply(&sock, &addr, &Reply::new(e.code(), e.to_string()))?;
                    continue;
                }
                Ok(req) => req,
            };

            if req.begins_txn() {
                let reply = Reply::new(ErrorCode::BadTxn, "nested transactions not allowed".to_owned())
                    .with_id(req.id)
                    .with_txn(seq);
                write_reply(&sock, &addr, &reply)?;
                continue;
            }

            if req.txn != Some(seq) {
                write_reply(&sock, &addr, &Reply::new(ErrorCode::BadTxn, None).with_id(req.id))?;
                continue;
            }

            if addr != client_addr {
                write_reply(&sock, &addr, &Reply::new(ErrorCode::BadCaller, None).with_id(req.id))?;
                continue;
            }

            let reply = self.execute(&req).with_txn(seq);
            if req.ends_txn() || reply.code == ErrorCode::DbTxn.code() {
                return Ok(PendingReply { client_addr: addr, reply });
            }
            write_reply(&sock, &addr, &reply)?;
        }
    }

    /// Execute one request's statement against this worker's connection.
    fn execute(&mut self, req: &Request) -> Reply {
        match req.sql.as_str() {
            message::BEGIN => self.finish(req, self.conn_begin()),
            message::COMMIT => self.finish(req, self.conn_commit()),
            message::ROLLBACK => {
                self.conn.rollback();
                Reply::new(ErrorCode::Success, None).with_id(req.id)
            }
            name => self.execute_named(req, name),
        }
    }

    fn conn_begin(&mut self) -> Result<Outcome, DriverError> {
        self.conn.begin().map(|()| Outcome::Empty)
    }

    fn conn_commit(&mut self) -> Result<Outcome, DriverError> {
        self.conn.commit().map(|()| Outcome::Empty)
    }

    fn execute_named(&mut self, req: &Request, name: &str) -> Reply {
        let Some(def) = self.registry.get(name) else {
            return Reply::new(ErrorCode::BadReq, format!("unknown statement: {name}")).with_id(req.id);
        };
        let outcome = self.conn.execute(def, &req.params);
        self.finish(req, outcome)
    }

    fn finish(&self, req: &Request, outcome: Result<Outcome, DriverError>) -> Reply {
        match outcome {
            Ok(Outcome::Empty) => Reply::new(ErrorCode::Success, None).with_id(req.id),
            Ok(Outcome::InsertId(id)) => {
                Reply::new(ErrorCode::Success, None).with_id(req.id).with_results(json!([[id.to_string()]]))
            }
            Ok(Outcome::Rows(rows)) => Reply::new(ErrorCode::Success, None).with_id(req.id).with_results(rows),
            Err(e) => {
                tracing::warn!(worker = self.id, error = %e, "statement execution failed");
                Reply::new(e.code(), e.to_string()).with_id(req.id)
            }
        }
    }
}
