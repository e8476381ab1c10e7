//! `mysqlcp` — a network-facing MySQL connection pool and SQL gateway.
//!
//! Clients submit named, prepared-statement invocations over a
//! message-oriented request/response channel; the gateway multiplexes
//! those requests onto a bounded pool of worker-owned database
//! connections, executes parameterized statements, and returns
//! JSON-encoded results. It additionally supports affinity-bound
//! transactions, pinned to one worker connection from `begin` through
//! `commit`/`rollback` and addressed by a server-assigned sequence number.
//!
//! Module layout mirrors the component breakdown of the system this
//! gateway implements: [`transport`] is the wire codec, [`registry`] the
//! statement catalog, [`driver`] the per-connection MySQL adapter,
//! [`sequencer`] the transaction sequence allocator, [`worker`] the
//! per-connection executor, and [`dispatcher`] the frontend routing
//! fabric that binds them together. [`config`] and [`bootstrap`] are the
//! process's ambient configuration and startup surface.

pub mod bootstrap;
pub mod config;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod logging;
pub mod message;
pub mod registry;
pub mod sequencer;
pub mod transport;
pub mod worker;
