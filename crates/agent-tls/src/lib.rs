//! Mutually authenticated TLS client for replication agents.
//!
//! Connections are dialed per use: the factory resolves the instance
//! address, pins the TLS server name to the instance's stable hostname, and
//! speaks length-prefixed CBOR frames over the resulting stream.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod codec;
mod connection;
mod error;
mod factory;
mod reloader;
mod resolver;

pub use codec::MAX_FRAME_SIZE;
pub use connection::TlsAgentConnection;
pub use error::ReloadError;
pub use factory::{TlsAgentFactory, TlsFactoryConfig};
pub use reloader::{IdentityPaths, Reloader};
pub use resolver::{DnsResolver, Resolver, StaticResolver};
