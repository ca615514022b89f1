//! HTTP clients for the managed services and the torrent clients.

mod arr_types;
mod error;
mod gate;
mod http;
mod retry;
mod service;
mod torrent;

pub use arr_types::{ArrQueuePage, ArrQueueRecord, SearchCommand};
pub use error::TransportError;
pub use gate::{GatePermit, RequestGate};
pub use http::{build_client, HttpExecutor};
pub use retry::RetryPolicy;
pub use service::{search_command, ArrClient, ServiceClient};
pub use torrent::{
    transmission_state, ClientPool, DelugeClient, QbittorrentClient, TorrentClient,
    TransmissionClient,
};
