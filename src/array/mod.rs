//! FlashArray REST client
//!
//! The only component that speaks HTTP. Splits into transport
//! ([`client`]), version negotiation ([`version`]), session caching
//! ([`session`]), typed records ([`types`]), and per-resource operations
//! ([`ops`]). Everything above this module sees one dialect-free API.

pub mod client;
pub mod ops;
pub mod session;
pub mod types;
pub mod version;

pub use client::{ArrayClient, ArrayClientConfig};
pub use types::{
    ArrayInfo, ArrayPort, ArraySnapshot, ArraySpace, ArrayVolume, ConnectionRecord,
    HostGroupRecord, HostRecord, PodInfo,
};
pub use version::ApiVersion;
