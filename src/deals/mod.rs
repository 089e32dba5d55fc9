//! The deals API boundary and the client the UI layer talks to.

mod cached_client;
mod client;
mod types;

pub use cached_client::CachedDealsClient;
pub use client::{DealsApi, HttpDealsClient, RemoteError};
pub use types::{Deal, DealId};
