//! Client-side mirror of the server session.
//!
//! Keeps enough state locally (identity, completed-video snapshot, server
//! token) for a consumer to render without a round trip, and tracks its own
//! absolute expiry and inactivity window independently of the server.

pub mod cache;
pub mod clock;
pub mod probe;
pub mod storage;

pub use cache::*;
pub use clock::*;
pub use probe::*;
pub use storage::*;
