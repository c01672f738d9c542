//! Message reconciliation and live-sync engine.
//!
//! Three sources feed one conversation: the optimistic local echo, the record
//! returned by the send request, and the live event stream. The
//! [`ReconciliationStore`] decides for each inbound message whether to render
//! it, merge it into a pending placeholder or drop it, while the [`SendGate`]
//! keeps at most one exchange in flight.

pub mod config;
pub mod conversation;
pub mod error;
pub mod gate;
pub mod identity;
pub mod session;
pub mod sink;
pub mod sse;
pub mod store;
pub mod stream;
pub mod transport;

pub use config::*;
pub use conversation::*;
pub use error::*;
pub use gate::*;
pub use identity::*;
pub use session::*;
pub use sink::*;
pub use store::*;
pub use stream::*;
pub use transport::*;
