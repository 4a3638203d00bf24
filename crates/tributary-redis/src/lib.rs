//! Redis Streams transport for tributary
//!
//! Implements `StreamLogClient` on top of the `redis` crate:
//! - `XGROUP CREATE ... MKSTREAM` / `XINFO GROUPS` for group administration
//! - `XREADGROUP` with `BLOCK` and `COUNT` for group reads
//! - `XACK` and `XADD *` for acknowledgment and appends
//!
//! Each `RedisStreamLog` owns one multiplexed connection; `duplicate` opens a
//! fresh one so blocking reads never queue in front of acknowledgments.

mod convert;
mod store;

pub use store::RedisStreamLog;
