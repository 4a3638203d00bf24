pub mod cursor;
pub mod entry;

pub use cursor::{GroupStart, ReadOptions, StreamBatch, StreamCursor, StreamRead};
pub use entry::{EntryId, Fields, StreamEntry};
