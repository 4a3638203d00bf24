pub mod stream_log;

pub use stream_log::StreamLogClient;
