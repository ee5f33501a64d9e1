// Streaming data ingestion: one public market feed per venue plus the
// authenticated private feed. All of them share the same reconnect-forever
// connection loop and write into SharedState.

pub mod book;
pub mod market;
pub mod messages;
pub mod private;
