//! Stream utilities over reader buffers

mod batches;

pub use batches::ReadyBatches;
