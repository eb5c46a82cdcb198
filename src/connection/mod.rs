//! Connections to acquisition devices

pub mod reader;

pub use reader::StreamReader;
