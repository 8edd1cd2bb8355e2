//! Wire protocol: request tokenizing and response packing

pub mod response;
pub mod tokenizer;

pub use response::{ClientId, Code, Response, ResponseSink, BROADCAST, NOREQUEST};
pub use tokenizer::Tokenizer;
