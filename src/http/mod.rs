//! HTTP/1.x wire format: headers, request/response types, and the parser.

mod headers;
mod message;
mod parser;

pub use headers::HeaderList;
pub use message::{reason_phrase, Method, Request, Response, Version};
pub use parser::{Parser, ParserCallbacks};
