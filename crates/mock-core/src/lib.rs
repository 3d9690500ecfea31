//! Core library for the mock server: the `.http` spec parser, the runtime
//! endpoint model and the `{{…}}` substitution engine.
//!
//! The flow is: spec bytes → [`parse::Parser`] → records + globals →
//! [`endpoint::merge`] → endpoints. The serving layer dispatches requests to
//! [`endpoint::Endpoint::respond`], which applies delays and substitution.

pub mod endpoint;
pub mod fake;
pub mod parse;
pub mod substitute;

pub use endpoint::{merge, parse_query, Endpoint, MockResponse, RequestInfo};
pub use parse::{
    endpoints_from_file, endpoints_from_reader, format_duration, parse_duration, ParseError,
    Parser, Record,
};
