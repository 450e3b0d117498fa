//! Request normalization and response reshaping.
//!
//! Everything between the HTTP boundary and the upstream call: option parsing,
//! default-language inference, upstream request building, and reshaping of
//! complete and streamed responses. All functions here are pure except the
//! stream relay, which only awaits its input.

pub mod classify;
pub mod openai_types;
pub mod options;
pub mod request;
pub mod response;
pub mod streaming;
