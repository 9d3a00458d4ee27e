//! Query protocol — command parsing, predicate evaluation, and the
//! one-shot request/response connection handler.

pub mod parse;
pub mod predicate;
pub mod route;
