//! HTTP implementation of the task service consumed by the load engine.

mod http;
mod wire;

pub use http::HttpTaskService;
