//! HTTP API: router, handlers, and the wiring of stores, broker and dev worker.

pub mod app;
pub mod middleware;
