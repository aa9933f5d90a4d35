//! HTTP surface: the signal delivery hook and the demo application.

pub mod app;
pub mod middleware;
