//! Mirage: an HTTP mock engine.
//!
//! A request is resolved to a configured resource, checked against the
//! applicable security policy, turned into a response behaviour (optionally
//! by a Rhai or Lua script) and dispatched.

pub mod behaviour;
pub mod config;
pub mod dispatch;
pub mod pipeline;
pub mod request;
pub mod resolver;
pub mod scripting;
pub mod security;
pub mod server;
