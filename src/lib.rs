//! OIDP authorization server core library crate.
//!
//! Provides OAuth 2.0 / OpenID Connect authorization server functionality:
//! token strategies, the request pipeline, flow handlers, and the
//! login/consent negotiation state machines.

pub mod config;
pub mod errors;
pub mod http;
pub mod oidc;
pub mod storage;
