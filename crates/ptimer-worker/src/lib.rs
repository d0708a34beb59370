//! Ptimer Worker
//!
//! This crate provides the isolated execution context that performs codec
//! work off the caller's foreground, and the message envelopes used to talk
//! to it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐  RequestMessage   ┌──────────────────────────────┐
//! │ caller (ptimer-engine)       │ ────────────────▶ │ Worker (own OS thread)       │
//! │  - correlation ids           │                   │  - heartbeat / parse /       │
//! │  - pending-request table     │ ◀──────────────── │    compile dispatch          │
//! └──────────────────────────────┘  ResponseMessage  │  - ptimer-codec + resolver   │
//!                                                    └──────────────────────────────┘
//! ```
//!
//! Payloads cross the boundary by move: a parse request owns its
//! [`ByteStream`](ptimer_asset::ByteStream), a compile reply owns its
//! [`Bytes`](bytes::Bytes). The only shared state is the caller's
//! [`AssetResolver`](ptimer_asset::AssetResolver), which each parse and
//! compile request carries with it.
//!
//! Requests are handled concurrently; replies may arrive in any order and
//! carry the correlation id of the request they answer.

mod message;
mod worker;

pub use message::{CorrelationId, Kind, Request, RequestMessage, Response, ResponseMessage};
pub use worker::{Worker, WorkerChannels, WorkerConfig};
