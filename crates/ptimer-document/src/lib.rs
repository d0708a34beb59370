//! Ptimer Document
//!
//! This crate contains the in-memory representation of a `.ptimer` container:
//! a [`Document`] made of one [`Metadata`] record, an ordered list of
//! [`Step`]s and the [`Asset`]s those steps point at.
//!
//! Documents are plain values. The codec turns them into container bytes and
//! back; editors mutate them in place. Asset payloads are never held here
//! directly: each [`Asset`] carries an [`AssetRef`](ptimer_asset::AssetRef)
//! that the session's resolver can dereference.

mod document;
mod validate;

pub use document::{Asset, CONTAINER_MIME, Document, Metadata, SUPPORTED_VERSION, Step};
pub use validate::NotEncodable;
