//! Rust library to synchronize emails between a local store and a
//! remote server.
//!
//! The main purpose of this library is to keep two mailboxes
//! consistent, offline-first: the local store (Maildir-like) and the
//! remote server (IMAP-like) can both be modified independently, and
//! each synchronization cycle brings them back in agreement.
//!
//! A cycle computes a three-way diff between the last agreed state
//! (the [`SyncBase`](crate::state::SyncBase)) and the current
//! envelopes of both sides, resolves conflicts with a
//! last-writer-wins policy, applies the resulting
//! [`SyncPatch`](crate::sync::SyncPatch) through the
//! [`Backend`](crate::backend::Backend) capabilities, then commits
//! the next base atomically.
//!
//! See the [`sync`] module to get started, and examples in the
//! /mailsync-tests folder.
//!
//! ## Backend capabilities
//!
//! - [`ListEnvelopes`](crate::backend::ListEnvelopes)
//! - [`FetchContent`](crate::backend::FetchContent)
//! - [`CreateMessage`](crate::backend::CreateMessage)
//! - [`DeleteMessage`](crate::backend::DeleteMessage)
//! - [`SetFlags`](crate::backend::SetFlags)
//!
//! ## State stores
//!
//! - [`FileStateStore`](crate::state::file::FileStateStore)
//! - [`MemoryStateStore`](crate::state::memory::MemoryStateStore)

pub mod backend;
pub mod envelope;
mod error;
pub mod flag;
pub mod state;
pub mod sync;

#[doc(inline)]
pub use error::{AnyBoxedError, AnyError, AnyResult};
