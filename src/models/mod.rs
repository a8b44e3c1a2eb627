//! Domain models for the free entry claimer.
//!
//! # Core Concepts
//!
//! ## Persisted
//!
//! - [`CursorState`]: position in the remote change stream plus the cache of
//!   [`Classification`]s derived for catalog entries.
//! - [`ClaimRecord`]: journal of what each account decided for each entry.
//!
//! ## Transient
//!
//! - [`ChangeBatch`] / [`EntryChange`]: what the change stream delivers.
//! - [`EntryMetadata`]: looked up per changed entry, never stored in full.
//! - [`ClassifiedEntry`]: a claimable entry fanned out to every account.
//! - [`AccountSettings`] / [`AccountStatus`]: per-account configuration and
//!   state, rebuilt on every reconnect.

mod account;
mod claim;
mod cursor;
mod entry;
mod filter;

pub use account::*;
pub use claim::*;
pub use cursor::*;
pub use entry::*;
pub use filter::*;
