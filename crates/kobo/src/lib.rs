//! Kobo desktop library support.
//!
//! Kobo desktop keeps purchased books in `kepub/`, named after their volume
//! id, and everything else in `Kobo.sqlite`: the local users, the book
//! metadata and a wrapped content key for every encrypted archive entry.
//!
//! Removing the DRM from a book takes three steps:
//!
//! 1. Derive the candidate user keys from the hardware network address and
//!    the local user ids ([`derive_user_keys`]).
//! 2. Look up the book's content keys ([`Database::content_keys`]).
//! 3. Rewrite the archive with every keyed entry decrypted, trying each
//!    candidate until one fits ([`remove_drm`]).
//!
//! [`Kobo`] ties these together behind the [`unbind_book::Provider`] trait.

mod db;
mod drm;
pub mod error;
mod keys;
mod provider;
#[cfg(test)]
mod test_helpers;

pub use crate::db::{ContentRecord, Database, ProtectedVolume};
pub use crate::drm::remove_drm;
pub use crate::keys::{HardwareAddress, USER_KEY_LEN, UserKey, derive_user_keys, user_keys};
pub use crate::provider::{BookKind, Kobo, KoboBook};
