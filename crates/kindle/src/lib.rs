//! Kindle content folder support.
//!
//! Decryption and unpacking are delegated to external tools behind the
//! [`DrmService`] and [`UnpackService`] traits; [`CommandDrm`] and
//! [`CommandUnpack`] run them as configured command lines. This crate finds
//! the books, reads their titles from the file header, and moves the
//! unpacked e-book into place.

pub mod error;
mod header;
mod provider;
mod service;

pub use crate::header::read_title;
pub use crate::provider::{Kindle, KindleBook};
pub use crate::service::{CommandDrm, CommandTemplate, CommandUnpack, DrmService, Status, UnpackService};
