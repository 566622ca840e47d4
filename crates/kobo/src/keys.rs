//! User key derivation.
//!
//! Kobo desktop wraps every content key with a user key derived from the
//! machine's hardware network address and the local user id. The derivation
//! has changed between releases, so every known salt is tried.

use crate::db::Database;
use crate::error::{ErrorKind, Result};
use exn::OptionExt;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use tracing::instrument;

/// Salts of the known derivation variants, newest last.
const HASH_KEYS: [&str; 4] = ["88b3a2e13", "XzUhGYdFp", "NoCanLook", "QJhwzAtXL"];
pub const USER_KEY_LEN: usize = 16;

/// A raw AES-128 user key.
pub type UserKey = [u8; USER_KEY_LEN];

/// A 6-byte hardware network address, rendered `AA:BB:CC:DD:EE:FF`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HardwareAddress([u8; 6]);
impl HardwareAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// The address of this machine's primary network interface.
    pub fn detect() -> Result<Self> {
        let address = mac_address::get_mac_address()
            .ok()
            .flatten()
            .ok_or_raise(|| ErrorKind::IdentityUnavailable)?;
        Ok(Self(address.bytes()))
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }
}
impl FromStr for HardwareAddress {
    type Err = crate::error::Error;

    /// Accepts six hex pairs separated by `:` or `-`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ErrorKind::InvalidHardwareAddress(s.to_string());
        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split([':', '-']);
        for byte in &mut bytes {
            let part = parts.next().ok_or_raise(invalid)?;
            if part.len() != 2 {
                exn::bail!(invalid());
            }
            *byte = u8::from_str_radix(part, 16).ok().ok_or_raise(invalid)?;
        }
        if parts.next().is_some() {
            exn::bail!(invalid());
        }
        Ok(Self(bytes))
    }
}
impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Every candidate user key for the users in `db`, see [`derive_user_keys`].
#[instrument(skip_all)]
pub fn user_keys(db: &Database, address: &HardwareAddress) -> Result<Vec<UserKey>> {
    let user_ids = db.user_ids()?;
    let keys = derive_user_keys(address, &user_ids);
    tracing::debug!(users = user_ids.len(), candidates = keys.len(), "Derived user keys");
    Ok(keys)
}

/// Candidate keys, salts outer and users inner.
///
/// The device id is the lower-case hex SHA-256 of salt and rendered address;
/// a user key is the second half of the SHA-256 of device id and user id.
/// The address is hashed as rendered, colons included (`AA:BB:CC:DD:EE:FF`).
pub fn derive_user_keys(address: &HardwareAddress, user_ids: &[String]) -> Vec<UserKey> {
    let address = address.to_string();
    let mut keys = Vec::with_capacity(HASH_KEYS.len() * user_ids.len());
    for salt in HASH_KEYS {
        let device_id = hex(&Sha256::digest(format!("{salt}{address}")));
        for user_id in user_ids {
            let digest = Sha256::digest(format!("{device_id}{user_id}"));
            let mut key = [0u8; USER_KEY_LEN];
            key.copy_from_slice(&digest[USER_KEY_LEN..]);
            keys.push(key);
        }
    }
    keys
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
