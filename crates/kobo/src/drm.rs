//! Kepub DRM removal.
//!
//! A kepub is a ZIP archive in which some entries are AES-128-ECB encrypted
//! with their own content key. Each content key is itself wrapped (AES-128-ECB,
//! no padding) with the user key. Removing the DRM means rewriting the archive
//! with those entries decrypted and PKCS#7-unpadded; every other entry is
//! copied as-is.

use crate::error::{ErrorKind, Result, output_error};
use crate::keys::UserKey;
use aes::Aes128;
use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, KeyInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use exn::ResultExt;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::instrument;
use unbind_book::Destination;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

type Aes128EcbDec = ecb::Decryptor<Aes128>;

const CONTENT_KEY_LEN: usize = 16;

/// Outcome of trying one user key against a whole archive.
enum Attempt {
    Decrypted(NamedTempFile),
    WrongKey,
}

/// Why an entry could not be decrypted with a candidate key. Any of these
/// rejects the candidate; none of them is an error on its own.
#[derive(Debug)]
enum Rejection {
    WrappedKeyEncoding,
    WrappedKeyLength,
    ContentKeyLength,
    Padding,
}

/// Decrypt `source` into `destination`, trying each candidate user key in
/// turn until one decrypts every keyed entry.
///
/// With no content keys the book is copied verbatim.
#[instrument(skip_all, fields(
    volume = %volume_id,
    source = %source.display(),
    candidates = user_keys.len(),
    keyed = content_keys.len(),
))]
pub fn remove_drm(
    source: &Path,
    destination: &Destination,
    volume_id: &str,
    user_keys: &[UserKey],
    content_keys: &HashMap<String, String>,
) -> Result<PathBuf> {
    if content_keys.is_empty() {
        tracing::debug!("No content keys; copying verbatim");
        return destination.copy_from(source).map_err(output_error);
    }
    let archive_error = || ErrorKind::Archive(source.display().to_string());
    let file = File::open(source).or_raise(archive_error)?;
    let mut archive = ZipArchive::new(file).or_raise(archive_error)?;
    for (candidate, user_key) in user_keys.iter().enumerate() {
        match attempt(&mut archive, source, destination, user_key, content_keys)? {
            Attempt::Decrypted(staged) => {
                let path = destination.commit(staged).map_err(output_error)?;
                tracing::info!(candidate, path = %path.display(), "Book decrypted");
                return Ok(path);
            },
            Attempt::WrongKey => tracing::debug!(candidate, "User key rejected"),
        }
    }
    exn::bail!(ErrorKind::DecryptionFailed(volume_id.to_string()))
}

/// Rewrite the whole archive into a staging file with one user key.
fn attempt<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    source: &Path,
    destination: &Destination,
    user_key: &UserKey,
    content_keys: &HashMap<String, String>,
) -> Result<Attempt> {
    let archive_error = || ErrorKind::Archive(source.display().to_string());
    let staged = destination.staging().map_err(output_error)?;
    let mut writer = ZipWriter::new(staged.as_file());
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for index in 0..archive.len() {
        let name = archive.by_index_raw(index).or_raise(archive_error)?.name().to_string();
        match content_keys.get(&name) {
            Some(wrapped) => {
                let mut encrypted = Vec::new();
                archive
                    .by_index(index)
                    .or_raise(archive_error)?
                    .read_to_end(&mut encrypted)
                    .or_raise(archive_error)?;
                let plain = match decrypt_entry(&encrypted, wrapped, user_key) {
                    Ok(plain) => plain,
                    Err(rejection) => {
                        tracing::trace!(entry = %name, ?rejection, "Entry did not decrypt");
                        return Ok(Attempt::WrongKey);
                    },
                };
                writer.start_file(name.as_str(), deflated).or_raise(archive_error)?;
                writer.write_all(&plain).or_raise(archive_error)?;
            },
            None => {
                let entry = archive.by_index_raw(index).or_raise(archive_error)?;
                writer.raw_copy_file(entry).or_raise(archive_error)?;
            },
        }
    }
    writer.finish().or_raise(archive_error)?;
    Ok(Attempt::Decrypted(staged))
}

/// Unwrap the content key with the user key, then decrypt and unpad the entry.
fn decrypt_entry(encrypted: &[u8], wrapped: &str, user_key: &UserKey) -> std::result::Result<Vec<u8>, Rejection> {
    let wrapped = STANDARD.decode(wrapped.trim()).map_err(|_| Rejection::WrappedKeyEncoding)?;
    let content_key = Aes128EcbDec::new_from_slice(user_key)
        .map_err(|_| Rejection::WrappedKeyLength)?
        .decrypt_padded_vec_mut::<NoPadding>(&wrapped)
        .map_err(|_| Rejection::WrappedKeyLength)?;
    if content_key.len() != CONTENT_KEY_LEN {
        return Err(Rejection::ContentKeyLength);
    }
    Aes128EcbDec::new_from_slice(&content_key)
        .map_err(|_| Rejection::ContentKeyLength)?
        .decrypt_padded_vec_mut::<Pkcs7>(encrypted)
        .map_err(|_| Rejection::Padding)
}
