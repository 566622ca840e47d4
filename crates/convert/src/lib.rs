//! EPUB to CBZ conversion for image-based books (comics, manga, photo books).
//!
//! The reading order comes from the package spine. Image items are taken as
//! they are; every (X)HTML item contributes the image(s) of its first image
//! element. The pages are written, unmodified and uncompressed, as
//! `00001.jpg`, `00002.png`, ... into a new archive.

pub mod error;
mod href;
mod markup;
mod package;

use crate::error::{ErrorKind, Result, output_error};
use crate::package::CONTAINER_PATH;
use exn::{OptionExt, ResultExt};
use percent_encoding::percent_decode_str;
use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::Path;
use tracing::instrument;
use unbind_book::Destination;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// File extension of converted books.
pub const CBZ_EXTENSION: &str = "cbz";
pub const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "bmp", "webp", "avif"];
pub const MARKUP_EXTENSIONS: [&str; 3] = ["xhtml", "html", "htm"];

/// Convert the EPUB at `epub` into a CBZ at `output`, returning the number
/// of pages written. Never overwrites `output`.
#[instrument(skip_all, fields(epub = %epub.display(), output = %output.display()))]
pub fn epub_to_cbz(epub: &Path, output: &Path) -> Result<usize> {
    let destination = Destination::at(output);
    if destination.path().exists() {
        exn::bail!(ErrorKind::OutputExists(output.to_path_buf()));
    }
    let file = File::open(epub).or_raise(|| ErrorKind::Archive(epub.to_path_buf()))?;
    let mut archive = ZipArchive::new(file).or_raise(|| ErrorKind::Archive(epub.to_path_buf()))?;
    let images = collect_images(&mut archive)?;

    fs::create_dir_all(destination.folder()).map_err(ErrorKind::Io)?;
    let staged = destination.staging().map_err(output_error)?;
    let mut writer = ZipWriter::new(staged.as_file());
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (index, image) in images.iter().enumerate() {
        let mut entry = archive.by_name(image).or_raise(|| ErrorKind::MissingEntry(image.clone()))?;
        writer.start_file(page_name(index + 1, image), stored).map_err(|e| ErrorKind::Io(e.into()))?;
        io::copy(&mut entry, &mut writer).map_err(ErrorKind::Io)?;
    }
    writer.finish().map_err(|e| ErrorKind::Io(e.into()))?;
    destination.commit(staged).map_err(output_error)?;
    tracing::info!(pages = images.len(), "Converted to CBZ");
    Ok(images.len())
}

/// Entry names of the page images, in reading order.
pub fn collect_images<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<String>> {
    let container = read_text(archive, CONTAINER_PATH)?;
    let package_path = package::rootfile(&container)?;
    let package_path = href::resolve("", &package_path).ok_or_raise(|| ErrorKind::NoRootfile)?;
    let package_path = entry_name(archive, &package_path)?;
    let package = package::parse_package(&read_text(archive, &package_path)?)?;
    let package_dir = href::parent(&package_path);

    let mut images = Vec::new();
    for idref in &package.spine {
        let item_href = package.manifest.get(idref).ok_or_raise(|| ErrorKind::UnknownItem(idref.clone()))?;
        let Some(item) = href::resolve(package_dir, item_href) else {
            tracing::warn!(idref = %idref, href = %item_href, "Spine item outside the archive; skipped");
            continue;
        };
        match href::extension(&item) {
            Some(ext) if is_one_of(ext, &IMAGE_EXTENSIONS) => images.push(entry_name(archive, &item)?),
            Some(ext) if is_one_of(ext, &MARKUP_EXTENSIONS) => {
                let item = entry_name(archive, &item)?;
                let references = markup::image_references(&read_text(archive, &item)?);
                if references.is_empty() {
                    tracing::warn!(item = %item, "No image in spine document");
                }
                for reference in references {
                    match href::resolve(href::parent(&item), &reference) {
                        Some(image) => images.push(entry_name(archive, &image)?),
                        None => tracing::warn!(item = %item, reference = %reference, "Unresolvable image reference"),
                    }
                }
            },
            _ => tracing::debug!(item = %item, "Spine item is neither image nor markup; skipped"),
        }
    }
    Ok(images)
}

/// `00001.jpg` for the first page, keeping the image's own extension.
fn page_name(number: usize, image: &str) -> String {
    match href::extension(image) {
        Some(ext) => format!("{number:05}.{ext}"),
        None => format!("{number:05}"),
    }
}

fn is_one_of(extension: &str, extensions: &[&str]) -> bool {
    extensions.iter().any(|known| known.eq_ignore_ascii_case(extension))
}

/// The archive's own name for `path`, trying its percent-decoded form when
/// the path as written is not an entry.
fn entry_name<R: Read + Seek>(archive: &ZipArchive<R>, path: &str) -> Result<String> {
    if archive.index_for_name(path).is_some() {
        return Ok(path.to_string());
    }
    match percent_decode_str(path).decode_utf8() {
        Ok(decoded) if archive.index_for_name(&decoded).is_some() => Ok(decoded.into_owned()),
        _ => exn::bail!(ErrorKind::MissingEntry(path.to_string())),
    }
}

fn read_text<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<String> {
    let mut entry = archive.by_name(name).or_raise(|| ErrorKind::MissingEntry(name.to_string()))?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).map_err(ErrorKind::Io)?;
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes);
    Ok(String::from_utf8_lossy(bytes).into_owned())
}
