//! Title lookup from the Palm database / MOBI header of a Kindle book.

use crate::error::{ErrorKind, Result};
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::instrument;
use unbind_book::full_to_half;

const PDB_NAME_LEN: usize = 32;
const PDB_RECORD_COUNT: usize = 76;
const PDB_HEADER_LEN: usize = 78;
const PDB_RECORD_INFO_LEN: usize = 8;

/// Offsets within record 0.
const MOBI_MAGIC: &[u8; 4] = b"MOBI";
const MOBI_MAGIC_OFFSET: usize = 16;
const MOBI_CODEPAGE: usize = 28;
const MOBI_TITLE_OFFSET: usize = 0x54;
const MOBI_TITLE_LEN: usize = 0x58;
const CODEPAGE_UTF8: u32 = 65001;
/// Record 0 holds the MOBI and EXTH headers and the full name; nothing a
/// title lookup needs is further in.
const MAX_RECORD0_LEN: u64 = 1 << 20;

/// The book's full-width normalized title: the MOBI full name, or the Palm
/// database name for files without a MOBI header. `None` when both are empty.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn read_title(path: &Path) -> Result<Option<String>> {
    let mut file = File::open(path).map_err(ErrorKind::Io)?;
    let mut header = [0u8; PDB_HEADER_LEN + 2 * PDB_RECORD_INFO_LEN];
    let header_len = read_up_to(&mut file, &mut header)?;
    if header_len < PDB_HEADER_LEN + PDB_RECORD_INFO_LEN {
        exn::bail!(ErrorKind::InvalidHeader("truncated database header"));
    }
    let pdb_name = &header[..PDB_NAME_LEN];
    let pdb_name = &pdb_name[..pdb_name.iter().position(|&b| b == 0).unwrap_or(PDB_NAME_LEN)];
    if u16_at(&header, PDB_RECORD_COUNT) == 0 {
        exn::bail!(ErrorKind::InvalidHeader("no records"));
    }

    let record0_start = u64::from(u32_at(&header, PDB_HEADER_LEN));
    let file_len = file.metadata().map_err(ErrorKind::Io)?.len();
    let record0_end = if u16_at(&header, PDB_RECORD_COUNT) > 1 && header_len == header.len() {
        u64::from(u32_at(&header, PDB_HEADER_LEN + PDB_RECORD_INFO_LEN))
    } else {
        file_len
    };
    if record0_start >= record0_end || record0_end > file_len {
        exn::bail!(ErrorKind::InvalidHeader("record 0 out of bounds"));
    }
    let mut record0 = vec![0u8; (record0_end - record0_start).min(MAX_RECORD0_LEN) as usize];
    file.seek(SeekFrom::Start(record0_start)).map_err(ErrorKind::Io)?;
    file.read_exact(&mut record0).map_err(ErrorKind::Io)?;

    let title = mobi_full_name(&record0).unwrap_or_else(|| WINDOWS_1252.decode(pdb_name).0.into_owned());
    let title = full_to_half(title.trim());
    Ok(if title.is_empty() { None } else { Some(title) })
}

/// The full name from a MOBI header, decoded per its code page.
fn mobi_full_name(record0: &[u8]) -> Option<String> {
    if record0.len() < MOBI_TITLE_LEN + 4 || &record0[MOBI_MAGIC_OFFSET..MOBI_MAGIC_OFFSET + 4] != MOBI_MAGIC {
        return None;
    }
    let start = u32_at(record0, MOBI_TITLE_OFFSET) as usize;
    let len = u32_at(record0, MOBI_TITLE_LEN) as usize;
    let name = record0.get(start..start.checked_add(len)?)?;
    if name.is_empty() {
        return None;
    }
    let encoding: &Encoding = if u32_at(record0, MOBI_CODEPAGE) == CODEPAGE_UTF8 { UTF_8 } else { WINDOWS_1252 };
    Some(encoding.decode_without_bom_handling(name).0.into_owned())
}

fn read_up_to(file: &mut File, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match file.read(&mut buffer[filled..]).map_err(ErrorKind::Io)? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}
