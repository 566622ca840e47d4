//! Container descriptor and package document parsing.

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;

pub(crate) const CONTAINER_PATH: &str = "META-INF/container.xml";

/// The manifest (item id to href, relative to the package document) and the
/// spine (item ids in reading order).
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Package {
    pub manifest: HashMap<String, String>,
    pub spine: Vec<String>,
}

/// The `full-path` of the first `rootfile` in `container.xml`.
pub(crate) fn rootfile(container: &str) -> Result<String> {
    let mut reader = Reader::from_str(container);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event().or_raise(|| ErrorKind::Xml("container".to_string()))? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"rootfile" => {
                return attribute(&e, b"full-path")?.ok_or_raise(|| ErrorKind::NoRootfile);
            },
            Event::Eof => exn::bail!(ErrorKind::NoRootfile),
            _ => {},
        }
    }
}

/// Parse the package document's manifest and spine.
pub(crate) fn parse_package(opf: &str) -> Result<Package> {
    let mut reader = Reader::from_str(opf);
    reader.config_mut().trim_text(true);
    let mut package = Package::default();
    loop {
        match reader.read_event().or_raise(|| ErrorKind::Xml("package".to_string()))? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"item" => {
                    if let (Some(id), Some(href)) = (attribute(&e, b"id")?, attribute(&e, b"href")?) {
                        package.manifest.insert(id, href);
                    }
                },
                b"itemref" => {
                    if let Some(idref) = attribute(&e, b"idref")? {
                        package.spine.push(idref);
                    }
                },
                _ => {},
            },
            Event::Eof => break,
            _ => {},
        }
    }
    Ok(package)
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.or_raise(|| ErrorKind::Xml(String::from_utf8_lossy(element.name().as_ref()).into_owned()))?;
        if attr.key.local_name().as_ref() == name {
            let raw = String::from_utf8_lossy(&attr.value);
            let value = unescape(&raw).or_raise(|| ErrorKind::Xml(raw.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}
