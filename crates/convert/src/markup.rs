//! Page image lookup in (X)HTML spine documents.

use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

macro_rules! selector {
    ($name:ident, $css:expr) => {
        static $name: LazyLock<Selector> = LazyLock::new(|| Selector::parse($css).unwrap());
    };
}

// SVG wrapper pages (`<svg><image xlink:href="..."/></svg>`) take precedence
// over plain `<img>` pages.
selector!(SVG_IMAGE_SELECTOR, "image");
selector!(IMG_SELECTOR, "img");

/// Image references of the page's first image element: the first `image`
/// in the document, else the first `img`. The link attribute (`xlink:href`,
/// or SVG 2 `href`) is read before `src`; each whitespace-separated token is
/// one reference.
pub(crate) fn image_references(markup: &str) -> Vec<String> {
    let document = Html::parse_document(markup);
    let Some(element) = document
        .select(&SVG_IMAGE_SELECTOR)
        .next()
        .or_else(|| document.select(&IMG_SELECTOR).next())
    else {
        return Vec::new();
    };
    match link(element) {
        Some(value) => value.split_whitespace().map(str::to_string).collect(),
        None => Vec::new(),
    }
}

fn link<'a>(element: ElementRef<'a>) -> Option<&'a str> {
    let value = element.value();
    // Inside `<svg>` the parser stores `xlink:href` under its local name
    // `href`; elsewhere it keeps the literal `xlink:href`.
    value
        .attrs()
        .find(|(name, _)| matches!(*name, "href" | "xlink:href"))
        .map(|(_, link)| link)
        .or_else(|| value.attr("src"))
}
