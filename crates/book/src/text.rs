//! Title normalization and ordering.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::CharIndices;

const IDEOGRAPHIC_SPACE: char = '\u{3000}';
/// Full-width `０` through `～`, the block mapped onto ASCII `0` through `~`.
const FULLWIDTH_START: u32 = 0xFF10;
const FULLWIDTH_END: u32 = 0xFF5E;
const FULLWIDTH_OFFSET: u32 = 0xFEE0;

/// Replaces full-width digits, letters and punctuation (and the ideographic
/// space) with their standard-width ASCII equivalents.
///
/// ```
/// use unbind_book::full_to_half;
/// assert_eq!(full_to_half("１２３　ＡＢＣ"), "123 ABC");
/// assert_eq!(full_to_half("第１０巻"), "第10巻");
/// ```
pub fn full_to_half(text: &str) -> String {
    text.chars()
        .map(|c| match c as u32 {
            _ if c == IDEOGRAPHIC_SPACE => ' ',
            code @ FULLWIDTH_START..=FULLWIDTH_END => char::from_u32(code - FULLWIDTH_OFFSET).unwrap_or(c),
            _ => c,
        })
        .collect()
}

/// Compares two strings in natural order: runs of ASCII digits are compared
/// by numeric value, everything else character by character.
///
/// ```
/// use std::cmp::Ordering;
/// use unbind_book::natural_cmp;
/// assert_eq!(natural_cmp("Chapter 2", "Chapter 10"), Ordering::Less);
/// assert_eq!(natural_cmp("Vol 010", "Vol 9"), Ordering::Greater);
/// ```
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = Chunks::new(a);
    let mut right = Chunks::new(b);
    loop {
        let ordering = match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(Chunk::Number(x)), Some(Chunk::Number(y))) => compare_numbers(x, y),
            (Some(Chunk::Number(_)), Some(Chunk::Text(_))) => Ordering::Less,
            (Some(Chunk::Text(_)), Some(Chunk::Number(_))) => Ordering::Greater,
            (Some(Chunk::Text(x)), Some(Chunk::Text(y))) => x.cmp(y),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
}

/// Stable natural-order sort by a string key.
pub fn natural_sort_by_key<T, K>(items: &mut [T], mut key: K)
where
    K: FnMut(&T) -> &str,
{
    items.sort_by(|a, b| natural_cmp(key(a), key(b)));
}

/// Digit runs are compared by magnitude (significant digits), then by value,
/// and finally the run with fewer leading zeros sorts first.
fn compare_numbers(x: &str, y: &str) -> Ordering {
    let x_significant = x.trim_start_matches('0');
    let y_significant = y.trim_start_matches('0');
    x_significant
        .len()
        .cmp(&y_significant.len())
        .then_with(|| x_significant.cmp(y_significant))
        .then_with(|| x.len().cmp(&y.len()))
}

#[derive(Debug, PartialEq, Eq)]
enum Chunk<'a> {
    Number(&'a str),
    Text(&'a str),
}

struct Chunks<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
}
impl<'a> Chunks<'a> {
    fn new(source: &'a str) -> Self {
        Self { source, chars: source.char_indices().peekable() }
    }
}
impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (start, first) = self.chars.next()?;
        let numeric = first.is_ascii_digit();
        let mut end = start + first.len_utf8();
        while let Some(&(index, c)) = self.chars.peek()
            && c.is_ascii_digit() == numeric
        {
            end = index + c.len_utf8();
            self.chars.next();
        }
        let run = &self.source[start..end];
        Some(if numeric { Chunk::Number(run) } else { Chunk::Text(run) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("１２３　ＡＢＣ", "123 ABC")]
    #[case("ｈｅｌｌｏ！", "hello！")]
    #[case("（上）", "（上）")]
    #[case("Ａ～Ｚ", "A~Z")]
    #[case("plain ascii 42", "plain ascii 42")]
    #[case("", "")]
    fn test_full_to_half(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(full_to_half(input), expected);
    }

    #[test]
    fn test_full_to_half_block_edges() {
        assert_eq!(full_to_half("\u{FF10}"), "0");
        assert_eq!(full_to_half("\u{FF5E}"), "~");
        // Just outside the mapped block.
        assert_eq!(full_to_half("\u{FF0F}"), "\u{FF0F}");
        assert_eq!(full_to_half("\u{FF5F}"), "\u{FF5F}");
        // Half-width katakana stay as they are.
        assert_eq!(full_to_half("ｦｧ"), "ｦｧ");
    }

    #[test]
    fn test_natural_sort() {
        let mut titles = vec!["Vol 2", "Vol 10", "Vol 1"];
        natural_sort_by_key(&mut titles, |t| *t);
        assert_eq!(titles, vec!["Vol 1", "Vol 2", "Vol 10"]);
    }

    #[rstest]
    #[case("Chapter 2", "Chapter 10", Ordering::Less)]
    #[case("Chapter 10", "Chapter 2", Ordering::Greater)]
    #[case("a", "a", Ordering::Equal)]
    #[case("a", "a1", Ordering::Less)]
    #[case("2", "a", Ordering::Less)]
    #[case("file007", "file7", Ordering::Greater)]
    #[case("file07", "file8", Ordering::Less)]
    #[case("x99999999999999999999999", "x100000000000000000000000", Ordering::Less)]
    #[case("B", "a", Ordering::Less)]
    #[case("巻2", "巻10", Ordering::Less)]
    fn test_natural_cmp(#[case] a: &str, #[case] b: &str, #[case] expected: Ordering) {
        assert_eq!(natural_cmp(a, b), expected);
    }

    #[test]
    fn test_natural_sort_is_stable() {
        let mut books = vec![("Vol 1", 'b'), ("Vol 01", 'x'), ("Vol 1", 'a')];
        natural_sort_by_key(&mut books, |b| b.0);
        assert_eq!(books, vec![("Vol 1", 'b'), ("Vol 1", 'a'), ("Vol 01", 'x')]);
    }

    #[test]
    fn test_chunks() {
        let chunks: Vec<_> = Chunks::new("ab12c").collect();
        assert_eq!(chunks, vec![Chunk::Text("ab"), Chunk::Number("12"), Chunk::Text("c")]);
    }
}
