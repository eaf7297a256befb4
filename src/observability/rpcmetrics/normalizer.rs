//! Operation name normalization for metric labels.
//!
//! Names are split on `/`. Each segment has characters outside
//! `[A-Za-z0-9_-]` replaced, and segments that look like identifiers
//! (numbers, UUIDs, long hex strings) collapse to [`ID_PLACEHOLDER`].
//! The result is a fixed point: normalizing it again changes nothing.

/// Placeholder for high-cardinality path segments.
pub const ID_PLACEHOLDER: &str = "{id}";

/// Maps raw operation names to bounded-cardinality labels.
pub trait NameNormalizer: Send + Sync {
    fn normalize(&self, name: &str) -> String;
}

/// Character-set based normalizer with identifier collapsing.
#[derive(Debug, Clone, Copy)]
pub struct SimpleNameNormalizer {
    /// Substitute for characters outside the safe set.
    pub replacement: char,
}

impl Default for SimpleNameNormalizer {
    fn default() -> Self {
        Self { replacement: '-' }
    }
}

impl NameNormalizer for SimpleNameNormalizer {
    fn normalize(&self, name: &str) -> String {
        name.split('/')
            .map(|segment| self.normalize_segment(segment))
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl SimpleNameNormalizer {
    fn normalize_segment(&self, segment: &str) -> String {
        if segment == ID_PLACEHOLDER {
            return segment.to_string();
        }
        let replacement = if is_safe(self.replacement) {
            self.replacement
        } else {
            '-'
        };
        let sanitized: String = segment
            .chars()
            .map(|c| if is_safe(c) { c } else { replacement })
            .collect();
        if is_identifier(&sanitized) {
            ID_PLACEHOLDER.to_string()
        } else {
            sanitized
        }
    }
}

/// Normalize with the default normalizer.
pub fn normalize(name: &str) -> String {
    SimpleNameNormalizer::default().normalize(name)
}

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn is_identifier(segment: &str) -> bool {
    is_number(segment) || is_uuid(segment) || is_long_hex(segment)
}

fn is_number(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn is_uuid(segment: &str) -> bool {
    segment.len() == 36
        && segment.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

fn is_long_hex(segment: &str) -> bool {
    segment.len() >= 16
        && segment.bytes().all(|b| b.is_ascii_hexdigit())
        && segment.bytes().any(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &[(&str, &str)] = &[
        ("/books", "/books"),
        ("/book/42", "/book/{id}"),
        ("/book/{id}", "/book/{id}"),
        ("HTTP GET /books/17", "HTTP-GET-/books/{id}"),
        ("SQL SELECT", "SQL-SELECT"),
        (
            "/sessions/0190a5c4-1f7e-7c3a-9b1e-2f4d6a8c0e12/books",
            "/sessions/{id}/books",
        ),
        ("/trace/4bf92f3577b34da6a3ce929d0e0e4736", "/trace/{id}"),
        ("/book?book=3", "/book-book-3"),
        ("lock wait", "lock-wait"),
        ("/deadbeef", "/deadbeef"),
        ("", ""),
        ("/", "/"),
    ];

    #[test]
    fn test_corpus() {
        for (raw, expected) in CORPUS {
            assert_eq!(normalize(raw), *expected, "normalizing {raw:?}");
        }
    }

    #[test]
    fn test_idempotent() {
        for (raw, _) in CORPUS {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "re-normalizing {raw:?}");
        }
    }

    #[test]
    fn test_custom_replacement() {
        let normalizer = SimpleNameNormalizer { replacement: '_' };
        assert_eq!(normalizer.normalize("SQL SELECT /book/9"), "SQL_SELECT_/book/{id}");
    }

    #[test]
    fn test_unsafe_replacement_falls_back() {
        let normalizer = SimpleNameNormalizer { replacement: '/' };
        let once = normalizer.normalize("a b");
        assert_eq!(once, "a-b");
        assert_eq!(normalizer.normalize(&once), once);
    }

    #[test]
    fn test_non_ascii_is_replaced() {
        assert_eq!(normalize("/bücher/7"), "/b-cher/{id}");
    }
}
