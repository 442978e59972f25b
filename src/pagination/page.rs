//! Page of listing results

use serde::{Deserialize, Serialize};

/// One page of a keyset-paginated listing.
///
/// Built once per request and never mutated afterwards. The serialized form is
/// what the read-through cache stores, so it carries everything a cache hit
/// must reproduce: items, `nextCursor`, `hasNext` and `totalCount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_next: bool,
    pub total_count: Option<i64>,
}

impl<T> Page<T> {
    pub fn new(
        items: Vec<T>,
        next_cursor: Option<String>,
        has_next: bool,
        total_count: Option<i64>,
    ) -> Self {
        Self {
            items,
            next_cursor,
            has_next,
            total_count,
        }
    }

    /// Page with no rows and no continuation.
    pub fn empty(total_count: Option<i64>) -> Self {
        Self::new(Vec::new(), None, false, total_count)
    }

    /// Number of items on this page.
    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_serializes_camel_case() {
        let page = Page::new(vec![1, 2], Some("abc".to_string()), true, Some(10));
        let json = serde_json::to_value(&page).unwrap();

        assert_eq!(json["nextCursor"], "abc");
        assert_eq!(json["hasNext"], true);
        assert_eq!(json["totalCount"], 10);
        assert_eq!(json["items"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_empty_page_keeps_null_cursor() {
        let page: Page<u32> = Page::empty(Some(0));
        let bytes = serde_json::to_vec(&page).unwrap();
        let back: Page<u32> = serde_json::from_slice(&bytes).unwrap();

        assert!(back.is_empty());
        assert_eq!(back.next_cursor, None);
        assert!(!back.has_next);
        assert_eq!(back.total_count, Some(0));
    }
}
