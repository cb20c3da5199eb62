//! Page envelope returned by paged reads.

use serde::{Deserialize, Serialize};

/// One page of a filtered, ordered result set.
///
/// # Invariants
/// - `items.len() <= page_size`.
/// - `total_items` counts the filtered set before paging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub page_number: u32,
    pub page_size: u32,
    pub total_items: u64,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, page_number: u32, page_size: u32, total_items: u64) -> Self {
        Self {
            items,
            page_number,
            page_size,
            total_items,
        }
    }

    /// Empty page used when the store holds nothing for the request.
    pub fn empty(page_number: u32, page_size: u32) -> Self {
        Self::new(Vec::new(), page_number, page_size, 0)
    }

    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total_items.div_ceil(u64::from(self.page_size))
    }

    pub fn has_previous(&self) -> bool {
        self.page_number > 1
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.page_number) < self.total_pages()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Converts the items while keeping the paging metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedResult<U> {
        PagedResult {
            items: self.items.into_iter().map(f).collect(),
            page_number: self.page_number,
            page_size: self.page_size,
            total_items: self.total_items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PagedResult;

    #[test]
    fn derived_navigation_flags() {
        let first = PagedResult::new(vec![1, 2], 1, 2, 5);
        assert_eq!(first.total_pages(), 3);
        assert!(!first.has_previous());
        assert!(first.has_next());

        let last = PagedResult::new(vec![5], 3, 2, 5);
        assert!(last.has_previous());
        assert!(!last.has_next());
    }

    #[test]
    fn empty_result_has_no_pages() {
        let page: PagedResult<u8> = PagedResult::empty(1, 10);
        assert_eq!(page.total_pages(), 0);
        assert!(!page.has_next());
        assert!(page.is_empty());
    }

    #[test]
    fn map_keeps_metadata() {
        let page = PagedResult::new(vec![1, 2], 2, 2, 6).map(|value| value * 10);
        assert_eq!(page.items, vec![10, 20]);
        assert_eq!(page.page_number, 2);
        assert_eq!(page.total_items, 6);
    }
}
