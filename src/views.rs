//! Read-side helpers shared by the list handlers. Pagination is
//! 1-indexed; a page past the end yields an empty slice, never an
//! error, since this is a display-only concern.

pub const DEFAULT_PAGE_SIZE: usize = 10;

pub fn page_count(total: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(page_size)
}

pub fn page_slice<T>(items: &[T], page_size: usize, page: usize) -> &[T] {
    if page_size == 0 || page == 0 {
        return &[];
    }
    let start = (page - 1).saturating_mul(page_size);
    if start >= items.len() {
        return &[];
    }
    let end = (start + page_size).min(items.len());
    &items[start..end]
}

/// Case-insensitive substring match against name and email; an empty
/// query matches everything.
pub fn matches_search(name: &str, email: &str, query: &str) -> bool {
    if query.is_empty() {
        return true;
    }
    let q = query.to_lowercase();
    name.to_lowercase().contains(&q) || email.to_lowercase().contains(&q)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_one_returns_leading_items() {
        let items: Vec<i32> = (0..23).collect();
        assert_eq!(page_slice(&items, 10, 1), &items[0..10]);
        assert_eq!(page_slice(&items, 10, 3), &items[20..23]);
        assert_eq!(page_count(23, 10), 3);
    }

    #[test]
    fn short_collections_fit_on_page_one() {
        let items: Vec<i32> = (0..4).collect();
        assert_eq!(page_slice(&items, 10, 1), &items[..]);
        assert_eq!(page_count(4, 10), 1);
        assert_eq!(page_count(0, 10), 0);
    }

    #[test]
    fn out_of_range_pages_are_empty_not_errors() {
        let items: Vec<i32> = (0..23).collect();
        assert!(page_slice(&items, 10, 4).is_empty());
        assert!(page_slice(&items, 10, 100).is_empty());
        assert!(page_slice(&items, 10, 0).is_empty());
        assert!(page_slice(&items, 0, 1).is_empty());
        let empty: Vec<i32> = Vec::new();
        assert!(page_slice(&empty, 10, 1).is_empty());
    }

    #[test]
    fn search_is_case_insensitive_over_name_and_email() {
        assert!(matches_search("Olivia Brown", "olivia.brown@school.edu", "BROWN"));
        assert!(matches_search("Olivia Brown", "olivia.brown@school.edu", "school.edu"));
        assert!(matches_search("Olivia Brown", "olivia.brown@school.edu", ""));
        assert!(!matches_search("Olivia Brown", "olivia.brown@school.edu", "smith"));
    }
}
