//! Query parameter helpers shared by list endpoints.

use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const fn default_page() -> i64 {
    1
}

const fn default_page_size() -> i64 {
    25
}

const MAX_PAGE_SIZE: i64 = 100;

/// Common pagination parameters applied to list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, rocket::form::FromForm)]
#[serde(rename_all = "camelCase")]
pub struct PaginationParams {
    /// One-based page index (defaults to the first page).
    #[field(default = 1)]
    #[serde(default = "default_page")]
    pub page: i64,
    /// Number of items per page (clamped between 1 and 100, default 25).
    #[field(default = 25)]
    #[serde(default = "default_page_size")]
    pub size: i64,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            size: default_page_size(),
        }
    }
}

impl PaginationParams {
    pub fn page(&self) -> i64 {
        self.page.max(1)
    }

    pub fn size(&self) -> i64 {
        self.size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.size()
    }
}

/// One page of results; `has_more` is true when another page exists.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub size: i64,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Build a page from up to `size + 1` fetched rows.
    pub fn from_overfetch(mut items: Vec<T>, params: &PaginationParams) -> Self {
        let size = params.size();
        let has_more = items.len() as i64 > size;
        items.truncate(size as usize);
        Self {
            items,
            page: params.page(),
            size,
            has_more,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        let params = PaginationParams { page: 0, size: 500 };
        assert_eq!(params.page(), 1);
        assert_eq!(params.size(), MAX_PAGE_SIZE);
        assert_eq!(params.offset(), 0);

        let params = PaginationParams { page: 3, size: 10 };
        assert_eq!(params.offset(), 20);
    }

    #[test]
    fn overfetch_sets_has_more() {
        let params = PaginationParams { page: 1, size: 2 };
        let page = Page::from_overfetch(vec![1, 2, 3], &params);
        assert_eq!(page.items, vec![1, 2]);
        assert!(page.has_more);

        let page = Page::from_overfetch(vec![1], &params);
        assert!(!page.has_more);
    }
}
