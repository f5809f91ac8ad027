use std::collections::HashSet;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::record::ID_FIELD;
use crate::fetch::{unwrap_response, ErrorKind, FetchClient, FetchError};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationMode {
    /// Each page replaces the previous one.
    #[default]
    Offset,
    /// Pages replace each other; the server hands out the continuation token.
    Cursor,
    /// Pages are appended client-side, skipping items already loaded.
    Infinite,
}

/// What the fetch function is asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    pub page: usize,
    pub page_size: usize,
    pub offset: usize,
    pub cursor: Option<String>,
}

/// One page as returned by a fetch. A bare JSON array is accepted as a page
/// with only `items`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default)]
    pub total: Option<usize>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_more: Option<bool>,
}

impl Page {
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(items) => Ok(Page {
                items,
                ..Page::default()
            }),
            Value::Object(_) => serde_json::from_value(value)
                .map_err(|e| Error::Query(format!("invalid page: {}", e))),
            other => Err(Error::Query(format!("invalid page: {}", other))),
        }
    }
}

/// Client-side pagination state for one list.
#[derive(Debug, Clone)]
pub struct Paginator {
    mode: PaginationMode,
    page: usize,
    page_size: usize,
    cursor: Option<String>,
    next_cursor: Option<String>,
    items: Vec<Value>,
    total: Option<usize>,
    has_more: bool,
}

impl Paginator {
    pub fn new(mode: PaginationMode, page_size: usize) -> Self {
        Self {
            mode,
            page: 1,
            page_size: page_size.max(1),
            cursor: None,
            next_cursor: None,
            items: Vec::new(),
            total: None,
            has_more: false,
        }
    }

    pub fn mode(&self) -> PaginationMode {
        self.mode
    }

    /// 1-based page number.
    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn offset(&self) -> usize {
        (self.page - 1) * self.page_size
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }

    pub fn total_pages(&self) -> Option<usize> {
        self.total.map(|t| t.div_ceil(self.page_size))
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn request(&self) -> PageRequest {
        PageRequest {
            page: self.page,
            page_size: self.page_size,
            offset: self.offset(),
            cursor: self.cursor.clone(),
        }
    }

    /// Cache key for the current page of the list cached under `base`.
    pub fn cache_key(&self, base: &str) -> String {
        match self.mode {
            PaginationMode::Offset => format!("{}:page:{}:size:{}", base, self.page, self.page_size),
            PaginationMode::Cursor => format!(
                "{}:cursor:{}:size:{}",
                base,
                self.cursor.as_deref().unwrap_or("start"),
                self.page_size
            ),
            PaginationMode::Infinite => format!("{}:infinite:{}:size:{}", base, self.page, self.page_size),
        }
    }

    /// Folds a fetched page into the list according to the mode.
    pub fn apply(&mut self, page: Page) {
        let received = page.items.len();
        match self.mode {
            PaginationMode::Offset => self.items = page.items,
            PaginationMode::Cursor => {
                self.items = page.items;
                self.next_cursor = page.next_cursor.clone();
            }
            PaginationMode::Infinite => {
                let mut seen: HashSet<String> = self.items.iter().map(identity).collect();
                for item in page.items {
                    if seen.insert(identity(&item)) {
                        self.items.push(item);
                    }
                }
            }
        }
        if page.total.is_some() {
            self.total = page.total;
        }
        self.has_more = match (page.has_more, self.mode) {
            (Some(more), _) => more,
            (None, PaginationMode::Cursor) => self.next_cursor.is_some(),
            (None, _) => match self.total {
                Some(total) => self.page * self.page_size < total,
                None => received == self.page_size,
            },
        };
    }

    /// Moves to the following page. Returns false when there is none.
    pub fn next_page(&mut self) -> bool {
        if !self.has_more {
            return false;
        }
        if self.mode == PaginationMode::Cursor {
            self.cursor = self.next_cursor.take();
        }
        self.page += 1;
        true
    }

    /// Moves back one page. Only offset lists can go backwards.
    pub fn prev_page(&mut self) -> bool {
        if self.mode != PaginationMode::Offset || self.page <= 1 {
            return false;
        }
        self.page -= 1;
        true
    }

    /// Jumps to `page` in an offset list.
    pub fn go_to(&mut self, page: usize) -> bool {
        if self.mode != PaginationMode::Offset || page == 0 {
            return false;
        }
        if let Some(pages) = self.total_pages() {
            if page > pages.max(1) {
                return false;
            }
        }
        self.page = page;
        true
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size.max(1);
        self.reset();
    }

    pub fn reset(&mut self) {
        self.page = 1;
        self.cursor = None;
        self.next_cursor = None;
        self.items.clear();
        self.total = None;
        self.has_more = false;
    }

    /// Loads the current page through the read cache: a fresh cached page is
    /// reused, otherwise `fetch` runs and its result is cached.
    pub async fn load<F, Fut>(&mut self, client: &FetchClient, base_key: &str, fetch: F) -> std::result::Result<(), FetchError>
    where
        F: FnOnce(PageRequest) -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let key = self.cache_key(base_key);
        let cache = client.cache();
        let ttl = client.default_ttl();

        let raw = match cache.get(&key) {
            Some(cached) if !cache.is_stale(&key, ttl) => cached,
            _ => {
                let version = cache.reserve_version();
                let value = fetch(self.request())
                    .await
                    .and_then(|v| unwrap_response(v, ErrorKind::Query))?;
                cache.set_if_newer(&key, value.clone(), ttl, version);
                value
            }
        };
        self.apply(Page::from_value(raw)?);
        Ok(())
    }
}

fn identity(item: &Value) -> String {
    match item.get(ID_FIELD) {
        Some(Value::String(id)) => format!("id:{}", id),
        Some(Value::Number(id)) => format!("id:{}", id),
        _ => serde_json::to_string(item).unwrap_or_default(),
    }
}
