// Paginated record list
//
// `Paginator` is the pure page-window state; `RecordList` binds it to `RecordApi::list_records`.
// Reads retry transient failures; deletes are never retried.

use crate::api::{ApiError, RecordApi};
use crate::models::{Record, RecordId, RecordPage};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageWindow {
    /// 1-based.
    pub page_number: u64,
    pub page_size: u32,
    pub total_items: u64,
}

impl PageWindow {
    pub fn total_pages(&self) -> u64 {
        self.total_items.div_ceil(u64::from(self.page_size))
    }

    /// Highest page the window may show. An empty list still has page 1.
    pub fn last_page(&self) -> u64 {
        self.total_pages().max(1)
    }

    pub fn skip(&self) -> u64 {
        (self.page_number - 1) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u32 {
        self.page_size
    }

    /// 1-based inclusive range of items on this page, `None` when the page is empty.
    pub fn item_range(&self) -> Option<(u64, u64)> {
        let first = self.skip() + 1;
        if first > self.total_items {
            return None;
        }
        let last = (self.skip() + u64::from(self.page_size)).min(self.total_items);
        Some((first, last))
    }

    pub fn has_next(&self) -> bool {
        self.page_number < self.total_pages()
    }

    pub fn has_prev(&self) -> bool {
        self.page_number > 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("page size must be at least 1")]
    ZeroPageSize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paginator {
    window: PageWindow,
}

impl Paginator {
    pub fn new(page_size: u32) -> Result<Self, PageError> {
        if page_size == 0 {
            return Err(PageError::ZeroPageSize);
        }
        Ok(Self {
            window: PageWindow {
                page_number: 1,
                page_size,
                total_items: 0,
            },
        })
    }

    pub fn window(&self) -> PageWindow {
        self.window
    }

    /// Out-of-range pages clamp into `[1, last_page]`.
    pub fn go_to(&mut self, page_number: u64) -> PageWindow {
        self.window.page_number = page_number.clamp(1, self.window.last_page());
        self.window
    }

    pub fn next(&mut self) -> PageWindow {
        if self.window.has_next() {
            self.window.page_number += 1;
        }
        self.window
    }

    pub fn prev(&mut self) -> PageWindow {
        if self.window.has_prev() {
            self.window.page_number -= 1;
        }
        self.window
    }

    /// A shrinking total moves the page back when the current one would be empty.
    pub fn set_total_items(&mut self, total_items: u64) -> PageWindow {
        self.window.total_items = total_items;
        let page = self.window.page_number;
        self.go_to(page)
    }

    /// Keeps the first visible item on screen.
    pub fn set_page_size(&mut self, page_size: u32) -> Result<PageWindow, PageError> {
        if page_size == 0 {
            return Err(PageError::ZeroPageSize);
        }
        let first = self.window.skip();
        self.window.page_size = page_size;
        Ok(self.go_to(first / u64::from(page_size) + 1))
    }
}

pub struct RecordList {
    api: Arc<dyn RecordApi>,
    pager: Paginator,
    items: Vec<Record>,
}

impl RecordList {
    pub fn new(api: Arc<dyn RecordApi>, page_size: u32) -> Result<Self, PageError> {
        Ok(Self {
            api,
            pager: Paginator::new(page_size)?,
            items: Vec::new(),
        })
    }

    pub fn window(&self) -> PageWindow {
        self.pager.window()
    }

    pub fn items(&self) -> &[Record] {
        &self.items
    }

    /// Fetch the current page. If the server reports fewer items than the window assumes,
    /// the page is clamped and fetched again.
    pub async fn refresh(&mut self) -> Result<PageWindow, ApiError> {
        let requested = self.pager.window();
        let page = fetch_window(&self.api, requested).await?;
        let window = self.pager.set_total_items(page.total);

        if window.page_number != requested.page_number {
            debug!(
                "[PHASE: list] [STEP: fetch] page {} no longer exists; showing page {}",
                requested.page_number, window.page_number
            );
            let page = fetch_window(&self.api, window).await?;
            self.pager.set_total_items(page.total);
            self.items = page.items;
        } else {
            self.items = page.items;
        }
        Ok(self.pager.window())
    }

    pub async fn go_to(&mut self, page_number: u64) -> Result<PageWindow, ApiError> {
        let before = self.pager.window();
        if self.pager.go_to(page_number) == before && !self.items.is_empty() {
            return Ok(before);
        }
        self.refresh().await
    }

    pub async fn next(&mut self) -> Result<PageWindow, ApiError> {
        let before = self.pager.window();
        if self.pager.next() == before {
            return Ok(before);
        }
        self.refresh().await
    }

    pub async fn prev(&mut self) -> Result<PageWindow, ApiError> {
        let before = self.pager.window();
        if self.pager.prev() == before {
            return Ok(before);
        }
        self.refresh().await
    }

    /// Delete one record, then reload the page; the page moves back if it became empty.
    pub async fn delete(&mut self, id: &RecordId) -> Result<PageWindow, ApiError> {
        self.api.delete_record(id).await?;
        let total = self.pager.window().total_items.saturating_sub(1);
        self.pager.set_total_items(total);
        info!("[PHASE: list] [STEP: delete] record {} deleted", id);
        self.refresh().await
    }
}

async fn fetch_window(api: &Arc<dyn RecordApi>, window: PageWindow) -> Result<RecordPage, ApiError> {
    let started = Instant::now();
    let (skip, limit) = (window.skip(), window.limit());

    let retry_strategy = ExponentialBackoff::from_millis(100)
        .factor(2)
        .max_delay(Duration::from_secs(2))
        .take(3)
        .map(jitter);

    let page = RetryIf::spawn(
        retry_strategy,
        || api.list_records(skip, limit),
        |e: &ApiError| {
            let transient = e.is_transient();
            if transient {
                warn!(
                    "[PHASE: list] [STEP: fetch] transient failure, retrying (skip={}, limit={}, error={})",
                    skip, limit, e
                );
            }
            transient
        },
    )
    .await?;

    debug!(
        "[PHASE: list] [STEP: fetch] page {} (skip={}, limit={}, items={}, total={}, duration_ms={})",
        window.page_number,
        skip,
        limit,
        page.items.len(),
        page.total,
        started.elapsed().as_millis()
    );
    Ok(page)
}
