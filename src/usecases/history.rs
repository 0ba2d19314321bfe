//! Backward pagination over a group's message history.
//!
//! Pages come newest first; the cursor (`max_id`) moves to the smallest id of each page
//! until a short page ends the walk.

use crate::domain::{DomainError, Message};
use crate::ports::TgClient;
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: i32 = 100;

pub struct HistoryPager {
    group_id: i64,
    /// Exclusive lower bound; 0 reads the whole history.
    min_id: i32,
    /// Exclusive upper bound of the next page; 0 = newest.
    max_id: i32,
    page_size: i32,
    page_delay: Duration,
    started: bool,
    done: bool,
    newest_seen: i32,
}

impl HistoryPager {
    pub fn new(group_id: i64, min_id: i32) -> Self {
        Self {
            group_id,
            min_id,
            max_id: 0,
            page_size: DEFAULT_PAGE_SIZE,
            page_delay: Duration::from_millis(100),
            started: false,
            done: false,
            newest_seen: min_id,
        }
    }

    pub fn page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Pause between pages to stay under the remote rate limits.
    pub fn page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    /// Highest message id returned so far (or `min_id` if nothing was returned).
    pub fn newest_seen(&self) -> i32 {
        self.newest_seen
    }

    /// Next page, newest first. `None` once the history is exhausted.
    pub async fn next_page(
        &mut self,
        client: &dyn TgClient,
    ) -> Result<Option<Vec<Message>>, DomainError> {
        if self.done {
            return Ok(None);
        }
        if self.started && !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }
        self.started = true;

        let mut messages = client
            .get_messages(self.group_id, self.min_id, self.max_id, self.page_size)
            .await?;
        // The server may include the boundary messages.
        let (min_id, max_id) = (self.min_id, self.max_id);
        messages.retain(|m| m.id > min_id && (max_id == 0 || m.id < max_id));

        if messages.is_empty() {
            self.done = true;
            return Ok(None);
        }
        let page_min = messages.iter().map(|m| m.id).min().unwrap_or(0);
        let page_max = messages.iter().map(|m| m.id).max().unwrap_or(0);
        self.newest_seen = self.newest_seen.max(page_max);
        self.max_id = page_min;
        if messages.len() < self.page_size as usize || page_min <= self.min_id + 1 {
            self.done = true;
        }
        Ok(Some(messages))
    }
}
