use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{sleep, Instant};

/// Opaque reference to one rendered card within a specific snapshot.
///
/// Handles carry the generation of the snapshot that produced them and
/// go stale the moment a newer snapshot is taken. The list re-renders
/// freely, so a handle must never be trusted across reloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardHandle {
    generation: u64,
    index: usize,
}

impl CardHandle {
    pub fn new(generation: u64, index: usize) -> Self {
        Self { generation, index }
    }

    pub fn generation(self) -> u64 {
        self.generation
    }

    /// Position within the snapshot that produced this handle.
    pub fn index(self) -> usize {
        self.index
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// A handle from an earlier snapshot was used after the list
    /// reloaded.
    #[error("stale card handle: snapshot {handle} superseded by {current}")]
    StaleHandle { handle: u64, current: u64 },
    /// The underlying browser driver failed.
    #[error("browser driver error: {0}")]
    Driver(String),
}

/// Capability contract against the live invitation list.
///
/// Selectors are opaque strings interpreted by the implementation; the
/// WebDriver adapter treats them as CSS. One session drives one browser
/// tab and the caller holds it exclusively for the whole operation.
#[async_trait]
pub trait ListSession: Send {
    /// Reads the currently rendered cards. Handles from any earlier
    /// snapshot become stale.
    async fn snapshot_cards(&mut self, selector: &str) -> Result<Vec<CardHandle>, SessionError>;

    /// Text of every descendant of `card` matching `selector`, in
    /// document order.
    async fn card_texts(
        &mut self,
        card: CardHandle,
        selector: &str,
    ) -> Result<Vec<String>, SessionError>;

    /// Attribute of the first descendant of `card` matching `selector`,
    /// or `None` when nothing matches or the attribute is unset.
    async fn card_attr(
        &mut self,
        card: CardHandle,
        selector: &str,
        attr: &str,
    ) -> Result<Option<String>, SessionError>;

    /// Clicks the `index`-th descendant of `card` matching `selector`.
    /// Returns false when no such element exists.
    async fn click_in_card(
        &mut self,
        card: CardHandle,
        selector: &str,
        index: usize,
    ) -> Result<bool, SessionError>;

    /// Text of every page-level element matching `selector`.
    async fn page_texts(&mut self, selector: &str) -> Result<Vec<String>, SessionError>;

    /// Clicks the `index`-th page-level element matching `selector`.
    /// Returns false when no such element exists.
    async fn click_on_page(&mut self, selector: &str, index: usize)
        -> Result<bool, SessionError>;

    /// Whether anything currently matches `selector`.
    async fn is_present(&mut self, selector: &str) -> Result<bool, SessionError>;

    /// Fires the list's lazy-load mechanism, e.g. a scroll to the
    /// bottom of the page.
    async fn trigger_lazy_load(&mut self) -> Result<(), SessionError>;

    /// Measurable extent of the list, e.g. the scrollable height. Only
    /// ever compared against earlier values.
    async fn measure_extent(&mut self) -> Result<u64, SessionError>;

    /// Polling cadence for the default wait helpers.
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(100)
    }

    /// Polls until `selector` matches something or `timeout` expires.
    /// Timing out is an ordinary `Ok(false)`, not an error.
    async fn wait_for_present(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_present(selector).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(self.poll_interval()).await;
        }
    }

    /// Polls until nothing matches `selector` or `timeout` expires.
    async fn wait_for_absent(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_present(selector).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(self.poll_interval()).await;
        }
    }
}
