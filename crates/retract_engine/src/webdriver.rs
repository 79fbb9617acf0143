use std::time::Duration;

use async_trait::async_trait;
use thirtyfour::error::WebDriverError;
use thirtyfour::prelude::*;

use crate::session::{CardHandle, ListSession, SessionError};

/// Connection settings for the WebDriver-backed session.
#[derive(Debug, Clone)]
pub struct WebDriverSettings {
    /// WebDriver server endpoint, e.g. a locally running chromedriver.
    pub server_url: String,
    pub poll_interval: Duration,
}

impl Default for WebDriverSettings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:9515".to_string(),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// [`ListSession`] against a real browser over the WebDriver protocol.
///
/// Selectors are CSS. Card handles index into the element cache of the
/// most recent snapshot; the cache is dropped wholesale when the next
/// snapshot is taken, which is what makes stale handles detectable.
pub struct WebDriverListSession {
    driver: WebDriver,
    cards: Vec<WebElement>,
    generation: u64,
    poll_interval: Duration,
}

impl WebDriverListSession {
    /// Connects to a WebDriver server and opens a maximized window.
    pub async fn connect(settings: WebDriverSettings) -> Result<Self, SessionError> {
        let mut caps = DesiredCapabilities::chrome();
        caps.add_arg("--start-maximized").map_err(driver_error)?;
        let driver = WebDriver::new(&settings.server_url, caps)
            .await
            .map_err(driver_error)?;
        Ok(Self {
            driver,
            cards: Vec::new(),
            generation: 0,
            poll_interval: settings.poll_interval,
        })
    }

    /// Navigates the tab, for the login page and the list view.
    pub async fn goto(&self, url: &str) -> Result<(), SessionError> {
        self.driver.goto(url).await.map_err(driver_error)
    }

    /// Ends the browser session and closes the window.
    pub async fn quit(self) -> Result<(), SessionError> {
        self.driver.quit().await.map_err(driver_error)
    }

    fn card(&self, handle: CardHandle) -> Result<&WebElement, SessionError> {
        if handle.generation() != self.generation {
            return Err(SessionError::StaleHandle {
                handle: handle.generation(),
                current: self.generation,
            });
        }
        self.cards.get(handle.index()).ok_or_else(|| {
            SessionError::Driver(format!("card index {} out of range", handle.index()))
        })
    }
}

fn driver_error(err: WebDriverError) -> SessionError {
    SessionError::Driver(err.to_string())
}

#[async_trait]
impl ListSession for WebDriverListSession {
    async fn snapshot_cards(&mut self, selector: &str) -> Result<Vec<CardHandle>, SessionError> {
        let cards = self
            .driver
            .find_all(By::Css(selector))
            .await
            .map_err(driver_error)?;
        self.generation += 1;
        self.cards = cards;
        Ok((0..self.cards.len())
            .map(|index| CardHandle::new(self.generation, index))
            .collect())
    }

    async fn card_texts(
        &mut self,
        card: CardHandle,
        selector: &str,
    ) -> Result<Vec<String>, SessionError> {
        let element = self.card(card)?;
        let found = element
            .find_all(By::Css(selector))
            .await
            .map_err(driver_error)?;
        let mut texts = Vec::with_capacity(found.len());
        for item in found {
            texts.push(item.text().await.map_err(driver_error)?);
        }
        Ok(texts)
    }

    async fn card_attr(
        &mut self,
        card: CardHandle,
        selector: &str,
        attr: &str,
    ) -> Result<Option<String>, SessionError> {
        let element = self.card(card)?;
        let found = element
            .find_all(By::Css(selector))
            .await
            .map_err(driver_error)?;
        match found.first() {
            Some(item) => item.attr(attr).await.map_err(driver_error),
            None => Ok(None),
        }
    }

    async fn click_in_card(
        &mut self,
        card: CardHandle,
        selector: &str,
        index: usize,
    ) -> Result<bool, SessionError> {
        let element = self.card(card)?;
        let found = element
            .find_all(By::Css(selector))
            .await
            .map_err(driver_error)?;
        match found.into_iter().nth(index) {
            Some(item) => {
                item.click().await.map_err(driver_error)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn page_texts(&mut self, selector: &str) -> Result<Vec<String>, SessionError> {
        let found = self
            .driver
            .find_all(By::Css(selector))
            .await
            .map_err(driver_error)?;
        let mut texts = Vec::with_capacity(found.len());
        for item in found {
            texts.push(item.text().await.map_err(driver_error)?);
        }
        Ok(texts)
    }

    async fn click_on_page(
        &mut self,
        selector: &str,
        index: usize,
    ) -> Result<bool, SessionError> {
        let found = self
            .driver
            .find_all(By::Css(selector))
            .await
            .map_err(driver_error)?;
        match found.into_iter().nth(index) {
            Some(item) => {
                item.click().await.map_err(driver_error)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn is_present(&mut self, selector: &str) -> Result<bool, SessionError> {
        let found = self
            .driver
            .find_all(By::Css(selector))
            .await
            .map_err(driver_error)?;
        Ok(!found.is_empty())
    }

    async fn trigger_lazy_load(&mut self) -> Result<(), SessionError> {
        self.driver
            .execute("window.scrollTo(0, document.body.scrollHeight);", Vec::new())
            .await
            .map_err(driver_error)?;
        Ok(())
    }

    async fn measure_extent(&mut self) -> Result<u64, SessionError> {
        let ret = self
            .driver
            .execute("return document.body.scrollHeight;", Vec::new())
            .await
            .map_err(driver_error)?;
        let height: f64 = ret.convert().map_err(driver_error)?;
        Ok(height.max(0.0) as u64)
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
