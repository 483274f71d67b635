use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::FullscreenError;

/// Host hook for the assessment window's fullscreen mode.
#[async_trait]
pub trait FullscreenControl: Send + Sync {
    /// # Errors
    ///
    /// Returns `FullscreenError` if the host refuses the request.
    async fn enter(&self) -> Result<(), FullscreenError>;

    /// # Errors
    ///
    /// Returns `FullscreenError` if the host cannot leave fullscreen.
    async fn exit(&self) -> Result<(), FullscreenError>;

    fn is_active(&self) -> bool;
}

/// Fullscreen state for hosts without a window, such as the command-line driver.
#[derive(Debug, Default)]
pub struct HeadlessFullscreen {
    active: AtomicBool,
}

impl HeadlessFullscreen {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FullscreenControl for HeadlessFullscreen {
    async fn enter(&self) -> Result<(), FullscreenError> {
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn exit(&self) -> Result<(), FullscreenError> {
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
