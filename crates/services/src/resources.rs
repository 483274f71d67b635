use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use proctor_core::model::Detection;

use crate::error::{AcquisitionError, CaptureError, InferenceError};

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// One still image grabbed from the capture stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

impl Frame {
    #[must_use]
    pub fn new(sequence: u64, width: u32, height: u32, pixels: impl Into<Arc<[u8]>>) -> Self {
        Self {
            sequence,
            width,
            height,
            pixels: pixels.into(),
        }
    }
}

/// A loaded object-detection model (`detect(frame)`).
#[async_trait]
pub trait InferenceModel: Send + Sync {
    /// Classify a frame into labelled detections.
    ///
    /// # Errors
    ///
    /// Returns `InferenceError` when the model cannot process the frame.
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, InferenceError>;
}

/// Source of the inference capability (`loadModel`).
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// # Errors
    ///
    /// Returns `InferenceError` when the model cannot be loaded.
    async fn load_model(&self) -> Result<Arc<dyn InferenceModel>, InferenceError>;
}

/// A live camera stream (`StreamHandle`).
#[async_trait]
pub trait CaptureStream: Send + Sync {
    /// Number of tracks still producing frames.
    fn active_tracks(&self) -> usize;

    /// Stop every track. Calling it again is a no-op.
    fn stop(&self);

    /// # Errors
    ///
    /// Returns `CaptureError` when no frame could be read.
    async fn capture_frame(&self) -> Result<Frame, CaptureError>;
}

/// Source of camera streams (`getCaptureStream`).
#[async_trait]
pub trait CameraProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns `CaptureError::PermissionDenied` when the learner refuses camera
    /// access, or another `CaptureError` when no camera can be opened.
    async fn open_stream(&self) -> Result<Arc<dyn CaptureStream>, CaptureError>;
}

//
// ─── MANAGER ───────────────────────────────────────────────────────────────────
//

/// Capture and inference handles owned by the acquisition manager.
///
/// Other components clone these for the duration of one detection tick.
#[derive(Clone)]
pub struct ResourceHandles {
    pub model: Arc<dyn InferenceModel>,
    pub stream: Arc<dyn CaptureStream>,
}

/// Acquires and releases the camera stream and inference model.
pub struct ResourceAcquisitionManager {
    loader: Arc<dyn ModelLoader>,
    camera: Arc<dyn CameraProvider>,
    handles: Mutex<Option<ResourceHandles>>,
}

impl ResourceAcquisitionManager {
    #[must_use]
    pub fn new(loader: Arc<dyn ModelLoader>, camera: Arc<dyn CameraProvider>) -> Self {
        Self {
            loader,
            camera,
            handles: Mutex::new(None),
        }
    }

    /// Load the model, then open the camera.
    ///
    /// Returns `Ok(None)` without touching either collaborator when proctoring
    /// is not required.
    ///
    /// # Errors
    ///
    /// Returns `AcquisitionError` if the model fails to load, the camera is
    /// refused, or the stream has no live tracks. A partially opened stream is
    /// stopped before returning.
    pub async fn acquire(
        &self,
        proctoring_required: bool,
    ) -> Result<Option<ResourceHandles>, AcquisitionError> {
        if !proctoring_required {
            return Ok(None);
        }

        let model = self.loader.load_model().await?;
        let stream = self.camera.open_stream().await?;
        if stream.active_tracks() == 0 {
            stream.stop();
            return Err(AcquisitionError::CameraUnavailable(
                "capture stream has no live tracks".into(),
            ));
        }

        let handles = ResourceHandles { model, stream };
        let previous = self.slot().replace(handles.clone());
        if let Some(previous) = previous {
            previous.stream.stop();
        }
        Ok(Some(handles))
    }

    /// Clone the currently held handles, if any.
    #[must_use]
    pub fn handles(&self) -> Option<ResourceHandles> {
        self.slot().clone()
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.slot().is_some()
    }

    /// Stop the stream and drop both handles. Returns whether anything was held.
    pub fn release(&self) -> bool {
        let taken = self.slot().take();
        match taken {
            Some(handles) => {
                handles.stream.stop();
                true
            }
            None => false,
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<ResourceHandles>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ResourceAcquisitionManager {
    fn drop(&mut self) {
        self.release();
    }
}
