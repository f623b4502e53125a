mod backend;
mod backends;
mod result;

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::config::{DetectorBackendKind, DetectorSettings};

pub use backend::DetectorBackend;
pub use backends::{HttpDetectorBackend, ReplayBackend};
pub use result::{BoundingBox, Detection, RawDetection};

/// Build the configured detector backend.
pub fn build_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match &settings.backend {
        DetectorBackendKind::Replay { script } => match script {
            Some(path) => Ok(Box::new(ReplayBackend::from_file(path)?)),
            None => Ok(Box::new(ReplayBackend::new(Vec::new()))),
        },
        DetectorBackendKind::Http { endpoint } => {
            if endpoint.trim().is_empty() {
                return Err(anyhow!("http detector backend requires an endpoint"));
            }
            Ok(Box::new(HttpDetectorBackend::new(
                endpoint.clone(),
                Duration::from_millis(settings.timeout_ms),
            )))
        }
    }
}
