//! Serialised access to the single physical device channel.
//!
//! Every connection shares one [`DeviceChannel`].  Each submit moves onto
//! Tokio's blocking pool and holds the device mutex for the full duration
//! of the call, so exactly one passthrough operation is in flight across
//! the whole process.  Connections waiting for the device do not block
//! other connections' logging or socket I/O.

use std::sync::{Arc, Mutex};

use crate::passthrough::{Passthrough, PassthroughError, PassthroughReply, PassthroughRequest};

#[derive(Clone)]
pub struct DeviceChannel {
    device: Arc<Mutex<Box<dyn Passthrough>>>,
}

impl DeviceChannel {
    pub fn new(device: Box<dyn Passthrough>) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
        }
    }

    /// Submits `request` under the device lock.
    ///
    /// # Errors
    ///
    /// Whatever the device returns, or [`PassthroughError::Worker`] if the
    /// blocking task panicked.
    pub async fn submit(
        &self,
        request: PassthroughRequest,
    ) -> Result<PassthroughReply, PassthroughError> {
        let device = Arc::clone(&self.device);
        tokio::task::spawn_blocking(move || {
            // A panic inside a previous submit poisons the lock; the device
            // handle itself is still usable.
            let mut guard = device.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.submit(&request)
        })
        .await
        .map_err(|e| PassthroughError::Worker(e.to_string()))?
    }
}
