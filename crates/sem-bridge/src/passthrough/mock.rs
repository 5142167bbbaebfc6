//! Scripted passthrough for tests and offline runs.
//!
//! Replies are computed by a closure over the request; every submitted
//! request is recorded so tests can assert on what reached the "hardware".

use std::sync::{Arc, Mutex};

use super::{Passthrough, PassthroughError, PassthroughReply, PassthroughRequest};

type Responder = dyn FnMut(&PassthroughRequest) -> Result<PassthroughReply, PassthroughError> + Send;

/// A [`Passthrough`] driven by a closure.
pub struct ScriptedDevice {
    responder: Box<Responder>,
    submitted: Arc<Mutex<Vec<PassthroughRequest>>>,
}

impl ScriptedDevice {
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&PassthroughRequest) -> Result<PassthroughReply, PassthroughError> + Send + 'static,
    {
        Self {
            responder: Box::new(responder),
            submitted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A device that answers every command with GOOD status and a
    /// zero-filled inbound buffer.
    pub fn always_good() -> Self {
        Self::new(|req| {
            Ok(PassthroughReply {
                data: vec![0u8; req.inbound_len],
                ..PassthroughReply::default()
            })
        })
    }

    /// Shared log of submitted requests; stays valid after the device is
    /// moved into a channel.
    pub fn submitted(&self) -> Arc<Mutex<Vec<PassthroughRequest>>> {
        Arc::clone(&self.submitted)
    }
}

impl Passthrough for ScriptedDevice {
    fn submit(&mut self, request: &PassthroughRequest) -> Result<PassthroughReply, PassthroughError> {
        if let Ok(mut log) = self.submitted.lock() {
            log.push(request.clone());
        }
        (self.responder)(request)
    }
}
