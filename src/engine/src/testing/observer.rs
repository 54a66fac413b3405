//! Observer that records every event it receives.

use std::sync::Mutex;

use crate::retention::events::{RetentionEvent, RetentionObserver};

#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<RetentionEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RetentionEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Names of the recorded events, in emission order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(RetentionEvent::name).collect()
    }
}

impl RetentionObserver for RecordingObserver {
    fn on_event(&self, event: &RetentionEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("recording observer poisoned"))?
            .push(event.clone());
        Ok(())
    }
}
