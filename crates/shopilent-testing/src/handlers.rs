//! Event handler doubles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use shopilent_core::{EventEnvelope, EventHandler};

/// Records every envelope it receives.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<EventEnvelope>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.envelopes().into_iter().map(|e| e.event_type).collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.envelopes()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn name(&self) -> &str {
        "recording"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(envelope.clone());
        }
        Ok(())
    }
}

/// Fails the first `failures` calls, then succeeds.
#[derive(Debug)]
pub struct FailingHandler {
    failures: usize,
    calls: AtomicUsize,
}

impl FailingHandler {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always() -> Self {
        Self::failing(usize::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for FailingHandler {
    fn name(&self) -> &str {
        "failing"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            anyhow::bail!("simulated failure for {} (call {})", envelope.event_type, call + 1);
        }
        Ok(())
    }
}
