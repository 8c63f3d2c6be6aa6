//! Progress and alert notifications for whoever drives an analysis.
//!
//! Events go out over a crossbeam channel so a UI, a log forwarder or a
//! test can subscribe without the engine knowing which.

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::network::analysis::Alert;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalysisEvent {
    CaptureStarted { interface: String, max_packets: usize },
    CaptureFinished { interface: String, frames: usize },
    FramesParsed { frames: usize, skipped: usize },
    Alert(Alert),
    AnalysisComplete { session_id: String, total_packets: usize, alerts: usize },
}

/// Sending half handed to the engine. Cloning is cheap and a sink with no
/// subscriber simply drops events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<Sender<AnalysisEvent>>,
}

impl EventSink {
    pub fn new(sender: Sender<AnalysisEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// A sink with a fresh unbounded channel behind it.
    pub fn channel() -> (Self, Receiver<AnalysisEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::new(tx), rx)
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: AnalysisEvent) {
        if let Some(ref sender) = self.sender {
            if sender.send(event).is_err() {
                log::debug!("Event receiver dropped");
            }
        }
    }
}
