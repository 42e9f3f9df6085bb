//! Run status notification

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;

/// Progress of an update run, as shown to an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusEvent {
    /// Medium detected, preparing
    Preparation,
    /// Config accepted, images are being processed
    Progress,
    /// Every attempted image succeeded
    Success,
    /// At least one attempted image failed, or the config was rejected
    Fail,
    /// A script took over the run
    Disabled,
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusEvent::Preparation => "preparation",
            StatusEvent::Progress => "progress",
            StatusEvent::Success => "success",
            StatusEvent::Fail => "fail",
            StatusEvent::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// Receives status events, e.g. to drive an LED or a splash screen
pub trait StatusObserver {
    /// Called for every event in run order.
    fn notify(&self, event: StatusEvent);
}

/// Observer that records every event
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: RefCell<Vec<StatusEvent>>,
}

impl RecordingObserver {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events seen so far.
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.borrow().clone()
    }
}

impl StatusObserver for RecordingObserver {
    fn notify(&self, event: StatusEvent) {
        self.events.borrow_mut().push(event);
    }
}
