//! Main-thread trace records: the CPU side of the graph builder's input.
//!
//! The distilled spec's "trace" interface (§6) is "a list of main-thread
//! task records" that "share the log's origin" for timing. This module
//! is a thin, already-segmented view over that stream — segmentation of
//! raw DevTools-style trace events into discrete tasks is a collaborator
//! concern (§1 scope: the recorder), not something this crate performs.

use serde::{Deserialize, Serialize};

use crate::units::Milliseconds;

/// A single aggregated main-thread task, as handed to
/// [`crate::graph::builder::build_graph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// When the task started, in the log's shared time origin.
    pub start_time: Milliseconds,
    /// How long the task ran.
    pub duration: Milliseconds,
    /// URLs of scripts that executed during this task, used by the
    /// builder to attribute script-initiated requests (§4.3 step 3).
    pub initiating_script_urls: Vec<String>,
    /// A human-readable event name (e.g. `"EvaluateScript"`,
    /// `"Layout"`), carried through for diagnostics only.
    pub event_name: String,
}

impl TaskRecord {
    /// The task's end time, for convenience at call sites that would
    /// otherwise repeat `start_time.add(duration)`.
    #[must_use]
    pub fn end_time(&self) -> Milliseconds {
        self.start_time.add(self.duration)
    }

    /// Whether this task executed any code attributed to `url`.
    #[must_use]
    pub fn touches_script(&self, url: &str) -> bool {
        self.initiating_script_urls.iter().any(|s| s == url)
    }
}
