//! Per-version activation state machine
//!
//! An [`Activation`] carries the lifecycle state of one version together with
//! the objects that only exist during parts of that lifecycle: the redundancy
//! priority (while Active), the progress indicator and the blocks-transition
//! marker (while Activating). The orchestrator composes the helpers here into
//! the full transition function, see
//! [`ItemUpdater::set_activation_state`](crate::ItemUpdater::set_activation_state).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::association::Association;
use crate::version::{ImageClass, VersionId, VersionPurpose};

/// Progress published when the write begins
pub const PROGRESS_WRITE_STARTED: u8 = 10;

/// Progress published once the write service has been started
pub const PROGRESS_WRITE_DISPATCHED: u8 = 30;

/// Progress added when the write service reports `done`
pub const PROGRESS_SIGNAL_STEP: u8 = 50;

/// Progress published when the activation completes
pub const PROGRESS_COMPLETE: u8 = 100;

/// Lifecycle state of an activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ActivationState {
    /// Image failed validation (terminal)
    Invalid,
    /// Validated, awaiting an activation request
    #[default]
    Ready,
    /// Write in progress
    Activating,
    /// Running and counted toward the class cap
    Active,
    /// Write or verification failed
    Failed,
}

impl ActivationState {
    /// Whether the activation counts toward its class residency cap
    pub fn is_resident(self) -> bool {
        matches!(self, ActivationState::Active | ActivationState::Failed)
    }

    /// Whether an activation in this state may hold a redundancy priority
    pub fn keeps_priority(self) -> bool {
        matches!(self, ActivationState::Active | ActivationState::Activating)
    }
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivationState::Invalid => "Invalid",
            ActivationState::Ready => "Ready",
            ActivationState::Activating => "Activating",
            ActivationState::Active => "Active",
            ActivationState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Outcome of image validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationStatus {
    /// Every required artifact is present
    Ready,
    /// Required artifacts are missing
    Invalid,
}

impl ActivationStatus {
    /// Initial activation state for a freshly created version
    pub fn initial_state(self) -> ActivationState {
        match self {
            ActivationStatus::Ready => ActivationState::Ready,
            ActivationStatus::Invalid => ActivationState::Invalid,
        }
    }
}

/// Boot-order rank of an active version; 0 is tried first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RedundancyPriority(pub u8);

impl RedundancyPriority {
    /// Priority of the preferred boot image
    pub const HIGHEST: RedundancyPriority = RedundancyPriority(0);

    /// Priority given when nothing better is known
    pub const LOWEST: RedundancyPriority = RedundancyPriority(u8::MAX);

    /// Raw priority value
    pub fn value(self) -> u8 {
        self.0
    }
}

/// Result carried by a write-service completion signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitResult {
    /// Unit finished successfully
    Done,
    /// Unit job was canceled
    Canceled,
    /// Unit job timed out
    Timeout,
    /// Unit failed
    Failed,
    /// A dependency of the unit failed
    Dependency,
    /// Unit job was skipped
    Skipped,
}

impl UnitResult {
    /// Parse a job result string; unrecognised results count as `failed`
    pub fn parse(result: &str) -> Self {
        match result {
            "done" => UnitResult::Done,
            "canceled" => UnitResult::Canceled,
            "timeout" => UnitResult::Timeout,
            "dependency" => UnitResult::Dependency,
            "skipped" => UnitResult::Skipped,
            _ => UnitResult::Failed,
        }
    }

    /// Only `done` is success
    pub fn is_success(self) -> bool {
        matches!(self, UnitResult::Done)
    }
}

impl fmt::Display for UnitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitResult::Done => "done",
            UnitResult::Canceled => "canceled",
            UnitResult::Timeout => "timeout",
            UnitResult::Failed => "failed",
            UnitResult::Dependency => "dependency",
            UnitResult::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Completion signal from the write service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStateChange {
    /// Unit that finished
    pub unit: String,
    /// Job result
    pub result: UnitResult,
}

impl UnitStateChange {
    /// Build a signal from a unit name and raw result string
    pub fn new(unit: impl Into<String>, result: &str) -> Self {
        Self {
            unit: unit.into(),
            result: UnitResult::parse(result),
        }
    }
}

/// Activation of one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activation {
    /// Version this activation belongs to
    pub version_id: VersionId,
    /// Published object path (same as the version's)
    pub path: String,
    /// Purpose of the version, selects the class-specific write path
    pub purpose: VersionPurpose,
    state: ActivationState,
    flashed: bool,
    priority: Option<RedundancyPriority>,
    progress: Option<u8>,
    blocks_transition: bool,
    awaiting_unit: Option<String>,
    associations: Vec<Association>,
}

impl Activation {
    /// Create an activation in the given state
    pub fn new(
        version_id: VersionId,
        path: impl Into<String>,
        purpose: VersionPurpose,
        state: ActivationState,
        associations: Vec<Association>,
    ) -> Self {
        Self {
            version_id,
            path: path.into(),
            purpose,
            state,
            flashed: false,
            priority: None,
            progress: None,
            blocks_transition: false,
            awaiting_unit: None,
            associations,
        }
    }

    /// Current state
    pub fn state(&self) -> ActivationState {
        self.state
    }

    /// Image class of this activation
    pub fn class(&self) -> Option<ImageClass> {
        self.purpose.class()
    }

    /// Whether the class-specific write has completed
    pub fn is_flashed(&self) -> bool {
        self.flashed
    }

    /// Held redundancy priority
    pub fn priority(&self) -> Option<RedundancyPriority> {
        self.priority
    }

    /// Published progress, present only while activating
    pub fn progress(&self) -> Option<u8> {
        self.progress
    }

    /// Whether the blocks-transition marker is published
    pub fn blocks_transition(&self) -> bool {
        self.blocks_transition
    }

    /// Unit whose completion signal this activation is waiting for
    pub fn awaiting_unit(&self) -> Option<&str> {
        self.awaiting_unit.as_deref()
    }

    /// Inventory associations owned by this activation
    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    /// Whether a completion signal for `unit` belongs to this activation
    pub fn expects_unit(&self, unit: &str) -> bool {
        self.state == ActivationState::Activating && self.awaiting_unit.as_deref() == Some(unit)
    }

    /// Assign a priority value
    pub fn set_priority(&mut self, value: u8) {
        self.priority = Some(RedundancyPriority(value));
    }

    /// Enter Activating and publish the starting progress
    pub(crate) fn begin_write(&mut self) {
        self.state = ActivationState::Activating;
        self.progress = Some(PROGRESS_WRITE_STARTED);
        self.blocks_transition = true;
    }

    /// Record that the write service was started
    pub(crate) fn write_dispatched(&mut self, unit: Option<String>) {
        self.progress = Some(PROGRESS_WRITE_DISPATCHED);
        self.awaiting_unit = unit;
    }

    /// Record a successful class-specific write
    pub(crate) fn mark_flashed(&mut self) {
        self.flashed = true;
        let current = self.progress.unwrap_or(PROGRESS_WRITE_DISPATCHED);
        self.progress = Some(current.saturating_add(PROGRESS_SIGNAL_STEP).min(PROGRESS_COMPLETE));
    }

    /// Finish the second half of Activating and settle into Active
    ///
    /// Returns `true` when a default priority had to be allocated.
    pub(crate) fn complete(&mut self) -> bool {
        let allocated = self.priority.is_none();
        if allocated {
            self.priority = Some(RedundancyPriority::HIGHEST);
        }
        self.progress = Some(PROGRESS_COMPLETE);
        self.release_markers();
        self.state = ActivationState::Active;
        allocated
    }

    /// Settle into any state other than a running Activating transition
    ///
    /// Returns the priority that was dropped, if any.
    pub(crate) fn settle(&mut self, requested: ActivationState) -> Option<RedundancyPriority> {
        self.release_markers();
        let dropped = if requested.keeps_priority() {
            None
        } else {
            self.priority.take()
        };
        self.state = requested;
        dropped
    }

    fn release_markers(&mut self) {
        self.progress = None;
        self.blocks_transition = false;
        self.flashed = false;
        self.awaiting_unit = None;
    }
}
