use crate::graph::Value;
use crate::process::ProcessHandle;
use crate::stamp::{ErrorDetails, HandledCallbackStamp, HandledStamp, Stamp, StampKind};

/// Immutable wrapper of one task and its stamps. Every `with*` method returns
/// a new envelope; the task itself is shared, not copied.
#[derive(Debug, Clone)]
pub struct Envelope {
    task: Value,
    stamps: Vec<Stamp>,
}

impl Envelope {
    pub fn new(task: impl Into<Value>) -> Self {
        Self {
            task: task.into(),
            stamps: Vec::new(),
        }
    }

    pub fn task(&self) -> &Value {
        &self.task
    }

    pub fn stamps(&self) -> &[Stamp] {
        &self.stamps
    }

    pub fn with(&self, stamp: impl Into<Stamp>) -> Self {
        let mut next = self.clone();
        next.stamps.push(stamp.into());
        next
    }

    pub fn with_all(&self, stamps: impl IntoIterator<Item = Stamp>) -> Self {
        let mut next = self.clone();
        next.stamps.extend(stamps);
        next
    }

    pub fn without_all(&self, kind: &StampKind) -> Self {
        Self {
            task: self.task.clone(),
            stamps: self
                .stamps
                .iter()
                .filter(|stamp| stamp.kind() != *kind)
                .cloned()
                .collect(),
        }
    }

    pub fn all(&self, kind: &StampKind) -> Vec<&Stamp> {
        self.stamps.iter().filter(|s| s.kind() == *kind).collect()
    }

    pub fn last(&self, kind: &StampKind) -> Option<&Stamp> {
        self.stamps.iter().rev().find(|s| s.kind() == *kind)
    }

    pub fn count(&self, kind: &StampKind) -> usize {
        self.stamps.iter().filter(|s| s.kind() == *kind).count()
    }

    pub fn error_details(&self) -> Option<&ErrorDetails> {
        match self.last(&StampKind::ErrorDetails) {
            Some(Stamp::ErrorDetails(details)) => Some(details),
            _ => None,
        }
    }

    pub fn process(&self) -> Option<&ProcessHandle> {
        match self.last(&StampKind::Process) {
            Some(Stamp::Process(handle)) => Some(handle),
            _ => None,
        }
    }

    pub fn callback(&self) -> Option<&HandledCallbackStamp> {
        match self.last(&StampKind::HandledCallback) {
            Some(Stamp::HandledCallback(callback)) => Some(callback),
            _ => None,
        }
    }

    pub fn handled(&self) -> Vec<&HandledStamp> {
        self.stamps
            .iter()
            .filter_map(|s| match s {
                Stamp::Handled(handled) => Some(handled),
                _ => None,
            })
            .collect()
    }

    /// Whether both envelopes wrap the very same task node.
    pub fn same_task(&self, other: &Envelope) -> bool {
        self.task.same(&other.task)
    }

    /// Appends the stamps of `changed` that this envelope does not have yet:
    /// per kind, only the stamps beyond the count already present here.
    pub fn with_new_stamps_from(&self, changed: &Envelope) -> Self {
        let mut kinds: Vec<StampKind> = Vec::new();
        for stamp in &changed.stamps {
            let kind = stamp.kind();
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }

        let mut next = self.clone();
        for kind in kinds {
            let existing = self.count(&kind);
            next.stamps.extend(
                changed
                    .stamps
                    .iter()
                    .filter(|s| s.kind() == kind)
                    .skip(existing)
                    .cloned(),
            );
        }
        next
    }
}

impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.task == other.task && self.stamps == other.stamps
    }
}
