//! State of one orchestration run.

use events::{Event, EventBus};
use launcher_core::{Phase, PhaseId, PhaseStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};
use crate::runner::ExecutionHandle;
use crate::state_machine::PhaseStateMachine;

/// Bounded buffer of the most recent output, counted in characters.
#[derive(Debug, Clone)]
pub struct OutputTail {
    buf: String,
    chars: usize,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: String::new(),
            chars: 0,
            capacity,
        }
    }

    pub fn push(&mut self, chunk: &str) {
        self.buf.push_str(chunk);
        self.chars += chunk.chars().count();

        if self.chars > self.capacity {
            let excess = self.chars - self.capacity;
            let cut = self
                .buf
                .char_indices()
                .nth(excess)
                .map(|(i, _)| i)
                .unwrap_or(self.buf.len());
            self.buf.drain(..cut);
            self.chars = self.capacity;
        }
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.chars = 0;
    }
}

/// Read-only view of the session published after every change.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SessionSnapshot {
    /// Last phase that was started
    pub current_phase: Option<PhaseId>,
    pub statuses: BTreeMap<PhaseId, PhaseStatus>,
    /// Phase currently awaited, if any. Ad-hoc runs report 0
    pub running: Option<PhaseId>,
    /// Tool whose installer is currently running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installing: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub recent_output: String,
}

impl SessionSnapshot {
    pub fn is_busy(&self) -> bool {
        self.running.is_some() || self.installing.is_some()
    }

    pub fn status(&self, id: PhaseId) -> Option<PhaseStatus> {
        self.statuses.get(&id).copied()
    }
}

/// The single owned mutable state of an orchestration run.
///
/// Owned by the controlling task; everything else observes it through
/// [`PipelineSession::subscribe`].
pub struct PipelineSession {
    phases: Vec<Phase>,
    statuses: BTreeMap<PhaseId, PhaseStatus>,
    current_phase: Option<PhaseId>,
    active: Option<PhaseId>,
    installing: Option<String>,
    in_flight: Option<ExecutionHandle>,
    detached: Vec<(PhaseId, ExecutionHandle)>,
    tail: OutputTail,
    bus: EventBus,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl PipelineSession {
    pub fn new(phases: Vec<Phase>, tail_capacity: usize, bus: EventBus) -> Self {
        let statuses: BTreeMap<_, _> = phases.iter().map(|p| (p.id, PhaseStatus::Pending)).collect();
        let (snapshots, _) = watch::channel(SessionSnapshot {
            statuses: statuses.clone(),
            ..Default::default()
        });

        Self {
            phases,
            statuses,
            current_phase: None,
            active: None,
            installing: None,
            in_flight: None,
            detached: Vec::new(),
            tail: OutputTail::new(tail_capacity),
            bus,
            snapshots,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn phase(&self, id: PhaseId) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn status(&self, id: PhaseId) -> Option<PhaseStatus> {
        self.statuses.get(&id).copied()
    }

    pub fn statuses(&self) -> &BTreeMap<PhaseId, PhaseStatus> {
        &self.statuses
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some() || self.installing.is_some()
    }

    pub fn tail(&self) -> &OutputTail {
        &self.tail
    }

    pub fn tail_mut(&mut self) -> &mut OutputTail {
        &mut self.tail
    }

    /// Record that `phase` is now the one being awaited.
    ///
    /// Fails with `Busy` when another phase is still active.
    pub fn begin(&mut self, phase: &Phase) -> Result<()> {
        if self.is_busy() {
            return Err(OrchestratorError::Busy);
        }

        self.active = Some(phase.id);
        self.current_phase = Some(phase.id);
        self.tail.clear();

        self.bus
            .emit(Event::system(format!("\n\n--- Starting Phase: {} ---\n", phase.name)));

        if self.statuses.contains_key(&phase.id) {
            self.transition(phase.id, PhaseStatus::Running)?;
        } else {
            self.publish();
        }
        Ok(())
    }

    /// Record that `tool`'s installer is about to run.
    pub fn begin_install(&mut self, tool: &str) -> Result<()> {
        if self.is_busy() {
            return Err(OrchestratorError::Busy);
        }

        self.installing = Some(tool.to_string());
        self.tail.clear();
        self.publish();
        Ok(())
    }

    /// Settle the running installer, keeping its output in the tail.
    pub fn finish_install(&mut self) {
        self.installing = None;
        self.in_flight = None;
        self.publish();
    }

    pub fn set_in_flight(&mut self, handle: ExecutionHandle) {
        debug!(execution_id = %handle.id, label = %handle.label, "Execution in flight");
        self.in_flight = Some(handle);
    }

    pub fn in_flight(&self) -> Option<&ExecutionHandle> {
        self.in_flight.as_ref()
    }

    /// Keep a detached phase's handle so its process can be stopped later.
    pub fn hold_detached(&mut self, phase_id: PhaseId, handle: ExecutionHandle) {
        self.detached.retain(|(_, h)| !h.is_finished());
        self.detached.push((phase_id, handle));
    }

    /// Processes of detached phases that have not exited yet.
    pub fn detached_count(&self) -> usize {
        self.detached
            .iter()
            .filter(|(_, h)| !h.is_finished() && !h.is_cancelled())
            .count()
    }

    /// Remove the still-running detached handles of `phase_id`, or of every
    /// phase when `None`, so the caller can stop them.
    pub fn take_detached(&mut self, phase_id: Option<PhaseId>) -> Vec<ExecutionHandle> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.detached)
            .into_iter()
            .partition(|(id, _)| phase_id.map_or(true, |p| p == *id));
        self.detached = kept;
        taken
            .into_iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(_, h)| h)
            .collect()
    }

    /// Settle the active phase.
    pub fn finish(&mut self, phase_id: PhaseId, status: PhaseStatus) -> Result<()> {
        self.active = None;
        self.in_flight = None;

        if self.statuses.contains_key(&phase_id) {
            self.transition(phase_id, status)?;
        } else {
            self.publish();
        }
        Ok(())
    }

    /// Return every phase to pending. Started services keep running.
    pub fn reset(&mut self) -> Result<()> {
        if self.is_busy() {
            return Err(OrchestratorError::Busy);
        }

        let ids: Vec<PhaseId> = self.statuses.keys().copied().collect();
        for id in ids {
            if self.statuses.get(&id) != Some(&PhaseStatus::Pending) {
                self.transition(id, PhaseStatus::Pending)?;
            }
        }
        self.current_phase = None;
        self.tail.clear();
        self.publish();
        info!("Pipeline session reset");
        Ok(())
    }

    /// Cancel every detached process and whatever is still in flight.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.cancel();
        }
        for (phase_id, handle) in self.detached.drain(..) {
            debug!(phase_id, execution_id = %handle.id, "Stopping detached phase");
            handle.cancel();
        }
    }

    fn transition(&mut self, phase_id: PhaseId, to: PhaseStatus) -> Result<()> {
        let from = self.status(phase_id).ok_or(OrchestratorError::UnknownPhase(phase_id))?;
        PhaseStateMachine::validate_transition(&from, &to)?;

        self.statuses.insert(phase_id, to);
        debug!(phase_id, from = from.as_str(), to = to.as_str(), "Phase status changed");

        self.bus.emit(Event::PhaseStatusChanged {
            phase_id,
            from_status: from,
            to_status: to,
        });
        self.publish();
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            current_phase: self.current_phase,
            statuses: self.statuses.clone(),
            running: self.active,
            installing: self.installing.clone(),
            recent_output: self.tail.as_str().to_string(),
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }
}

impl Drop for PipelineSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
