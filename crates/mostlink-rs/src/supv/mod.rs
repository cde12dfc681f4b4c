//! Network supervisor.
//!
//! Owns the current `(mode, state)` pair, gates every API call against
//! the permission table, delegates node-discovery callbacks according to
//! the active mode and coalesces state reports so the application sees
//! exactly one transition per mode change.

pub mod mode;

use crate::atd::AtdReport;
use crate::diag::{FdxReport, HdxReport};
use crate::discovery::{NdCheckResult, NdReport};
use crate::fallback::FbpReport;
use crate::hal::StackError;
use crate::inic::FrameCounterStatus;
use crate::prog::ProgReport;
use crate::types::{NetworkStatus, Signature, SupvMode, SupvState};
use alloc::vec::Vec;
use log::{info, warn};
use mode::{ApiIndex, ModeGate};

/// Events of the programming mode reported to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgEventCode {
    /// The application requested to leave the programming mode.
    ExitRequested,
    /// The network starter could not be initialized for programming.
    InitNwsError,
    /// The network did not reach the required quiet state.
    StartupError,
    /// The required quiet state was not reached in time.
    StartupTimeout,
    /// Programming the local configuration failed.
    LocalCfgError,
    /// Programming a node failed.
    ProgramError,
    /// The network kept changing while programming was attempted.
    UnstableError,
}

/// Application callbacks of the supervisor.
///
/// `nd_evaluate`/`nd_report` are only consulted in manual mode; the
/// defaults ignore every node.
pub trait SupervisorCallbacks {
    fn report_mode(&mut self, mode: SupvMode, state: SupvState);

    fn prog_event(&mut self, _code: ProgEventCode) {}

    /// Signature of a node discovered while in programming mode.
    fn prog_signature(&mut self, _signature: &Signature) {}

    fn diag_fdx(&mut self, _report: &FdxReport) {}

    fn diag_hdx(&mut self, _report: &HdxReport) {}

    fn nd_evaluate(&mut self, _signature: &Signature) -> NdCheckResult {
        NdCheckResult::Ignore
    }

    fn nd_report(&mut self, _report: &NdReport) {}

    /// Result of a programming run.
    fn prog_result(&mut self, _report: &ProgReport) {}

    /// Reports of a fallback-protection run.
    fn fallback_report(&mut self, _report: &FbpReport) {}

    /// Result of an ATD measurement.
    fn atd_result(&mut self, _report: &AtdReport) {}

    /// Network-status changes matching the registered observer mask.
    fn network_status(&mut self, _status: &NetworkStatus, _change_mask: u32) {}

    /// Answer to a frame-counter query; `None` on error.
    fn frame_counter(&mut self, _result: Option<FrameCounterStatus>) {}
}

/// Application-supplied description of an expected node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRecord {
    pub signature: Signature,
    /// Whether the node may be targeted by remote programming.
    pub programmable: bool,
}

#[derive(Debug, Clone, Copy)]
struct NodeEntry {
    record: NodeRecord,
    available: bool,
}

/// Follow-up work the instance performs after a supervisor decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupvNotice {
    /// A node from the nodes list became available/unavailable; the
    /// routing engine must react.
    NodeAvailability(Signature, bool),
}

pub struct Supervisor {
    gate: ModeGate,
    /// Mode requested by the application (or configured at init).
    target_mode: SupvMode,
    /// Mode and state reported by the network starter.
    current_mode: SupvMode,
    current_state: SupvState,
    last_reported: Option<(SupvMode, SupvState)>,
    /// A mode change is in flight; reports of the old mode are dropped.
    transition_in_flight: bool,
    nodes: Vec<NodeEntry>,
}

impl Supervisor {
    pub fn new(initial_mode: SupvMode, nodes: &[NodeRecord]) -> Self {
        Self {
            gate: ModeGate::new(),
            target_mode: initial_mode,
            current_mode: SupvMode::None,
            current_state: SupvState::Busy,
            last_reported: None,
            transition_in_flight: initial_mode != SupvMode::Manual,
            nodes: nodes
                .iter()
                .map(|record| NodeEntry {
                    record: *record,
                    available: false,
                })
                .collect(),
        }
    }

    pub fn mode(&self) -> SupvMode {
        if self.target_mode == SupvMode::Manual {
            SupvMode::Manual
        } else {
            self.current_mode
        }
    }

    pub fn state(&self) -> SupvState {
        self.current_state
    }

    pub fn target_mode(&self) -> SupvMode {
        self.target_mode
    }

    /// Permission check for one API group in the current mode.
    pub fn check_api(&self, api: ApiIndex) -> Result<(), StackError> {
        self.gate.check_api(api, self.mode())
    }

    /// Validates and records a mode-change request. The caller drives the
    /// network starter with the returned target mode.
    pub fn request_mode(&mut self, to: SupvMode) -> Result<SupvMode, StackError> {
        self.check_api(ApiIndex::SupvSetMode)?;
        self.gate
            .check_transition(self.mode(), self.current_state, to)?;
        info!("[SUPV] Mode change {:?} -> {:?}", self.mode(), to);
        self.target_mode = to;
        self.transition_in_flight = true;
        Ok(to)
    }

    /// Internal transitions (programming/diagnosis exit) bypass the
    /// user-facing legality table.
    pub fn force_mode(&mut self, to: SupvMode) {
        info!("[SUPV] Internal mode change {:?} -> {:?}", self.mode(), to);
        self.target_mode = to;
        self.transition_in_flight = true;
    }

    /// `(mode, state)` updates from the network starter. Returns the pair
    /// to report to the application, if any.
    pub fn on_starter_state(
        &mut self,
        mode: SupvMode,
        state: SupvState,
    ) -> Option<(SupvMode, SupvState)> {
        self.current_mode = mode;
        self.current_state = state;
        if self.transition_in_flight {
            if mode != self.target_mode {
                // Late update of the previous mode; the application only
                // sees the one transition into the target mode.
                return None;
            }
            self.transition_in_flight = false;
        }
        let pair = (mode, state);
        if self.last_reported == Some(pair) {
            return None;
        }
        self.last_reported = Some(pair);
        Some(pair)
    }

    // --- Node-discovery delegation ---

    /// Evaluates a Hello response according to the current mode.
    pub fn nd_evaluate(
        &mut self,
        signature: &Signature,
        callbacks: &mut dyn SupervisorCallbacks,
    ) -> NdCheckResult {
        match self.mode() {
            SupvMode::Manual => callbacks.nd_evaluate(signature),
            SupvMode::Programming => {
                if signature.node_address == 0xFFFF {
                    // The local node carries no valid configuration yet;
                    // remote addressing cannot work like this.
                    callbacks.prog_event(ProgEventCode::LocalCfgError);
                }
                // Programming enumerates nodes without welcoming them; the
                // application picks its target from these signatures.
                callbacks.prog_signature(signature);
                NdCheckResult::Ignore
            }
            SupvMode::Normal => self.evaluate_node_record(signature),
            _ => NdCheckResult::Ignore,
        }
    }

    fn evaluate_node_record(&self, signature: &Signature) -> NdCheckResult {
        if self
            .nodes
            .iter()
            .any(|n| n.record.signature.node_address == signature.node_address)
        {
            return NdCheckResult::Welcome;
        }
        // Addresses outside the static node range cannot be part of the
        // application's topology.
        if signature.node_address < 0x0200 || signature.node_address >= 0x0F00 {
            NdCheckResult::Ignore
        } else {
            NdCheckResult::Unknown
        }
    }

    /// Discovery progress according to the current mode.
    pub fn nd_report(
        &mut self,
        report: &NdReport,
        callbacks: &mut dyn SupervisorCallbacks,
    ) -> Vec<SupvNotice> {
        let mut notices = Vec::new();
        match self.mode() {
            SupvMode::Manual => callbacks.nd_report(report),
            SupvMode::Normal => {
                if let NdReport::WelcomeSuccess(signature) = report {
                    notices.extend(self.set_node_availability(signature, true));
                }
            }
            _ => {}
        }
        notices
    }

    /// Marks every node unavailable, e.g. when the network went down.
    pub fn invalidate_nodes(&mut self) -> Vec<SupvNotice> {
        let mut notices = Vec::new();
        for entry in self.nodes.iter_mut().filter(|e| e.available) {
            entry.available = false;
            notices.push(SupvNotice::NodeAvailability(entry.record.signature, false));
        }
        notices
    }

    /// Manual-mode API: marks one node available or unavailable.
    pub fn set_node_available(
        &mut self,
        node_address: u16,
        available: bool,
    ) -> Result<Vec<SupvNotice>, StackError> {
        self.check_api(ApiIndex::ManualOnly)?;
        let signature = self
            .nodes
            .iter()
            .find(|n| n.record.signature.node_address == node_address)
            .map(|n| n.record.signature)
            .ok_or(StackError::ParamError)?;
        Ok(self.set_node_availability(&signature, available))
    }

    pub fn node_available(&self, node_address: u16) -> Result<bool, StackError> {
        self.check_api(ApiIndex::All)?;
        self.nodes
            .iter()
            .find(|n| n.record.signature.node_address == node_address)
            .map(|n| n.available)
            .ok_or(StackError::ParamError)
    }

    /// Whether the record for `node_address` allows remote programming.
    pub fn node_programmable(&self, node_address: u16) -> bool {
        self.nodes
            .iter()
            .find(|n| n.record.signature.node_address == node_address)
            .is_none_or(|n| n.record.programmable)
    }

    fn set_node_availability(&mut self, signature: &Signature, available: bool) -> Vec<SupvNotice> {
        let mut notices = Vec::new();
        match self
            .nodes
            .iter_mut()
            .find(|n| n.record.signature.node_address == signature.node_address)
        {
            Some(entry) if entry.available != available => {
                entry.available = available;
                notices.push(SupvNotice::NodeAvailability(entry.record.signature, available));
            }
            Some(_) => {}
            None => {
                warn!(
                    "[SUPV] Availability change for unknown node {:#06X}",
                    signature.node_address
                );
            }
        }
        notices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(addr: u16) -> NodeRecord {
        NodeRecord {
            signature: Signature {
                node_address: addr,
                ..Signature::default()
            },
            programmable: true,
        }
    }

    struct NullCallbacks;
    impl SupervisorCallbacks for NullCallbacks {
        fn report_mode(&mut self, _mode: SupvMode, _state: SupvState) {}
    }

    #[test]
    fn test_no_duplicate_reports() {
        let mut supv = Supervisor::new(SupvMode::Normal, &[]);
        assert_eq!(
            supv.on_starter_state(SupvMode::Normal, SupvState::Busy),
            Some((SupvMode::Normal, SupvState::Busy))
        );
        // Same pair again: swallowed.
        assert_eq!(supv.on_starter_state(SupvMode::Normal, SupvState::Busy), None);
        assert_eq!(
            supv.on_starter_state(SupvMode::Normal, SupvState::Ready),
            Some((SupvMode::Normal, SupvState::Ready))
        );
    }

    #[test]
    fn test_transition_coalesces_old_mode_reports() {
        let mut supv = Supervisor::new(SupvMode::Normal, &[]);
        supv.on_starter_state(SupvMode::Normal, SupvState::Busy);
        supv.on_starter_state(SupvMode::Normal, SupvState::Ready);
        supv.request_mode(SupvMode::Inactive).unwrap();
        // A late report of the old mode is suppressed.
        assert_eq!(supv.on_starter_state(SupvMode::Normal, SupvState::Busy), None);
        assert_eq!(
            supv.on_starter_state(SupvMode::Inactive, SupvState::Busy),
            Some((SupvMode::Inactive, SupvState::Busy))
        );
        assert_eq!(
            supv.on_starter_state(SupvMode::Inactive, SupvState::Ready),
            Some((SupvMode::Inactive, SupvState::Ready))
        );
    }

    #[test]
    fn test_manual_mode_rejects_set_mode() {
        let mut supv = Supervisor::new(SupvMode::Manual, &[]);
        assert_eq!(
            supv.request_mode(SupvMode::Normal),
            Err(StackError::NotSupported)
        );
        // Manual-only APIs pass.
        assert!(supv.check_api(ApiIndex::ManualOnly).is_ok());
    }

    #[test]
    fn test_programming_entry_needs_ready_inactive() {
        let mut supv = Supervisor::new(SupvMode::Inactive, &[]);
        supv.on_starter_state(SupvMode::Inactive, SupvState::Busy);
        assert_eq!(
            supv.request_mode(SupvMode::Programming),
            Err(StackError::ApiLocked)
        );
        supv.on_starter_state(SupvMode::Inactive, SupvState::Ready);
        assert_eq!(supv.request_mode(SupvMode::Programming), Ok(SupvMode::Programming));
    }

    #[test]
    fn test_node_records_drive_evaluation() {
        let mut supv = Supervisor::new(SupvMode::Normal, &[node(0x0201)]);
        supv.on_starter_state(SupvMode::Normal, SupvState::Ready);
        let mut callbacks = NullCallbacks;
        let known = Signature {
            node_address: 0x0201,
            ..Signature::default()
        };
        let stranger = Signature {
            node_address: 0x0260,
            ..Signature::default()
        };
        let out_of_range = Signature {
            node_address: 0x0F05,
            ..Signature::default()
        };
        assert_eq!(
            supv.nd_evaluate(&known, &mut callbacks),
            NdCheckResult::Welcome
        );
        assert_eq!(
            supv.nd_evaluate(&stranger, &mut callbacks),
            NdCheckResult::Unknown
        );
        assert_eq!(
            supv.nd_evaluate(&out_of_range, &mut callbacks),
            NdCheckResult::Ignore
        );
        // Welcome success marks the record available.
        let notices = supv.nd_report(&NdReport::WelcomeSuccess(known), &mut callbacks);
        assert_eq!(notices, alloc::vec![SupvNotice::NodeAvailability(known, true)]);
        assert_eq!(supv.node_available(0x0201), Ok(true));
        // Losing the network invalidates it again.
        let notices = supv.invalidate_nodes();
        assert_eq!(
            notices,
            alloc::vec![SupvNotice::NodeAvailability(known, false)]
        );
    }
}
