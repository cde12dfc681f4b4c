//! Network-Starter.
//!
//! Maps the current network availability onto the job queue required to
//! reach the target supervisor mode. Each incoming network status picks at
//! most one queue; while a queue is pending, further status changes are
//! only remembered in a shadow copy. A failed queue arms the status guard
//! timer which re-injects the shadow status to re-evaluate.

use crate::event::ClientId;
use crate::hal::StackError;
use crate::inic::{Inic, InicEvent};
use crate::jobs::{JobQueue, JobResult, QueueStep};
use crate::timer::{TimerId, TimerMgr};
use crate::types::{
    NetworkAvailInfo, NetworkAvailability, NetworkStatus, SupvMode, SupvState, Ticks,
    AUTOFORCED_NA_TIME, NWS_M_AVAIL,
};
use alloc::vec::Vec;
use log::{error, info};

/// Status observer change mask used by the starter (availability,
/// availability info, transition cause and node address).
pub const NTS_NWSTATUS_MASK: u32 = 0x0F;

/// First guard expiry after a failed job queue.
const STATUS_GUARD_TIME_EARLY: u16 = 200;

/// Guard period catching silently missed status updates.
const STATUS_GUARD_TIME_PERIOD: u16 = 10_000;

/// Fallback duration meaning "remote nodes never leave fallback".
pub const FALLBACK_DURATION_INFINITE: u16 = 0xFFFF;

/// The sequential actions the starter can schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StarterAction {
    LeaveForcedNa,
    Startup,
    InitAll,
    Shutdown,
    FallbackStart,
    FallbackStop,
}

/// Identifies one of the pre-built job queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueKind {
    Startup,
    ForceStartup,
    Shutdown,
    LeaveForcedNa,
    Restart,
    FallbackStart,
    FallbackStop,
}

/// Cross-component requests the instance routes for the starter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StarterNotice {
    /// `(mode, state)` changed; forwarded to the supervisor.
    StateChanged(SupvMode, SupvState),
    /// Ask fallback protection to bring the ring into fallback operation.
    StartFallbackProtection(u16),
    /// Ask fallback protection to leave fallback operation.
    StopFallbackProtection,
    /// Broadcast the un-welcome reset to all nodes.
    TriggerInitAll,
}

/// Result codes of a finished fallback-protection run, as far as the
/// starter cares about them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackOutcome {
    Success,
    End,
    Failed,
}

pub struct NetStarter {
    run_mode: SupvMode,
    state: SupvState,
    state_known: bool,
    initial: bool,
    pending_startup: bool,
    packet_bw: u16,
    proxy_channel_bw: u16,
    fallback_duration: u16,
    current_queue: Option<QueueKind>,
    q_startup: JobQueue<StarterAction>,
    q_force_startup: JobQueue<StarterAction>,
    q_shutdown: JobQueue<StarterAction>,
    q_leave_forced_na: JobQueue<StarterAction>,
    q_restart: JobQueue<StarterAction>,
    q_fallback_start: JobQueue<StarterAction>,
    q_fallback_stop: JobQueue<StarterAction>,
    /// Last notified status, re-injected by the guard timer.
    shadow: Option<NetworkStatus>,
}

impl NetStarter {
    pub fn new(packet_bw: u16, proxy_channel_bw: u16) -> Self {
        Self {
            run_mode: SupvMode::None,
            state: SupvState::Busy,
            state_known: false,
            initial: true,
            pending_startup: false,
            packet_bw,
            proxy_channel_bw,
            fallback_duration: FALLBACK_DURATION_INFINITE,
            current_queue: None,
            q_startup: JobQueue::new(
                "startup",
                &[StarterAction::Startup, StarterAction::InitAll],
            ),
            q_force_startup: JobQueue::new(
                "force-startup",
                &[
                    StarterAction::LeaveForcedNa,
                    StarterAction::Startup,
                    StarterAction::InitAll,
                ],
            ),
            q_shutdown: JobQueue::new("shutdown", &[StarterAction::Shutdown]),
            q_leave_forced_na: JobQueue::new("leave-forced-na", &[StarterAction::LeaveForcedNa]),
            q_restart: JobQueue::new(
                "restart",
                &[
                    StarterAction::Shutdown,
                    StarterAction::Startup,
                    StarterAction::InitAll,
                ],
            ),
            q_fallback_start: JobQueue::new("fallback-start", &[StarterAction::FallbackStart]),
            q_fallback_stop: JobQueue::new("fallback-stop", &[StarterAction::FallbackStop]),
            shadow: None,
        }
    }

    pub fn mode(&self) -> SupvMode {
        self.run_mode
    }

    pub fn state(&self) -> SupvState {
        self.state
    }

    pub fn set_fallback_duration(&mut self, duration: u16) {
        self.fallback_duration = duration;
    }

    fn queue_mut(&mut self, kind: QueueKind) -> &mut JobQueue<StarterAction> {
        match kind {
            QueueKind::Startup => &mut self.q_startup,
            QueueKind::ForceStartup => &mut self.q_force_startup,
            QueueKind::Shutdown => &mut self.q_shutdown,
            QueueKind::LeaveForcedNa => &mut self.q_leave_forced_na,
            QueueKind::Restart => &mut self.q_restart,
            QueueKind::FallbackStart => &mut self.q_fallback_start,
            QueueKind::FallbackStop => &mut self.q_fallback_stop,
        }
    }

    fn set_state(&mut self, state: SupvState, notices: &mut Vec<StarterNotice>) {
        if !self.state_known || state != self.state {
            self.state_known = true;
            self.state = state;
            info!(
                "[NTS] State change: mode={:?}, state={:?}",
                self.run_mode, state
            );
            notices.push(StarterNotice::StateChanged(self.run_mode, state));
        } else {
            self.state = state;
        }
    }

    /// Sets a new target mode.
    ///
    /// Un-registers the previous network-status observer, stops a pending
    /// queue, resets the initial flag and re-registers the observer so the
    /// current status is re-evaluated under the new mode.
    pub fn start_process(
        &mut self,
        target_mode: SupvMode,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Result<Vec<StarterNotice>, StackError> {
        info!("[NTS] Starting process for mode {:?}", target_mode);
        if target_mode == SupvMode::Manual {
            return Err(StackError::NotSupported);
        }
        if target_mode == self.run_mode {
            return Err(StackError::AlreadySet);
        }
        if self.run_mode != SupvMode::None {
            inic.unregister_status_observer(ClientId::Starter);
        }
        if let Some(kind) = self.current_queue.take() {
            self.queue_mut(kind).stop();
        }
        timers.stop(TimerId::StarterGuard);
        self.initial = true;
        self.run_mode = target_mode;
        let mut notices = Vec::new();
        self.state_known = false;
        self.set_state(SupvState::Busy, &mut notices);
        if self.run_mode != SupvMode::None {
            inic.register_status_observer(ClientId::Starter, NTS_NWSTATUS_MASK);
            // Re-evaluate the last known status right away instead of
            // waiting for the INIC to publish the next change.
            if let Some(status) = inic.current_status() {
                self.check_network_status(&status, u32::MAX, now, inic, timers, &mut notices);
            }
        }
        Ok(notices)
    }

    /// Entry point for status notifications from the INIC multiplexer.
    pub fn on_network_status(
        &mut self,
        status: &NetworkStatus,
        change_mask: u32,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Vec<StarterNotice> {
        self.shadow = Some(*status);
        let mut notices = Vec::new();
        // A live notification always re-evaluates with the full mask, the
        // subscription mask already filtered relevance.
        let _ = change_mask;
        self.check_network_status(status, u32::MAX, now, inic, timers, &mut notices);
        notices
    }

    /// The status guard expired; re-inject the shadow status.
    pub fn on_guard_timer(
        &mut self,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Vec<StarterNotice> {
        let mut notices = Vec::new();
        if let Some(status) = self.shadow {
            info!("[NTS] Guard timer: injecting network status shadow");
            self.check_network_status(&status, u32::MAX, now, inic, timers, &mut notices);
        }
        notices
    }

    fn check_network_status(
        &mut self,
        status: &NetworkStatus,
        change_mask: u32,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
        notices: &mut Vec<StarterNotice>,
    ) {
        if self.current_queue.is_some() {
            // Never spawn a second queue while one is pending.
            return;
        }
        match self.run_mode {
            SupvMode::Normal => {
                self.check_available(status, change_mask, now, inic, timers, notices)
            }
            SupvMode::Inactive => {
                self.check_na_regular(status, change_mask, false, now, inic, timers, notices)
            }
            SupvMode::Fallback => self.check_fallback(status, now, inic, timers, notices),
            SupvMode::Diagnosis => {
                self.check_na_regular(status, change_mask, true, now, inic, timers, notices)
            }
            SupvMode::Programming => self.check_programming(status, change_mask, notices),
            _ => {}
        }
    }

    /// Target: network available in regular operation (Normal mode).
    fn check_available(
        &mut self,
        status: &NetworkStatus,
        change_mask: u32,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
        notices: &mut Vec<StarterNotice>,
    ) {
        if (change_mask & NWS_M_AVAIL) == 0 {
            return;
        }
        if status.avail_info == NetworkAvailInfo::ForcedNotAvailable {
            self.start_queue(QueueKind::ForceStartup, now, inic, timers, notices);
        } else if status.avail_info == NetworkAvailInfo::Fallback {
            self.start_queue(QueueKind::FallbackStop, now, inic, timers, notices);
        } else if status.availability == NetworkAvailability::NotAvailable {
            self.start_queue(QueueKind::Startup, now, inic, timers, notices);
        } else if status.packet_bw != self.packet_bw {
            self.start_queue(QueueKind::Restart, now, inic, timers, notices);
        }

        if self.initial {
            self.initial = false;
            if status.node_position == 0 && self.current_queue.is_none() {
                info!("[NTS] Initial state is Available, triggering InitAll");
                notices.push(StarterNotice::TriggerInitAll);
                self.set_state(SupvState::Ready, notices);
            }
        }
    }

    /// Target: network not available, regular info (Inactive mode and, with
    /// `initial_only`, the pre-diagnosis settling).
    fn check_na_regular(
        &mut self,
        status: &NetworkStatus,
        change_mask: u32,
        initial_only: bool,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
        notices: &mut Vec<StarterNotice>,
    ) {
        if (change_mask & NWS_M_AVAIL) == 0 {
            return;
        }
        if initial_only {
            if !self.initial {
                return;
            }
            self.initial = false;
        }
        if status.availability == NetworkAvailability::Available {
            self.start_queue(QueueKind::Shutdown, now, inic, timers, notices);
        } else if status.avail_info == NetworkAvailInfo::ForcedNotAvailable {
            self.start_queue(QueueKind::LeaveForcedNa, now, inic, timers, notices);
        } else if status.avail_info == NetworkAvailInfo::Fallback {
            self.start_queue(QueueKind::FallbackStop, now, inic, timers, notices);
        } else if status.avail_info == NetworkAvailInfo::Regular {
            if self.pending_startup {
                // A startup command is still in flight; shut down so the
                // network does not come up behind our back.
                self.start_queue(QueueKind::Shutdown, now, inic, timers, notices);
            } else {
                self.set_state(SupvState::Ready, notices);
            }
        }
    }

    /// Target: fallback operation; only the initial status drives a job.
    fn check_fallback(
        &mut self,
        status: &NetworkStatus,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
        notices: &mut Vec<StarterNotice>,
    ) {
        if !self.initial {
            return;
        }
        self.initial = false;
        if status.avail_info == NetworkAvailInfo::Fallback {
            self.set_state(SupvState::Ready, notices);
        } else {
            self.start_queue(QueueKind::FallbackStart, now, inic, timers, notices);
        }
    }

    /// Programming mode may only be entered from a quiet network; anything
    /// other than NotAvailable.Regular keeps the starter busy.
    fn check_programming(
        &mut self,
        status: &NetworkStatus,
        change_mask: u32,
        notices: &mut Vec<StarterNotice>,
    ) {
        if (change_mask & NWS_M_AVAIL) == 0 || !self.initial {
            return;
        }
        self.initial = false;
        if status.availability == NetworkAvailability::NotAvailable
            && status.avail_info == NetworkAvailInfo::Regular
        {
            self.set_state(SupvState::Ready, notices);
        }
    }

    fn start_queue(
        &mut self,
        kind: QueueKind,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
        notices: &mut Vec<StarterNotice>,
    ) {
        info!("[NTS] Starting job queue '{}'", self.queue_mut(kind).name());
        self.current_queue = Some(kind);
        let first = self.queue_mut(kind).start(ClientId::Starter);
        self.set_state(SupvState::Busy, notices);
        if let Some(action) = first {
            self.execute_action(action, now, inic, timers, notices);
        }
    }

    /// Performs one job action. Immediate failures feed straight back into
    /// the queue; command-driven actions complete via `on_inic_event`.
    fn execute_action(
        &mut self,
        action: StarterAction,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
        notices: &mut Vec<StarterNotice>,
    ) {
        let sent = match action {
            StarterAction::LeaveForcedNa => inic.network_force_na(false, ClientId::Starter),
            StarterAction::Startup => {
                let ret = if self.proxy_channel_bw == 0 {
                    inic.network_startup(AUTOFORCED_NA_TIME, self.packet_bw, ClientId::Starter)
                } else {
                    inic.network_startup_ext(
                        AUTOFORCED_NA_TIME,
                        self.packet_bw,
                        self.proxy_channel_bw,
                        ClientId::Starter,
                    )
                };
                if ret.is_ok() {
                    self.pending_startup = true;
                }
                ret
            }
            StarterAction::Shutdown => inic.network_shutdown(ClientId::Starter),
            StarterAction::InitAll => {
                // Always successful, just fires the broadcast.
                notices.push(StarterNotice::TriggerInitAll);
                self.finish_job(JobResult::Success, now, inic, timers, notices);
                return;
            }
            StarterAction::FallbackStart => {
                notices.push(StarterNotice::StartFallbackProtection(
                    self.fallback_duration,
                ));
                return;
            }
            StarterAction::FallbackStop => {
                notices.push(StarterNotice::StopFallbackProtection);
                return;
            }
        };
        if let Err(e) = sent {
            error!("[NTS] Action {:?} could not be sent: {}", action, e);
            self.finish_job(JobResult::Failed, now, inic, timers, notices);
        }
    }

    fn finish_job(
        &mut self,
        result: JobResult,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
        notices: &mut Vec<StarterNotice>,
    ) {
        let Some(kind) = self.current_queue else {
            return;
        };
        match self.queue_mut(kind).set_result(result) {
            Some(QueueStep::Next(action)) => {
                self.execute_action(action, now, inic, timers, notices);
            }
            Some(QueueStep::Finished(final_result)) => {
                let _ = self.queue_mut(kind).take_observer();
                self.current_queue = None;
                if final_result == JobResult::Success {
                    self.set_state(SupvState::Ready, notices);
                } else {
                    error!("[NTS] Job queue failed, arming status guard");
                    timers.stop(TimerId::StarterGuard);
                    let _ = timers.start_periodic(
                        TimerId::StarterGuard,
                        STATUS_GUARD_TIME_EARLY,
                        STATUS_GUARD_TIME_PERIOD,
                        now,
                    );
                }
            }
            None => {}
        }
    }

    /// Command results from the local INIC.
    pub fn on_inic_event(
        &mut self,
        event: &InicEvent,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Vec<StarterNotice> {
        let mut notices = Vec::new();
        let result = match event {
            InicEvent::NetworkStartup(res) => {
                self.pending_startup = false;
                if !res.is_success() {
                    // Packet/proxy bandwidth rejections are configuration
                    // faults worth a dedicated log line.
                    if res.info.first() == Some(&0x06) || res.info.get(2) == Some(&0x41) {
                        error!(
                            "[NTS] Startup rejected: packet or proxy channel bandwidth \
                             does not match the connected INIC"
                        );
                    }
                }
                Self::to_job_result(res.is_success())
            }
            InicEvent::NetworkShutdown(res) => Self::to_job_result(res.is_success()),
            InicEvent::NetworkForceNa(res) => Self::to_job_result(res.is_success()),
            _ => return notices,
        };
        self.finish_job(result, now, inic, timers, &mut notices);
        notices
    }

    /// Outcome of a fallback-protection run requested by this component.
    pub fn on_fallback_outcome(
        &mut self,
        outcome: FallbackOutcome,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Vec<StarterNotice> {
        let mut notices = Vec::new();
        let expected = match self.current_queue {
            Some(QueueKind::FallbackStart) => outcome == FallbackOutcome::Success,
            Some(QueueKind::FallbackStop) => outcome == FallbackOutcome::End,
            _ => return notices,
        };
        self.finish_job(
            Self::to_job_result(expected),
            now,
            inic,
            timers,
            &mut notices,
        );
        notices
    }

    fn to_job_result(success: bool) -> JobResult {
        if success {
            JobResult::Success
        } else {
            JobResult::Failed
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::PortMessage;
    use crate::types::OpType;
    use crate::types::{FBLOCK_INIC, INIC_FID_NETWORK_STARTUP};

    fn na_regular() -> NetworkStatus {
        NetworkStatus::default()
    }

    fn available(packet_bw: u16) -> NetworkStatus {
        NetworkStatus {
            availability: NetworkAvailability::Available,
            packet_bw,
            ..NetworkStatus::default()
        }
    }

    fn setup() -> (NetStarter, Inic, TimerMgr) {
        (NetStarter::new(52, 0), Inic::new(), TimerMgr::new())
    }

    #[test]
    fn test_normal_mode_starts_startup_queue() {
        let (mut nts, mut inic, mut timers) = setup();
        let notices = nts
            .start_process(SupvMode::Normal, 0, &mut inic, &mut timers)
            .unwrap();
        assert!(notices.contains(&StarterNotice::StateChanged(SupvMode::Normal, SupvState::Busy)));
        let notices = nts.on_network_status(&na_regular(), 0x7F, 0, &mut inic, &mut timers);
        assert!(notices.is_empty());
        // The startup command is on the wire now.
        let msg = inic.xcvr.pop().unwrap();
        assert_eq!(msg.id.func_id, INIC_FID_NETWORK_STARTUP);
    }

    #[test]
    fn test_no_second_queue_while_pending() {
        let (mut nts, mut inic, mut timers) = setup();
        nts.start_process(SupvMode::Normal, 0, &mut inic, &mut timers)
            .unwrap();
        nts.on_network_status(&na_regular(), 0x7F, 0, &mut inic, &mut timers);
        assert!(inic.xcvr.pop().is_some());
        // Another status change while the startup queue runs is shelved.
        nts.on_network_status(&na_regular(), 0x7F, 0, &mut inic, &mut timers);
        assert!(inic.xcvr.pop().is_none());
    }

    #[test]
    fn test_startup_success_runs_init_all_then_ready() {
        let (mut nts, mut inic, mut timers) = setup();
        nts.start_process(SupvMode::Normal, 0, &mut inic, &mut timers)
            .unwrap();
        nts.on_network_status(&na_regular(), 0x7F, 0, &mut inic, &mut timers);
        let _ = inic.xcvr.pop();
        // Simulate the INIC confirming the startup.
        let msg = PortMessage::new(1, FBLOCK_INIC, INIC_FID_NETWORK_STARTUP, OpType::Result);
        let event = match inic.on_rx(&msg) {
            crate::inic::InicRx::Single(ClientId::Starter, ev) => ev,
            other => panic!("unexpected: {:?}", other),
        };
        let notices = nts.on_inic_event(&event, 0, &mut inic, &mut timers);
        assert!(notices.contains(&StarterNotice::TriggerInitAll));
        assert!(notices.contains(&StarterNotice::StateChanged(
            SupvMode::Normal,
            SupvState::Ready
        )));
    }

    #[test]
    fn test_wrong_packet_bw_restarts() {
        let (mut nts, mut inic, mut timers) = setup();
        nts.start_process(SupvMode::Normal, 0, &mut inic, &mut timers)
            .unwrap();
        nts.on_network_status(&available(30), 0x7F, 0, &mut inic, &mut timers);
        // Restart begins with a shutdown command.
        let msg = inic.xcvr.pop().unwrap();
        assert_eq!(msg.id.func_id, crate::types::INIC_FID_NETWORK_SHUTDOWN);
    }

    #[test]
    fn test_initial_available_triggers_init_all_and_ready() {
        let (mut nts, mut inic, mut timers) = setup();
        nts.start_process(SupvMode::Normal, 0, &mut inic, &mut timers)
            .unwrap();
        let notices = nts.on_network_status(&available(52), 0x7F, 0, &mut inic, &mut timers);
        assert!(notices.contains(&StarterNotice::TriggerInitAll));
        assert!(notices.contains(&StarterNotice::StateChanged(
            SupvMode::Normal,
            SupvState::Ready
        )));
        assert!(inic.xcvr.pop().is_none());
    }

    #[test]
    fn test_inactive_mode_ready_when_quiet() {
        let (mut nts, mut inic, mut timers) = setup();
        nts.start_process(SupvMode::Inactive, 0, &mut inic, &mut timers)
            .unwrap();
        let notices = nts.on_network_status(&na_regular(), 0x7F, 0, &mut inic, &mut timers);
        assert!(notices.contains(&StarterNotice::StateChanged(
            SupvMode::Inactive,
            SupvState::Ready
        )));
    }

    #[test]
    fn test_inactive_mode_shuts_down_available_network() {
        let (mut nts, mut inic, mut timers) = setup();
        nts.start_process(SupvMode::Inactive, 0, &mut inic, &mut timers)
            .unwrap();
        nts.on_network_status(&available(52), 0x7F, 0, &mut inic, &mut timers);
        let msg = inic.xcvr.pop().unwrap();
        assert_eq!(msg.id.func_id, crate::types::INIC_FID_NETWORK_SHUTDOWN);
    }

    #[test]
    fn test_fallback_mode_delegates_to_protection() {
        let (mut nts, mut inic, mut timers) = setup();
        nts.set_fallback_duration(0x1234);
        nts.start_process(SupvMode::Fallback, 0, &mut inic, &mut timers)
            .unwrap();
        let notices = nts.on_network_status(&na_regular(), 0x7F, 0, &mut inic, &mut timers);
        assert!(notices.contains(&StarterNotice::StartFallbackProtection(0x1234)));
        // Success report finishes the queue.
        let notices =
            nts.on_fallback_outcome(FallbackOutcome::Success, 0, &mut inic, &mut timers);
        assert!(notices.contains(&StarterNotice::StateChanged(
            SupvMode::Fallback,
            SupvState::Ready
        )));
    }

    #[test]
    fn test_same_mode_rejected() {
        let (mut nts, mut inic, mut timers) = setup();
        nts.start_process(SupvMode::Normal, 0, &mut inic, &mut timers)
            .unwrap();
        assert_eq!(
            nts.start_process(SupvMode::Normal, 0, &mut inic, &mut timers)
                .unwrap_err(),
            StackError::AlreadySet
        );
        assert_eq!(
            nts.start_process(SupvMode::Manual, 0, &mut inic, &mut timers)
                .unwrap_err(),
            StackError::NotSupported
        );
    }

    #[test]
    fn test_failed_queue_arms_guard() {
        let (mut nts, mut inic, mut timers) = setup();
        nts.start_process(SupvMode::Normal, 0, &mut inic, &mut timers)
            .unwrap();
        nts.on_network_status(&na_regular(), 0x7F, 0, &mut inic, &mut timers);
        let _ = inic.xcvr.pop();
        let msg = PortMessage::new(1, FBLOCK_INIC, INIC_FID_NETWORK_STARTUP, OpType::Error);
        let event = match inic.on_rx(&msg) {
            crate::inic::InicRx::Single(ClientId::Starter, ev) => ev,
            other => panic!("unexpected: {:?}", other),
        };
        nts.on_inic_event(&event, 0, &mut inic, &mut timers);
        assert!(timers.is_armed(TimerId::StarterGuard));
        // The guard re-injects the shadow and starts the queue again.
        nts.on_guard_timer(250, &mut inic, &mut timers);
        assert!(inic.xcvr.pop().is_some());
    }
}
