//! FullDuplex segment diagnosis.
//!
//! Explores the network branch by branch and segment by segment. Each
//! segment is probed with a retried Hello broadcast and bound with a
//! Welcome; a silent segment is narrowed down with a cable-link diagnosis
//! on the last reachable node's port. The local INIC stays in full-duplex
//! diagnosis mode for the whole walk.

use crate::event::ClientId;
use crate::exc::wire::{CableLinkDiagResult, HelloStatus, WelcomeResult, WELCOME_SUCCESS};
use crate::exc::{Exc, ExcEvent, ExcResult, ExcSlot};
use crate::hal::StackError;
use crate::inic::{Inic, InicEvent, InicSlot};
use crate::timer::{TimerId, TimerMgr};
use crate::types::{
    MsgResult, Signature, Ticks, ADDR_ADMIN_BASE, ADDR_BROADCAST_BLOCKING, ADDR_LOCAL_INIC,
    ADDR_LOCAL_NODE_POS, SIGNATURE_VERSION,
};
use alloc::vec::Vec;
use log::{info, warn};

/// Number of Hello.Get retries per segment.
const FDX_NUM_HELLO: u8 = 10;

/// Timeout between Hello.Get retries.
const FDX_TIMEOUT_HELLO: u16 = 150;

/// Timeout supervising INIC commands.
const FDX_TIMEOUT_COMMAND: u16 = 100;

/// Timeout supervising the cable-link diagnosis.
const FDX_TIMEOUT_CABLE_DIAGNOSIS: u16 = 3000;

/// FS error "port not used" reported by EnablePort.
const FDX_FS_PORT_NOT_USED: u32 = 0x200333;

/// FS error "port not configured for full-duplex" reported by EnablePort.
const FDX_FS_NO_FDX_MODE: u32 = 0x200440;

/// Error classification inside an [`FdxReport::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdxError {
    Unspecified,
    WelcomeNoSuccess,
    PortNotUsed,
    NoFdxMode,
    StopDiagFailed,
    Terminated,
}

/// One explored segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FdxSegment {
    pub branch: u8,
    pub num: u8,
    pub source: Signature,
    pub target: Signature,
}

/// Progress and result reports of the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdxReport {
    /// A segment was successfully bound into the walk.
    SegmentFound(FdxSegment),
    /// Cable-link diagnosis result for a dead segment.
    CableLinkResult {
        branch: u8,
        segment: u8,
        source: Signature,
        cable_link_info: u8,
    },
    Error {
        segment: FdxSegment,
        error: FdxError,
    },
    Aborted,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FdxState {
    Idle,
    WaitDiag,
    WaitHello,
    HelloTimeout,
    WaitWelcome,
    NextPort,
    WaitEnable,
    WaitDisable,
    CableLinkDiag,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FdxEvent {
    NwFdxOk,
    HelloOk,
    HelloRetry,
    HelloAllDone,
    Welcome,
    AllDone,
    PortFound,
    PortEnabled,
    PortNotEnabled,
    PortDisabled,
    BranchFound,
    CableLinkRes,
    Error,
    Timeout,
    NoSuccess,
}

/// What the previous step of the walk established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastResult {
    Init,
    Segment,
    CableLink,
}

/// Identity of one end of the segment under test.
#[derive(Debug, Clone, Copy, Default)]
struct NodeInfo {
    node_address: u16,
    signature: Signature,
}

pub struct FdxDiag {
    state: FdxState,
    started: bool,
    hello_retry: u8,
    curr_branch: u8,
    segment_nr: u8,
    /// Port count of the timing master, fixes the number of branches.
    num_ports: u8,
    admin_node_address: u16,
    last_result: LastResult,
    master: NodeInfo,
    source: NodeInfo,
    target: NodeInfo,
    /// Event cascade queue of the FSM; internal events produced by an
    /// action are handled before returning to the scheduler.
    chain: Option<FdxEvent>,
}

impl FdxDiag {
    pub fn new() -> Self {
        Self {
            state: FdxState::Idle,
            started: false,
            hello_retry: 0,
            curr_branch: 0,
            segment_nr: 0,
            num_ports: 0,
            admin_node_address: 0,
            last_result: LastResult::Init,
            master: NodeInfo::default(),
            source: NodeInfo::default(),
            target: NodeInfo::default(),
            chain: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.started
    }

    /// Starts the full-duplex diagnosis walk.
    pub fn start(
        &mut self,
        now: Ticks,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Result<(), StackError> {
        if self.started {
            return Err(StackError::ApiLocked);
        }
        exc.reserve_service(ClientId::DiagFdx)?;
        info!("[FDX] Starting full-duplex diagnosis");
        self.started = true;
        self.hello_retry = FDX_NUM_HELLO;
        self.curr_branch = 0;
        self.segment_nr = 0;
        self.num_ports = 0;
        self.last_result = LastResult::Init;
        self.master = NodeInfo::default();
        self.source = NodeInfo::default();
        self.target = NodeInfo::default();
        if let Err(e) = inic.network_diag_fdx(ClientId::DiagFdx) {
            self.started = false;
            exc.release_service(ClientId::DiagFdx);
            return Err(e);
        }
        timers.restart(TimerId::DiagFdx, FDX_TIMEOUT_COMMAND, now);
        self.state = FdxState::WaitDiag;
        Ok(())
    }

    /// Application abort; the walk reports `Aborted` and shuts the
    /// diagnosis mode down.
    pub fn stop(
        &mut self,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Vec<FdxReport> {
        let mut reports = Vec::new();
        if self.started && self.state != FdxState::Idle && self.state != FdxState::End {
            reports.push(FdxReport::Aborted);
            timers.stop(TimerId::DiagFdx);
            self.fdx_stop(now, inic, timers, &mut reports);
        }
        reports
    }

    /// Fatal termination: report and reset without further commands.
    pub fn terminate(
        &mut self,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Vec<FdxReport> {
        let mut reports = Vec::new();
        if self.started {
            timers.stop(TimerId::DiagFdx);
            exc.cancel(ExcSlot::Hello);
            exc.cancel(ExcSlot::Welcome);
            exc.cancel(ExcSlot::EnablePort);
            exc.cancel(ExcSlot::CableLinkDiag);
            inic.cancel(InicSlot::NetworkDiagFdx);
            inic.cancel(InicSlot::NetworkDiagFdxEnd);
            reports.push(FdxReport::Error {
                segment: self.segment(),
                error: FdxError::Terminated,
            });
            reports.push(FdxReport::Finished);
            exc.release_service(ClientId::DiagFdx);
            self.started = false;
            self.state = FdxState::Idle;
        }
        reports
    }

    fn segment(&self) -> FdxSegment {
        FdxSegment {
            branch: self.curr_branch,
            num: self.segment_nr,
            source: self.source.signature,
            target: self.target.signature,
        }
    }

    /// Responses from the EXC facade.
    pub fn on_exc_event(
        &mut self,
        event: &ExcEvent,
        now: Ticks,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Vec<FdxReport> {
        let mut reports = Vec::new();
        timers.stop(TimerId::DiagFdx);
        let fsm_event = match event {
            ExcEvent::Hello(res) => self.eval_hello(res),
            ExcEvent::Welcome(res) => self.eval_welcome(res, &mut reports),
            ExcEvent::EnablePort(res) => {
                if self.state == FdxState::WaitDisable {
                    self.eval_disable_port(res)
                } else {
                    self.eval_enable_port(res, &mut reports)
                }
            }
            ExcEvent::CableLinkDiag(res) => self.eval_cable_link(res, &mut reports),
            _ => return reports,
        };
        self.run(fsm_event, now, exc, inic, timers, &mut reports);
        reports
    }

    /// Results of the local INIC diagnosis commands.
    pub fn on_inic_event(
        &mut self,
        event: &InicEvent,
        now: Ticks,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Vec<FdxReport> {
        let mut reports = Vec::new();
        let fsm_event = match event {
            InicEvent::NetworkDiagFdx(res) | InicEvent::NetworkDiagFdxEnd(res) => {
                // Only the entry and exit states wait for these results; a
                // late response must not disturb the walk.
                if !matches!(self.state, FdxState::WaitDiag | FdxState::End) {
                    return reports;
                }
                timers.stop(TimerId::DiagFdx);
                if res.is_success() {
                    FdxEvent::NwFdxOk
                } else {
                    FdxEvent::Error
                }
            }
            _ => return reports,
        };
        self.run(fsm_event, now, exc, inic, timers, &mut reports);
        reports
    }

    /// The supervision timer expired.
    pub fn on_timer(
        &mut self,
        now: Ticks,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Vec<FdxReport> {
        let mut reports = Vec::new();
        // The pending observer would otherwise swallow a late response.
        exc.cancel(ExcSlot::Hello);
        exc.cancel(ExcSlot::Welcome);
        exc.cancel(ExcSlot::EnablePort);
        exc.cancel(ExcSlot::CableLinkDiag);
        inic.cancel(InicSlot::NetworkDiagFdx);
        inic.cancel(InicSlot::NetworkDiagFdxEnd);
        self.run(FdxEvent::Timeout, now, exc, inic, timers, &mut reports);
        reports
    }

    fn eval_hello(&mut self, res: &ExcResult<HelloStatus>) -> FdxEvent {
        match res.data.as_ref().filter(|_| res.is_success()) {
            Some(hello) => {
                self.target.signature = hello.signature;
                self.target.node_address = hello.signature.node_address;
                if self.segment_nr != 0 {
                    // Remote targets are addressed by node position.
                    self.target.node_address =
                        ADDR_LOCAL_NODE_POS + u16::from(self.segment_nr);
                }
                FdxEvent::HelloOk
            }
            None if res.code == MsgResult::Timeout => FdxEvent::Timeout,
            None => FdxEvent::Error,
        }
    }

    fn eval_welcome(
        &mut self,
        res: &ExcResult<WelcomeResult>,
        reports: &mut Vec<FdxReport>,
    ) -> FdxEvent {
        match res.data.as_ref().filter(|_| res.is_success()) {
            Some(welcome) if welcome.res == WELCOME_SUCCESS => {
                if self.segment_nr == 0 {
                    self.num_ports = self.target.signature.num_ports;
                } else {
                    self.last_result = LastResult::Segment;
                    // The local node itself is not reported.
                    reports.push(FdxReport::SegmentFound(self.segment()));
                }
                FdxEvent::Welcome
            }
            Some(_) => {
                reports.push(FdxReport::Error {
                    segment: self.segment(),
                    error: FdxError::WelcomeNoSuccess,
                });
                FdxEvent::NoSuccess
            }
            None if res.code == MsgResult::Timeout => FdxEvent::Timeout,
            None => FdxEvent::Error,
        }
    }

    fn eval_enable_port(
        &mut self,
        res: &ExcResult<()>,
        reports: &mut Vec<FdxReport>,
    ) -> FdxEvent {
        if res.is_success() {
            self.segment_nr += 1;
            self.hello_retry = FDX_NUM_HELLO;
            return FdxEvent::PortEnabled;
        }
        if res.code == MsgResult::Timeout {
            return FdxEvent::Timeout;
        }
        match res.fs_error_code() {
            Some(FDX_FS_PORT_NOT_USED) => {
                reports.push(FdxReport::Error {
                    segment: self.segment(),
                    error: FdxError::PortNotUsed,
                });
                FdxEvent::PortNotEnabled
            }
            Some(FDX_FS_NO_FDX_MODE) => {
                reports.push(FdxReport::Error {
                    segment: self.segment(),
                    error: FdxError::NoFdxMode,
                });
                FdxEvent::PortNotEnabled
            }
            _ => FdxEvent::Error,
        }
    }

    fn eval_disable_port(&mut self, res: &ExcResult<()>) -> FdxEvent {
        if res.is_success() {
            FdxEvent::PortDisabled
        } else if res.code == MsgResult::Timeout {
            FdxEvent::Timeout
        } else {
            FdxEvent::Error
        }
    }

    fn eval_cable_link(
        &mut self,
        res: &ExcResult<CableLinkDiagResult>,
        reports: &mut Vec<FdxReport>,
    ) -> FdxEvent {
        match res.data.as_ref().filter(|_| res.is_success()) {
            Some(result) => {
                reports.push(FdxReport::CableLinkResult {
                    branch: self.curr_branch,
                    segment: self.segment_nr,
                    source: self.source.signature,
                    cable_link_info: result.result,
                });
                FdxEvent::CableLinkRes
            }
            None if res.code == MsgResult::Timeout => FdxEvent::Timeout,
            None => FdxEvent::Error,
        }
    }

    /// Drives the FSM, including the internal event cascade an action may
    /// produce (e.g. the port calculation).
    fn run(
        &mut self,
        event: FdxEvent,
        now: Ticks,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
        reports: &mut Vec<FdxReport>,
    ) {
        self.chain = Some(event);
        while let Some(ev) = self.chain.take() {
            self.step(ev, now, exc, inic, timers, reports);
        }
    }

    fn step(
        &mut self,
        event: FdxEvent,
        now: Ticks,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
        reports: &mut Vec<FdxReport>,
    ) {
        match (self.state, event) {
            // --- Diagnosis mode entry ---
            (FdxState::WaitDiag, FdxEvent::NwFdxOk) => {
                self.send_hello(now, exc, timers);
                self.state = FdxState::WaitHello;
            }
            (FdxState::WaitDiag, FdxEvent::Timeout) | (FdxState::WaitDiag, FdxEvent::Error) => {
                self.report_error(FdxError::Unspecified, reports);
                self.fdx_stop(now, inic, timers, reports);
            }

            // --- Hello / Welcome per segment ---
            (FdxState::WaitHello, FdxEvent::HelloOk) => {
                self.send_welcome(now, exc, timers);
                self.state = FdxState::WaitWelcome;
            }
            (FdxState::WaitHello, FdxEvent::Timeout) => {
                self.state = FdxState::HelloTimeout;
                if self.hello_retry > 0 {
                    self.hello_retry -= 1;
                    self.chain = Some(FdxEvent::HelloRetry);
                } else {
                    self.chain = Some(FdxEvent::HelloAllDone);
                }
            }
            (FdxState::WaitHello, FdxEvent::Error) => {
                self.report_error(FdxError::Unspecified, reports);
                self.fdx_stop(now, inic, timers, reports);
            }
            (FdxState::HelloTimeout, FdxEvent::HelloRetry) => {
                self.send_hello(now, exc, timers);
                self.state = FdxState::WaitHello;
            }
            (FdxState::HelloTimeout, FdxEvent::HelloAllDone) => {
                self.start_cable_link_diag(now, exc, inic, timers, reports);
            }
            (FdxState::WaitWelcome, FdxEvent::Welcome) => {
                self.state = FdxState::NextPort;
                self.calc_port();
            }
            (FdxState::WaitWelcome, FdxEvent::NoSuccess) => {
                // The node is not retried; the walk ends here.
                self.fdx_stop(now, inic, timers, reports);
            }
            (FdxState::WaitWelcome, FdxEvent::Timeout)
            | (FdxState::WaitWelcome, FdxEvent::Error) => {
                self.report_error(FdxError::Unspecified, reports);
                self.fdx_stop(now, inic, timers, reports);
            }

            // --- Branch bookkeeping ---
            (FdxState::NextPort, FdxEvent::PortFound) => {
                self.enable_port(now, exc, timers);
                self.state = FdxState::WaitEnable;
            }
            (FdxState::NextPort, FdxEvent::BranchFound) => {
                self.disable_port(now, exc, timers);
                self.state = FdxState::WaitDisable;
            }
            (FdxState::NextPort, FdxEvent::AllDone) => {
                info!("[FDX] All branches and segments explored");
                self.fdx_stop(now, inic, timers, reports);
            }
            (FdxState::WaitEnable, FdxEvent::PortEnabled) => {
                self.send_hello(now, exc, timers);
                self.state = FdxState::WaitHello;
            }
            (FdxState::WaitEnable, FdxEvent::PortNotEnabled) => {
                // Treat the unusable port as the end of the branch.
                self.target.signature.num_ports = 1;
                self.state = FdxState::NextPort;
                self.calc_port();
            }
            (FdxState::WaitEnable, FdxEvent::Timeout) | (FdxState::WaitEnable, FdxEvent::Error) => {
                self.report_error(FdxError::Unspecified, reports);
                self.fdx_stop(now, inic, timers, reports);
            }
            (FdxState::WaitDisable, FdxEvent::PortDisabled) => {
                self.enable_port(now, exc, timers);
                self.state = FdxState::WaitEnable;
            }
            (FdxState::WaitDisable, FdxEvent::Timeout)
            | (FdxState::WaitDisable, FdxEvent::Error) => {
                self.report_error(FdxError::Unspecified, reports);
                self.fdx_stop(now, inic, timers, reports);
            }

            // --- Cable-link diagnosis ---
            (FdxState::CableLinkDiag, FdxEvent::CableLinkRes) => {
                self.last_result = LastResult::CableLink;
                self.state = FdxState::NextPort;
                self.calc_port();
            }
            (FdxState::CableLinkDiag, FdxEvent::Timeout)
            | (FdxState::CableLinkDiag, FdxEvent::Error) => {
                self.report_error(FdxError::Unspecified, reports);
                self.fdx_stop(now, inic, timers, reports);
            }

            // --- Diagnosis mode exit ---
            (FdxState::End, FdxEvent::NwFdxOk) => {
                reports.push(FdxReport::Finished);
                exc.release_service(ClientId::DiagFdx);
                self.started = false;
                self.state = FdxState::Idle;
            }
            (FdxState::End, FdxEvent::Error) | (FdxState::End, FdxEvent::Timeout) => {
                self.report_error(FdxError::StopDiagFailed, reports);
                reports.push(FdxReport::Finished);
                exc.release_service(ClientId::DiagFdx);
                self.started = false;
                self.state = FdxState::Idle;
            }

            (state, event) => {
                warn!("[FDX] Ignoring event {:?} in state {:?}", event, state);
            }
        }
    }

    fn report_error(&self, error: FdxError, reports: &mut Vec<FdxReport>) {
        reports.push(FdxReport::Error {
            segment: self.segment(),
            error,
        });
    }

    fn send_hello(&mut self, now: Ticks, exc: &mut Exc, timers: &mut TimerMgr) {
        let _ = exc.hello_get(ADDR_BROADCAST_BLOCKING, SIGNATURE_VERSION, ClientId::DiagFdx);
        timers.restart(TimerId::DiagFdx, FDX_TIMEOUT_HELLO, now);
    }

    fn send_welcome(&mut self, now: Ticks, exc: &mut Exc, timers: &mut TimerMgr) {
        self.admin_node_address = ADDR_ADMIN_BASE + u16::from(self.segment_nr);
        let _ = exc.welcome_sr(
            self.target.node_address,
            self.admin_node_address,
            SIGNATURE_VERSION,
            self.target.signature,
            ClientId::DiagFdx,
        );
        timers.restart(TimerId::DiagFdx, FDX_TIMEOUT_COMMAND, now);
    }

    /// Decides whether the walk continues on this branch, switches to the
    /// next branch or is complete.
    fn calc_port(&mut self) {
        match self.last_result {
            LastResult::Init => {
                self.curr_branch = 0;
                self.source = self.target;
                self.master = self.target;
                self.target = NodeInfo::default();
                self.last_result = LastResult::Segment;
                self.chain = Some(FdxEvent::PortFound);
            }
            LastResult::Segment => {
                if self.target.signature.num_ports > 1 {
                    self.source = self.target;
                    self.target = NodeInfo::default();
                    self.chain = Some(FdxEvent::PortFound);
                } else {
                    self.next_branch_or_done();
                }
            }
            LastResult::CableLink => self.next_branch_or_done(),
        }
    }

    fn next_branch_or_done(&mut self) {
        if self.num_ports == self.curr_branch + 1 {
            self.chain = Some(FdxEvent::AllDone);
        } else {
            self.segment_nr = 1;
            self.curr_branch += 1;
            self.source = self.master;
            self.target = NodeInfo::default();
            self.chain = Some(FdxEvent::BranchFound);
        }
    }

    fn enable_port(&mut self, now: Ticks, exc: &mut Exc, timers: &mut TimerMgr) {
        let (target_address, port_number) = if self.segment_nr == 0 {
            (ADDR_LOCAL_INIC, self.curr_branch)
        } else {
            (self.source.node_address, 1)
        };
        let _ = exc.enable_port_sr(target_address, port_number, true, ClientId::DiagFdx);
        timers.restart(TimerId::DiagFdx, FDX_TIMEOUT_COMMAND, now);
    }

    fn disable_port(&mut self, now: Ticks, exc: &mut Exc, timers: &mut TimerMgr) {
        let _ = exc.enable_port_sr(
            self.admin_node_address,
            self.curr_branch,
            false,
            ClientId::DiagFdx,
        );
        timers.restart(TimerId::DiagFdx, FDX_TIMEOUT_COMMAND, now);
    }

    fn start_cable_link_diag(
        &mut self,
        now: Ticks,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
        reports: &mut Vec<FdxReport>,
    ) {
        if self.segment_nr == 0 {
            // The local INIC never answered; nothing left to diagnose.
            self.report_error(FdxError::Unspecified, reports);
            self.fdx_stop(now, inic, timers, reports);
            return;
        }
        let port_number = if self.segment_nr == 1 {
            self.curr_branch
        } else {
            1
        };
        self.last_result = LastResult::CableLink;
        let _ = exc.cable_link_diag_start(self.source.node_address, port_number, ClientId::DiagFdx);
        timers.restart(TimerId::DiagFdx, FDX_TIMEOUT_CABLE_DIAGNOSIS, now);
        self.state = FdxState::CableLinkDiag;
    }

    /// Leaves the full-duplex diagnosis mode; the walk always finishes
    /// with a `Finished` report afterwards.
    fn fdx_stop(
        &mut self,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
        reports: &mut Vec<FdxReport>,
    ) {
        match inic.network_diag_fdx_end(ClientId::DiagFdx) {
            Ok(()) => {
                timers.restart(TimerId::DiagFdx, FDX_TIMEOUT_COMMAND, now);
                self.state = FdxState::End;
            }
            Err(_) => {
                self.report_error(FdxError::StopDiagFailed, reports);
                reports.push(FdxReport::Finished);
                self.started = false;
                self.state = FdxState::Idle;
            }
        }
    }
}

impl Default for FdxDiag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exc::RxDispatch;
    use crate::inic::InicRx;
    use crate::msg::{Codec, PortMessage};
    use crate::types::{
        OpType, EXC_FID_ENABLE_PORT, EXC_FID_HELLO, EXC_FID_WELCOME, FBLOCK_EXC, FBLOCK_INIC,
        INIC_FID_NETWORK_DIAG_FDX, INIC_FID_NETWORK_DIAG_FDX_END,
    };

    struct Rig {
        fdx: FdxDiag,
        exc: Exc,
        inic: Inic,
        timers: TimerMgr,
        reports: Vec<FdxReport>,
    }

    impl Rig {
        fn new() -> Self {
            let mut rig = Self {
                fdx: FdxDiag::new(),
                exc: Exc::new(),
                inic: Inic::new(),
                timers: TimerMgr::new(),
                reports: Vec::new(),
            };
            rig.fdx
                .start(0, &mut rig.exc, &mut rig.inic, &mut rig.timers)
                .unwrap();
            rig
        }

        fn inic_result(&mut self, func_id: u16, op: OpType) {
            let msg = PortMessage::new(1, FBLOCK_INIC, func_id, op);
            if let InicRx::Single(ClientId::DiagFdx, event) = self.inic.on_rx(&msg) {
                self.reports.extend(self.fdx.on_inic_event(
                    &event,
                    0,
                    &mut self.exc,
                    &mut self.inic,
                    &mut self.timers,
                ));
            }
        }

        fn exc_rx(&mut self, msg: PortMessage) {
            if let RxDispatch::Single(ClientId::DiagFdx, event) = self.exc.on_rx(&msg) {
                self.reports.extend(self.fdx.on_exc_event(
                    &event,
                    0,
                    &mut self.exc,
                    &mut self.inic,
                    &mut self.timers,
                ));
            }
        }

        fn hello(&mut self, node_address: u16, num_ports: u8) {
            let status = HelloStatus {
                version: 1,
                signature: Signature {
                    node_address,
                    num_ports,
                    ..Signature::default()
                },
            };
            let mut buffer = [0u8; 64];
            let written = status.serialize(&mut buffer).unwrap();
            self.exc_rx(
                PortMessage::new(1, FBLOCK_EXC, EXC_FID_HELLO, OpType::Status)
                    .with_payload(buffer[..written].to_vec()),
            );
        }

        fn welcome_ok(&mut self, node_address: u16, num_ports: u8) {
            let result = WelcomeResult {
                res: WELCOME_SUCCESS,
                version: 1,
                signature: Signature {
                    node_address,
                    num_ports,
                    ..Signature::default()
                },
            };
            let mut buffer = [0u8; 64];
            let written = result.serialize(&mut buffer).unwrap();
            self.exc_rx(
                PortMessage::new(1, FBLOCK_EXC, EXC_FID_WELCOME, OpType::ResultAck)
                    .with_payload(buffer[..written].to_vec()),
            );
        }

        fn enable_port_ok(&mut self) {
            self.exc_rx(PortMessage::new(
                1,
                FBLOCK_EXC,
                EXC_FID_ENABLE_PORT,
                OpType::ResultAck,
            ));
        }
    }

    #[test]
    fn test_linear_three_node_walk() {
        // One-branch master, two-port node A, one-port node B: expect
        // segments 1 and 2 on branch 0, then Finished.
        let mut rig = Rig::new();
        rig.inic_result(INIC_FID_NETWORK_DIAG_FDX, OpType::Result);
        // Segment 0: the master answers its own Hello.
        rig.hello(0x0200, 1);
        rig.welcome_ok(0x0200, 1);
        // Master port 0 enabled; segment 1 is probed.
        rig.enable_port_ok();
        rig.hello(0x0201, 2);
        rig.welcome_ok(0x0201, 2);
        assert!(rig.reports.iter().any(|r| matches!(
            r,
            FdxReport::SegmentFound(s) if s.num == 1 && s.branch == 0
                && s.source.node_address == 0x0200
        )));
        // Node A has a second port; segment 2 follows.
        rig.enable_port_ok();
        rig.hello(0x0202, 1);
        rig.welcome_ok(0x0202, 1);
        assert!(rig.reports.iter().any(|r| matches!(
            r,
            FdxReport::SegmentFound(s) if s.num == 2 && s.branch == 0
        )));
        // Node B is single-ported and the master had one port: all done.
        rig.inic_result(INIC_FID_NETWORK_DIAG_FDX_END, OpType::Result);
        assert_eq!(rig.reports.last(), Some(&FdxReport::Finished));
        assert!(!rig.fdx.is_running());
    }

    #[test]
    fn test_welcome_no_success_stops_walk_without_retry() {
        let mut rig = Rig::new();
        rig.inic_result(INIC_FID_NETWORK_DIAG_FDX, OpType::Result);
        rig.hello(0x0200, 1);
        rig.welcome_ok(0x0200, 1);
        rig.enable_port_ok();
        rig.hello(0x0201, 1);
        // Welcome answers NoSuccess.
        let result = WelcomeResult {
            res: 1,
            version: 1,
            signature: Signature::default(),
        };
        let mut buffer = [0u8; 64];
        let written = result.serialize(&mut buffer).unwrap();
        rig.exc_rx(
            PortMessage::new(1, FBLOCK_EXC, EXC_FID_WELCOME, OpType::ResultAck)
                .with_payload(buffer[..written].to_vec()),
        );
        assert!(rig.reports.iter().any(|r| matches!(
            r,
            FdxReport::Error { error: FdxError::WelcomeNoSuccess, .. }
        )));
        // The stop command went out; no further Welcome retry.
        rig.inic_result(INIC_FID_NETWORK_DIAG_FDX_END, OpType::Result);
        assert_eq!(rig.reports.last(), Some(&FdxReport::Finished));
    }

    #[test]
    fn test_hello_retries_then_cable_link_diag() {
        let mut rig = Rig::new();
        rig.inic_result(INIC_FID_NETWORK_DIAG_FDX, OpType::Result);
        rig.hello(0x0200, 1);
        rig.welcome_ok(0x0200, 1);
        rig.enable_port_ok();
        // Segment 1 never answers: 1 initial + 10 retries, then the
        // cable-link diagnosis runs on the master's port.
        for _ in 0..11 {
            rig.reports.extend(rig.fdx.on_timer(
                0,
                &mut rig.exc,
                &mut rig.inic,
                &mut rig.timers,
            ));
        }
        // Drain hello messages, the last message must be the diagnosis.
        let mut last = None;
        while let Some(msg) = rig.exc.xcvr.pop() {
            last = Some(msg);
        }
        assert_eq!(
            last.unwrap().id.func_id,
            crate::types::EXC_FID_CABLE_LINK_DIAG
        );
        // Result comes back and ends the single-branch walk.
        let payload = alloc::vec![0u8, 3u8];
        rig.exc_rx(
            PortMessage::new(
                1,
                FBLOCK_EXC,
                crate::types::EXC_FID_CABLE_LINK_DIAG,
                OpType::ResultAck,
            )
            .with_payload(payload),
        );
        assert!(rig.reports.iter().any(|r| matches!(
            r,
            FdxReport::CableLinkResult { cable_link_info: 3, .. }
        )));
        rig.inic_result(INIC_FID_NETWORK_DIAG_FDX_END, OpType::Result);
        assert_eq!(rig.reports.last(), Some(&FdxReport::Finished));
    }
}
