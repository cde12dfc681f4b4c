//! HalfDuplex position diagnosis.
//!
//! Walks the ring position by position in half-duplex mode: the master
//! enables its transmitter, waits for the signal to propagate, then asks
//! the node at the current position to answer against the ring direction.
//! The first non-OK tester result closes the walk; afterwards the network
//! is briefly started and shut down again to bring all nodes back into a
//! defined state.

use crate::event::ClientId;
use crate::exc::wire::{
    HdxTesterResult, ReverseReq0List, ReverseReq0Result, ReverseReqHeader,
};
use crate::exc::{Exc, ExcEvent, ExcResult, ExcSlot};
use crate::hal::StackError;
use crate::inic::{Inic, InicEvent, InicSlot};
use crate::timer::{TimerId, TimerMgr};
use crate::types::{
    MsgResult, Signature, Ticks, ADDR_ADMIN_BASE, AUTOFORCED_NA_TIME, DEFAULT_PACKET_BW,
    SIGNATURE_VERSION,
};
use alloc::vec::Vec;
use log::{info, warn};

const HDX_T_SWITCH: u16 = 100;
const HDX_T_SEND: u16 = 100;
const HDX_T_BACK: u16 = 500;
const HDX_T_WAIT: u16 = 300;
const HDX_T_COMMAND: u16 = 100;

/// Supervision of the reverse request: switch + back travel + margin.
const HDX_T_TIMEOUT: u16 = HDX_T_SWITCH + HDX_T_BACK + 100;

/// Time for the forward signal to propagate through the ring.
const HDX_T_SIG_PROP: u16 = HDX_T_SEND + 100;

/// Delay before the transmitter is re-enabled for the next position.
const HDX_T_SIGNAL_ON: u16 = 20;

/// Settle time with the network started after the walk.
const HDX_T_NET_ON: u16 = 2000;

/// Settle time after the closing shutdown.
const HDX_T_NET_OFF: u16 = 300;

/// Per-position outcome of the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdxResult {
    Success,
    SlaveWrongPos,
    RingBreak,
    NoRingBreak,
    NoResult,
}

/// Reports of the HalfDuplex diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdxReport {
    Segment {
        result: HdxResult,
        position: u8,
        signature: Signature,
        cable_diag_result: u8,
    },
    /// A command failed; only the first error of a run is reported.
    Error,
    /// A command or the reverse request timed out.
    Timeout,
    /// The walk is over and the network is back in a defined state.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HdxState {
    Idle,
    Started,
    WaitEnabled,
    WaitSigProp,
    WaitResult,
    WaitSignalOn,
    WaitForEnd,
    End,
    Startup,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HdxEvent {
    DiagModeEnd,
    DiagModeStarted,
    TxEnableSuccess,
    RevReqResOk,
    RevReqResNotOk,
    Timeout,
    Error,
}

pub struct HdxDiag {
    state: HdxState,
    started: bool,
    current_position: u8,
    /// Only the first error of a run is reported.
    error_reported: bool,
    /// Last reverse-request result, consumed by the report actions.
    last_result: Option<ReverseReq0Result>,
    chain: Option<HdxEvent>,
}

impl HdxDiag {
    pub fn new() -> Self {
        Self {
            state: HdxState::Idle,
            started: false,
            current_position: 1,
            error_reported: false,
            last_result: None,
            chain: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.started
    }

    /// Starts the half-duplex diagnosis walk.
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
        exc.reserve_service(ClientId::DiagHdx)?;
        info!("[HDX] Starting half-duplex diagnosis");
        self.started = true;
        self.current_position = 1;
        self.error_reported = false;
        self.last_result = None;
        if let Err(e) = inic.network_diag_hdx(ClientId::DiagHdx) {
            self.started = false;
            exc.release_service(ClientId::DiagHdx);
            return Err(e);
        }
        timers.restart(TimerId::DiagHdx, HDX_T_COMMAND, now);
        self.state = HdxState::Started;
        Ok(())
    }

    /// Fatal termination: reset without the startup/shutdown bracket.
    pub fn terminate(
        &mut self,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Vec<HdxReport> {
        let mut reports = Vec::new();
        if self.started {
            timers.stop(TimerId::DiagHdx);
            exc.cancel(ExcSlot::EnableTx);
            exc.cancel(ExcSlot::ReverseRequest);
            inic.cancel(InicSlot::NetworkDiagHdx);
            inic.cancel(InicSlot::NetworkDiagHdxEnd);
            inic.cancel(InicSlot::NetworkStartup);
            inic.cancel(InicSlot::NetworkShutdown);
            self.report_error(&mut reports);
            reports.push(HdxReport::End);
            exc.release_service(ClientId::DiagHdx);
            self.started = false;
            self.state = HdxState::Idle;
        }
        reports
    }

    /// Responses from the EXC facade.
    pub fn on_exc_event(
        &mut self,
        event: &ExcEvent,
        now: Ticks,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Vec<HdxReport> {
        let mut reports = Vec::new();
        let fsm_event = match event {
            ExcEvent::EnableTx(res) => {
                timers.stop(TimerId::DiagHdx);
                Self::eval_unit(res)
            }
            ExcEvent::ReverseReq0(res) => {
                timers.stop(TimerId::DiagHdx);
                self.eval_reverse_req(res)
            }
            _ => return reports,
        };
        self.run(fsm_event, now, exc, inic, timers, &mut reports);
        reports
    }

    /// Results of the local INIC commands.
    pub fn on_inic_event(
        &mut self,
        event: &InicEvent,
        now: Ticks,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Vec<HdxReport> {
        let mut reports = Vec::new();
        let fsm_event = match event {
            InicEvent::NetworkDiagHdx(res) => {
                // A late response after the supervision timeout must not
                // disturb the walk.
                if self.state != HdxState::Started {
                    return reports;
                }
                timers.stop(TimerId::DiagHdx);
                if res.is_success() {
                    HdxEvent::DiagModeStarted
                } else {
                    HdxEvent::Error
                }
            }
            InicEvent::NetworkDiagHdxEnd(res) => {
                if self.state != HdxState::End {
                    return reports;
                }
                timers.stop(TimerId::DiagHdx);
                if res.is_success() {
                    HdxEvent::DiagModeEnd
                } else {
                    HdxEvent::Error
                }
            }
            // The closing startup/shutdown bracket runs on fixed settle
            // timers; command results only matter when they fail.
            InicEvent::NetworkStartup(res) | InicEvent::NetworkShutdown(res) => {
                if res.is_success() {
                    return reports;
                }
                HdxEvent::Error
            }
            _ => return reports,
        };
        self.run(fsm_event, now, exc, inic, timers, &mut reports);
        reports
    }

    /// One of the step timers expired.
    pub fn on_timer(
        &mut self,
        now: Ticks,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Vec<HdxReport> {
        let mut reports = Vec::new();
        // In the waiting states the timer is the regular progress signal;
        // pending observers are only stale in the command states.
        if matches!(self.state, HdxState::Started | HdxState::WaitEnabled | HdxState::WaitResult) {
            exc.cancel(ExcSlot::EnableTx);
            exc.cancel(ExcSlot::ReverseRequest);
            inic.cancel(InicSlot::NetworkDiagHdx);
            inic.cancel(InicSlot::NetworkDiagHdxEnd);
        }
        self.run(HdxEvent::Timeout, now, exc, inic, timers, &mut reports);
        reports
    }

    fn eval_unit(res: &ExcResult<()>) -> HdxEvent {
        if res.is_success() {
            HdxEvent::TxEnableSuccess
        } else if res.code == MsgResult::Timeout {
            HdxEvent::Timeout
        } else {
            HdxEvent::Error
        }
    }

    fn eval_reverse_req(&mut self, res: &ExcResult<ReverseReq0Result>) -> HdxEvent {
        match res.data.as_ref().filter(|_| res.is_success()) {
            Some(result) => {
                self.last_result = Some(*result);
                if result.tester_result == HdxTesterResult::SlaveOk {
                    HdxEvent::RevReqResOk
                } else {
                    HdxEvent::RevReqResNotOk
                }
            }
            None if res.code == MsgResult::Timeout => HdxEvent::Timeout,
            None => HdxEvent::Error,
        }
    }

    fn run(
        &mut self,
        event: HdxEvent,
        now: Ticks,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
        reports: &mut Vec<HdxReport>,
    ) {
        self.chain = Some(event);
        while let Some(ev) = self.chain.take() {
            self.step(ev, now, exc, inic, timers, reports);
        }
    }

    fn step(
        &mut self,
        event: HdxEvent,
        now: Ticks,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
        reports: &mut Vec<HdxReport>,
    ) {
        match (self.state, event) {
            // --- Diagnosis mode entry ---
            (HdxState::Started, HdxEvent::DiagModeStarted) => {
                self.enable_tx(now, exc, timers);
                self.state = HdxState::WaitEnabled;
            }
            (HdxState::Started, HdxEvent::Timeout) => {
                reports.push(HdxReport::Timeout);
                self.half_duplex_end(now, inic, timers, reports);
            }
            (HdxState::Started, HdxEvent::Error) => {
                self.report_error(reports);
                self.half_duplex_end(now, inic, timers, reports);
            }

            // --- Per-position probe ---
            (HdxState::WaitEnabled, HdxEvent::TxEnableSuccess) => {
                timers.restart(TimerId::DiagHdx, HDX_T_SIG_PROP, now);
                self.state = HdxState::WaitSigProp;
            }
            (HdxState::WaitEnabled, HdxEvent::Timeout) => {
                reports.push(HdxReport::Timeout);
                self.half_duplex_end(now, inic, timers, reports);
            }
            (HdxState::WaitEnabled, HdxEvent::Error) => {
                self.report_error(reports);
                self.half_duplex_end(now, inic, timers, reports);
            }
            (HdxState::WaitSigProp, HdxEvent::Timeout) => {
                self.reverse_request(now, exc, timers);
                self.state = HdxState::WaitResult;
            }
            (HdxState::WaitResult, HdxEvent::RevReqResOk) => {
                let result = self.last_result.take().unwrap_or(ReverseReq0Result {
                    tester_result: HdxTesterResult::NoResult,
                    cable_diag_result: 0,
                    version: 0,
                    signature: Signature::default(),
                });
                reports.push(HdxReport::Segment {
                    result: HdxResult::Success,
                    position: self.current_position,
                    signature: result.signature,
                    cable_diag_result: result.cable_diag_result,
                });
                self.current_position += 1;
                timers.restart(TimerId::DiagHdx, HDX_T_SIGNAL_ON, now);
                self.state = HdxState::WaitSignalOn;
            }
            (HdxState::WaitResult, HdxEvent::RevReqResNotOk) => {
                self.report_last_segment(reports);
                timers.restart(TimerId::DiagHdx, HDX_T_BACK, now);
                self.state = HdxState::WaitForEnd;
            }
            (HdxState::WaitResult, HdxEvent::Timeout) => {
                reports.push(HdxReport::Timeout);
                self.half_duplex_end(now, inic, timers, reports);
            }
            (HdxState::WaitResult, HdxEvent::Error) => {
                self.report_error(reports);
                self.half_duplex_end(now, inic, timers, reports);
            }
            (HdxState::WaitSignalOn, HdxEvent::Timeout) => {
                self.enable_tx(now, exc, timers);
                self.state = HdxState::WaitEnabled;
            }

            // --- Walk closed ---
            (HdxState::WaitForEnd, HdxEvent::Timeout) => {
                self.half_duplex_end(now, inic, timers, reports);
            }
            (HdxState::End, HdxEvent::DiagModeEnd) => {
                self.network_startup(now, inic, timers, reports);
            }
            (HdxState::End, HdxEvent::Timeout) => {
                reports.push(HdxReport::Timeout);
                self.network_startup(now, inic, timers, reports);
            }
            (HdxState::End, HdxEvent::Error) => {
                self.report_error(reports);
                self.network_startup(now, inic, timers, reports);
            }
            (HdxState::Startup, HdxEvent::Timeout) => {
                self.network_shutdown(now, inic, timers, reports);
            }
            (HdxState::Startup, HdxEvent::Error) => {
                self.report_error(reports);
                self.network_shutdown(now, inic, timers, reports);
            }
            (HdxState::Shutdown, HdxEvent::Timeout) => {
                self.finish(exc, inic, reports);
            }
            (HdxState::Shutdown, HdxEvent::Error) => {
                self.report_error(reports);
                self.finish(exc, inic, reports);
            }

            (state, event) => {
                warn!("[HDX] Ignoring event {:?} in state {:?}", event, state);
            }
        }
    }

    fn enable_tx(&mut self, now: Ticks, exc: &mut Exc, timers: &mut TimerMgr) {
        let _ = exc.enable_tx_start(0, ClientId::DiagHdx);
        timers.restart(TimerId::DiagHdx, HDX_T_COMMAND, now);
    }

    fn reverse_request(&mut self, now: Ticks, exc: &mut Exc, timers: &mut TimerMgr) {
        let header = ReverseReqHeader {
            master_position: 0,
            t_switch: HDX_T_SWITCH,
            t_send: HDX_T_SEND,
            t_back: HDX_T_BACK,
        };
        let list = ReverseReq0List {
            t_wait: HDX_T_WAIT,
            admin_node_address: ADDR_ADMIN_BASE + u16::from(self.current_position) - 1,
            version_limit: SIGNATURE_VERSION,
        };
        let _ = exc.reverse_request0_start(header, list, ClientId::DiagHdx);
        timers.restart(TimerId::DiagHdx, HDX_T_TIMEOUT, now);
    }

    fn report_last_segment(&mut self, reports: &mut Vec<HdxReport>) {
        let Some(result) = self.last_result.take() else {
            return;
        };
        let mapped = match result.tester_result {
            HdxTesterResult::SlaveOk => HdxResult::Success,
            HdxTesterResult::SlaveWrongPosition => HdxResult::SlaveWrongPos,
            HdxTesterResult::MasterNoRxSignal => HdxResult::RingBreak,
            HdxTesterResult::MasterRxLock => HdxResult::NoRingBreak,
            HdxTesterResult::NoResult => HdxResult::NoResult,
        };
        reports.push(HdxReport::Segment {
            result: mapped,
            position: self.current_position,
            signature: result.signature,
            cable_diag_result: result.cable_diag_result,
        });
    }

    fn report_error(&mut self, reports: &mut Vec<HdxReport>) {
        if !self.error_reported {
            self.error_reported = true;
            reports.push(HdxReport::Error);
        }
    }

    fn half_duplex_end(
        &mut self,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
        reports: &mut Vec<HdxReport>,
    ) {
        match inic.network_diag_hdx_end(ClientId::DiagHdx) {
            Ok(()) => {
                timers.restart(TimerId::DiagHdx, HDX_T_COMMAND, now);
                self.state = HdxState::End;
            }
            Err(_) => {
                self.report_error(reports);
                self.network_startup(now, inic, timers, reports);
            }
        }
    }

    fn network_startup(
        &mut self,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
        reports: &mut Vec<HdxReport>,
    ) {
        if inic
            .network_startup(AUTOFORCED_NA_TIME, DEFAULT_PACKET_BW, ClientId::DiagHdx)
            .is_err()
        {
            self.report_error(reports);
        }
        timers.restart(TimerId::DiagHdx, HDX_T_NET_ON, now);
        self.state = HdxState::Startup;
    }

    fn network_shutdown(
        &mut self,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
        reports: &mut Vec<HdxReport>,
    ) {
        if inic.network_shutdown(ClientId::DiagHdx).is_err() {
            self.report_error(reports);
        }
        timers.restart(TimerId::DiagHdx, HDX_T_NET_OFF, now);
        self.state = HdxState::Shutdown;
    }

    fn finish(&mut self, exc: &mut Exc, inic: &mut Inic, reports: &mut Vec<HdxReport>) {
        info!("[HDX] Half-duplex diagnosis finished");
        // Command results of the settle bracket may still be pending.
        inic.cancel(InicSlot::NetworkStartup);
        inic.cancel(InicSlot::NetworkShutdown);
        reports.push(HdxReport::End);
        exc.release_service(ClientId::DiagHdx);
        self.started = false;
        self.state = HdxState::Idle;
    }
}

impl Default for HdxDiag {
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
        OpType, EXC_FID_ENABLE_TX, EXC_FID_REVERSE_REQUEST, FBLOCK_EXC, FBLOCK_INIC,
        INIC_FID_NETWORK_DIAG_HDX, INIC_FID_NETWORK_DIAG_HDX_END,
    };

    struct Rig {
        hdx: HdxDiag,
        exc: Exc,
        inic: Inic,
        timers: TimerMgr,
        reports: Vec<HdxReport>,
    }

    impl Rig {
        fn new() -> Self {
            let mut rig = Self {
                hdx: HdxDiag::new(),
                exc: Exc::new(),
                inic: Inic::new(),
                timers: TimerMgr::new(),
                reports: Vec::new(),
            };
            rig.hdx
                .start(0, &mut rig.exc, &mut rig.inic, &mut rig.timers)
                .unwrap();
            rig
        }

        fn inic_result(&mut self, func_id: u16) {
            let msg = PortMessage::new(1, FBLOCK_INIC, func_id, OpType::Result);
            if let InicRx::Single(ClientId::DiagHdx, event) = self.inic.on_rx(&msg) {
                self.reports.extend(self.hdx.on_inic_event(
                    &event,
                    0,
                    &mut self.exc,
                    &mut self.inic,
                    &mut self.timers,
                ));
            }
        }

        fn tick(&mut self) {
            self.reports.extend(self.hdx.on_timer(
                0,
                &mut self.exc,
                &mut self.inic,
                &mut self.timers,
            ));
        }

        fn enable_tx_ok(&mut self) {
            let msg = PortMessage::new(1, FBLOCK_EXC, EXC_FID_ENABLE_TX, OpType::ResultAck);
            if let RxDispatch::Single(ClientId::DiagHdx, event) = self.exc.on_rx(&msg) {
                self.reports.extend(self.hdx.on_exc_event(
                    &event,
                    0,
                    &mut self.exc,
                    &mut self.inic,
                    &mut self.timers,
                ));
            }
        }

        fn reverse_result(&mut self, tester_result: HdxTesterResult, node_address: u16) {
            let result = ReverseReq0Result {
                tester_result,
                cable_diag_result: 0,
                version: 1,
                signature: Signature {
                    node_address,
                    ..Signature::default()
                },
            };
            let mut buffer = [0u8; 64];
            let written = result.serialize(&mut buffer).unwrap();
            let msg = PortMessage::new(1, FBLOCK_EXC, EXC_FID_REVERSE_REQUEST, OpType::ResultAck)
                .with_payload(buffer[..written].to_vec());
            if let RxDispatch::Single(ClientId::DiagHdx, event) = self.exc.on_rx(&msg) {
                self.reports.extend(self.hdx.on_exc_event(
                    &event,
                    0,
                    &mut self.exc,
                    &mut self.inic,
                    &mut self.timers,
                ));
            }
        }

        /// One full position probe: enable TX, signal propagation wait,
        /// reverse request, then deliver `tester_result`.
        fn probe(&mut self, tester_result: HdxTesterResult, node_address: u16) {
            self.enable_tx_ok();
            self.tick(); // t_sig_prop expires, reverse request goes out
            let msg = self.exc.xcvr.pop().unwrap();
            assert_eq!(msg.id.func_id, EXC_FID_REVERSE_REQUEST);
            self.reverse_result(tester_result, node_address);
        }
    }

    #[test]
    fn test_ring_break_at_position_three() {
        let mut rig = Rig::new();
        rig.inic_result(INIC_FID_NETWORK_DIAG_HDX);
        let _enable_tx = rig.exc.xcvr.pop().unwrap();

        rig.probe(HdxTesterResult::SlaveOk, 0x0201);
        rig.tick(); // t_signal_on expires, TX re-enabled
        let _enable_tx = rig.exc.xcvr.pop().unwrap();
        rig.probe(HdxTesterResult::SlaveOk, 0x0202);
        rig.tick();
        let _enable_tx = rig.exc.xcvr.pop().unwrap();
        rig.probe(HdxTesterResult::MasterNoRxSignal, 0);

        assert!(rig.reports.iter().any(|r| matches!(
            r,
            HdxReport::Segment { result: HdxResult::Success, position: 1, .. }
        )));
        assert!(rig.reports.iter().any(|r| matches!(
            r,
            HdxReport::Segment { result: HdxResult::Success, position: 2, .. }
        )));
        assert!(rig.reports.iter().any(|r| matches!(
            r,
            HdxReport::Segment { result: HdxResult::RingBreak, position: 3, .. }
        )));

        // t_back expires, diagnosis mode ends, then the start-up and
        // shut-down bracket runs on its settle timers.
        rig.tick();
        rig.inic_result(INIC_FID_NETWORK_DIAG_HDX_END);
        let mut last = None;
        while let Some(msg) = rig.inic.xcvr.pop() {
            last = Some(msg.id.func_id);
        }
        assert_eq!(last, Some(crate::types::INIC_FID_NETWORK_STARTUP));
        rig.tick(); // 2 s settle
        assert_eq!(
            rig.inic.xcvr.pop().unwrap().id.func_id,
            crate::types::INIC_FID_NETWORK_SHUTDOWN
        );
        rig.tick(); // 300 ms settle
        assert_eq!(rig.reports.last(), Some(&HdxReport::End));
        assert!(!rig.hdx.is_running());
    }

    #[test]
    fn test_reverse_request_carries_admin_address() {
        let mut rig = Rig::new();
        rig.inic_result(INIC_FID_NETWORK_DIAG_HDX);
        let _ = rig.exc.xcvr.pop();
        rig.enable_tx_ok();
        rig.tick();
        let msg = rig.exc.xcvr.pop().unwrap();
        assert_eq!(msg.id.func_id, EXC_FID_REVERSE_REQUEST);
        // Position 1 probes admin address 0x0F00.
        assert_eq!(
            u16::from_be_bytes([msg.payload[10], msg.payload[11]]),
            0x0F00
        );
    }

    #[test]
    fn test_only_first_error_is_reported() {
        let mut rig = Rig::new();
        // Diagnosis mode start fails.
        let msg = PortMessage::new(1, FBLOCK_INIC, INIC_FID_NETWORK_DIAG_HDX, OpType::Error);
        if let InicRx::Single(ClientId::DiagHdx, event) = rig.inic.on_rx(&msg) {
            rig.reports.extend(rig.hdx.on_inic_event(
                &event,
                0,
                &mut rig.exc,
                &mut rig.inic,
                &mut rig.timers,
            ));
        }
        let errors = rig
            .reports
            .iter()
            .filter(|r| matches!(r, HdxReport::Error))
            .count();
        assert_eq!(errors, 1);
    }
}
