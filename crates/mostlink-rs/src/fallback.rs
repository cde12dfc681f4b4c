//! Fallback protection.
//!
//! Brings the ring into reverse-direction fallback operation and keeps it
//! there: the local INIC starts fallback mode, the negotiation phase is
//! given time to settle, then a ReverseRequest distributes the negotiation
//! timing to the other nodes. The component stays active until the network
//! leaves fallback operation again.

use crate::event::ClientId;
use crate::exc::wire::{ReverseReq1List, ReverseReq1Result, ReverseReqHeader};
use crate::exc::{Exc, ExcEvent, ExcResult, ExcSlot};
use crate::hal::StackError;
use crate::inic::{Inic, InicEvent, InicSlot};
use crate::timer::{TimerId, TimerMgr};
use crate::types::{
    MsgResult, NetworkAvailInfo, NetworkStatus, Ticks, NWS_M_AVAIL_INFO,
};
use alloc::vec::Vec;
use log::{info, warn};

const FBP_T_SWITCH: u16 = 200;
const FBP_T_SEND: u16 = 100;
const FBP_T_NEG_GUARD: u16 = 500;
const FBP_T_NEG_INITIATOR: u16 = 600;
const FBP_T_COMMAND: u16 = 100;

/// Time for the fallback negotiation on the ring to settle.
const FBP_T_NEG_PHASE: u16 = 600;

/// Supervision of the reverse request across the whole negotiation.
const FBP_T_TIMEOUT: u16 = FBP_T_NEG_INITIATOR + 17_000;

/// Auto-forced-NA while in fallback: never leave on its own.
const FBP_AUTOFORCED_NA_TIME: u16 = 0xFFFF;

/// Report codes of a fallback-protection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FbpReport {
    /// The ring operates in protected fallback mode.
    Success,
    /// Fallback operation has ended.
    End,
    Timeout,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FbpState {
    Idle,
    Started,
    WaitNeg,
    WaitRevReq,
    StayFbp,
    End,
}

pub struct FallbackProtection {
    state: FbpState,
    /// `t_Back` distributed to the other nodes; 0xFFFF keeps them in
    /// fallback forever.
    duration: u16,
    /// Position of the initiating master in the reverse request.
    current_position: u8,
    /// Tracks fallback operation seen via network status.
    fallback: bool,
}

impl FallbackProtection {
    pub fn new() -> Self {
        Self {
            state: FbpState::Idle,
            duration: 0xFFFF,
            current_position: 1,
            fallback: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state != FbpState::Idle
    }

    /// Starts fallback protection with the given duration.
    pub fn start(
        &mut self,
        duration: u16,
        now: Ticks,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Result<(), StackError> {
        if self.state != FbpState::Idle {
            return Err(StackError::ApiLocked);
        }
        exc.reserve_service(ClientId::Fallback)?;
        info!("[FBP] Starting fallback protection, t_back={}", duration);
        self.duration = duration;
        self.current_position = 1;
        self.fallback = false;
        if let Err(e) = inic.network_fallback(FBP_AUTOFORCED_NA_TIME, duration, ClientId::Fallback)
        {
            exc.release_service(ClientId::Fallback);
            return Err(e);
        }
        inic.register_status_observer(ClientId::Fallback, NWS_M_AVAIL_INFO);
        timers.restart(TimerId::Fallback, FBP_T_COMMAND, now);
        self.state = FbpState::Started;
        Ok(())
    }

    /// Leaves fallback operation.
    pub fn stop(
        &mut self,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Result<(), StackError> {
        info!("[FBP] Stopping fallback protection");
        inic.network_fallback_end(ClientId::Fallback)?;
        timers.restart(TimerId::Fallback, FBP_T_COMMAND, now);
        self.state = FbpState::End;
        Ok(())
    }

    /// Fatal termination: reset without reporting.
    pub fn terminate(&mut self, exc: &mut Exc, inic: &mut Inic, timers: &mut TimerMgr) {
        if self.state == FbpState::Idle {
            return;
        }
        timers.stop(TimerId::Fallback);
        timers.stop(TimerId::FallbackGuard);
        exc.cancel(ExcSlot::ReverseRequest);
        inic.cancel(InicSlot::NetworkFallback);
        inic.cancel(InicSlot::NetworkFallbackEnd);
        inic.unregister_status_observer(ClientId::Fallback);
        exc.release_service(ClientId::Fallback);
        self.state = FbpState::Idle;
    }

    /// Results of the local INIC fallback commands.
    pub fn on_inic_event(
        &mut self,
        event: &InicEvent,
        now: Ticks,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Vec<FbpReport> {
        let mut reports = Vec::new();
        match event {
            InicEvent::NetworkFallback(res) => {
                timers.stop(TimerId::Fallback);
                if self.state != FbpState::Started {
                    return reports;
                }
                if res.is_success() {
                    // Give the negotiation phase time to settle.
                    timers.restart(TimerId::Fallback, FBP_T_NEG_PHASE, now);
                    self.state = FbpState::WaitNeg;
                } else {
                    reports.push(FbpReport::Error);
                    self.finish(exc, inic, timers);
                }
            }
            InicEvent::NetworkFallbackEnd(res) => {
                timers.stop(TimerId::Fallback);
                if self.state != FbpState::End {
                    return reports;
                }
                if res.is_success() {
                    reports.push(FbpReport::End);
                } else {
                    reports.push(FbpReport::Error);
                }
                self.finish(exc, inic, timers);
            }
            _ => {}
        }
        reports
    }

    /// The reverse-request result from the transport facade.
    pub fn on_exc_event(
        &mut self,
        event: &ExcEvent,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Vec<FbpReport> {
        let mut reports = Vec::new();
        let ExcEvent::ReverseReq1(res) = event else {
            return reports;
        };
        if self.state != FbpState::WaitRevReq {
            return reports;
        }
        timers.stop(TimerId::Fallback);
        match Self::eval_rev_req(res) {
            Ok(()) => {
                info!("[FBP] Fallback protection established");
                reports.push(FbpReport::Success);
                self.state = FbpState::StayFbp;
            }
            Err(report) => {
                reports.push(report);
                self.finish(exc, inic, timers);
            }
        }
        reports
    }

    fn eval_rev_req(res: &ExcResult<ReverseReq1Result>) -> Result<(), FbpReport> {
        match res.data.as_ref().filter(|_| res.is_success()) {
            Some(result) if result.result == 0 => Ok(()),
            Some(_) => Err(FbpReport::Error),
            None if res.code == MsgResult::Timeout => Err(FbpReport::Timeout),
            None => Err(FbpReport::Error),
        }
    }

    /// Network status updates while fallback protection is active.
    pub fn on_network_status(
        &mut self,
        status: &NetworkStatus,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Vec<FbpReport> {
        let mut reports = Vec::new();
        if !self.fallback && status.avail_info == NetworkAvailInfo::Fallback {
            self.fallback = true;
        } else if self.fallback && status.avail_info == NetworkAvailInfo::Regular {
            self.fallback = false;
            if self.state == FbpState::StayFbp {
                info!("[FBP] Network left fallback operation");
                reports.push(FbpReport::End);
                self.finish(exc, inic, timers);
            }
        }
        reports
    }

    /// A supervision timer expired.
    pub fn on_timer(
        &mut self,
        now: Ticks,
        exc: &mut Exc,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Vec<FbpReport> {
        let mut reports = Vec::new();
        match self.state {
            FbpState::Started | FbpState::End => {
                inic.cancel(InicSlot::NetworkFallback);
                inic.cancel(InicSlot::NetworkFallbackEnd);
                reports.push(FbpReport::Timeout);
                self.finish(exc, inic, timers);
            }
            FbpState::WaitNeg => {
                self.reverse_request(now, exc, timers);
                self.state = FbpState::WaitRevReq;
            }
            FbpState::WaitRevReq => {
                exc.cancel(ExcSlot::ReverseRequest);
                reports.push(FbpReport::Timeout);
                self.finish(exc, inic, timers);
            }
            state => {
                warn!("[FBP] Ignoring timeout in state {:?}", state);
            }
        }
        reports
    }

    fn reverse_request(&mut self, now: Ticks, exc: &mut Exc, timers: &mut TimerMgr) {
        let header = ReverseReqHeader {
            master_position: self.current_position,
            t_switch: FBP_T_SWITCH,
            t_send: FBP_T_SEND,
            // The fallback duration travels in the t_back field.
            t_back: self.duration,
        };
        let list = ReverseReq1List {
            t_neg_guard: FBP_T_NEG_GUARD,
            t_neg_initiator: FBP_T_NEG_INITIATOR,
        };
        let _ = exc.reverse_request1_start(header, list, ClientId::Fallback);
        timers.restart(TimerId::Fallback, FBP_T_TIMEOUT, now);
    }

    fn finish(&mut self, exc: &mut Exc, inic: &mut Inic, timers: &mut TimerMgr) {
        timers.stop(TimerId::Fallback);
        inic.unregister_status_observer(ClientId::Fallback);
        exc.release_service(ClientId::Fallback);
        self.state = FbpState::Idle;
    }
}

impl Default for FallbackProtection {
    fn default() -> Self {
        Self::new()
    }
}
