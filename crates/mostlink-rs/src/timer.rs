//! One-shot and periodic timers keyed on the host-supplied monotonic tick
//! count. Expiry collection snapshots the expired set before any timer is
//! mutated, so handlers may re-arm timers freely during dispatch.

use crate::hal::StackError;
use crate::types::Ticks;
use alloc::vec::Vec;

/// Every timer of the stack, one slot per owning component concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum TimerId {
    /// Network-Starter early guard after a failed job queue.
    StarterGuard = 0,
    /// Network-Starter periodic status re-injection.
    StarterPeriodic,
    /// Node-Discovery command supervision and response window.
    Discovery,
    /// FullDuplex diagnosis command / retry / cable-link supervision.
    DiagFdx,
    /// HalfDuplex diagnosis step timer.
    DiagHdx,
    /// Fallback-Protect command supervision.
    Fallback,
    /// Fallback-Protect overall negotiation watchdog.
    FallbackGuard,
    /// Programming command supervision.
    Prog,
    /// ATD query supervision.
    Atd,
    /// Supervisor-owned sequencing timer.
    Supv,
}

impl TimerId {
    pub const COUNT: usize = 10;
}

#[derive(Debug, Clone, Copy, Default)]
struct TimerSlot {
    armed: bool,
    deadline: Ticks,
    /// Re-arm interval for periodic timers.
    period_ms: Option<u16>,
}

/// Owns all timer slots of one stack instance.
#[derive(Debug, Default)]
pub struct TimerMgr {
    slots: [TimerSlot; TimerId::COUNT],
}

impl TimerMgr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a one-shot timer. Arming a timer that is already armed is a
    /// programming error and is rejected.
    pub fn start(&mut self, id: TimerId, delay_ms: u16, now: Ticks) -> Result<(), StackError> {
        let slot = &mut self.slots[id as usize];
        if slot.armed {
            return Err(StackError::TimerActive);
        }
        slot.armed = true;
        slot.deadline = now + Ticks::from(delay_ms);
        slot.period_ms = None;
        Ok(())
    }

    /// Arms a periodic timer with a first expiry after `delay_ms`.
    pub fn start_periodic(
        &mut self,
        id: TimerId,
        delay_ms: u16,
        period_ms: u16,
        now: Ticks,
    ) -> Result<(), StackError> {
        self.start(id, delay_ms, now)?;
        self.slots[id as usize].period_ms = Some(period_ms);
        Ok(())
    }

    /// Stops and re-arms in one step, for FSMs that reuse one slot across
    /// consecutive supervision windows.
    pub fn restart(&mut self, id: TimerId, delay_ms: u16, now: Ticks) {
        self.stop(id);
        // Cannot fail after stop.
        let _ = self.start(id, delay_ms, now);
    }

    pub fn stop(&mut self, id: TimerId) {
        self.slots[id as usize] = TimerSlot::default();
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.slots[id as usize].armed
    }

    /// The earliest pending deadline, if any timer is armed.
    pub fn next_deadline(&self) -> Option<Ticks> {
        self.slots
            .iter()
            .filter(|s| s.armed)
            .map(|s| s.deadline)
            .min()
    }

    /// Collects all timers expired at `now`. One-shot timers are disarmed,
    /// periodic timers are re-armed relative to their old deadline.
    pub fn expired(&mut self, now: Ticks) -> Vec<TimerId> {
        const IDS: [TimerId; TimerId::COUNT] = [
            TimerId::StarterGuard,
            TimerId::StarterPeriodic,
            TimerId::Discovery,
            TimerId::DiagFdx,
            TimerId::DiagHdx,
            TimerId::Fallback,
            TimerId::FallbackGuard,
            TimerId::Prog,
            TimerId::Atd,
            TimerId::Supv,
        ];
        let mut fired = Vec::new();
        for id in IDS {
            let slot = &mut self.slots[id as usize];
            if slot.armed && now >= slot.deadline {
                fired.push(id);
                match slot.period_ms {
                    Some(period) => slot.deadline += Ticks::from(period),
                    None => slot.armed = false,
                }
            }
        }
        fired
    }
}
