//! Node-Discovery.
//!
//! Broadcasts `Hello.Get` and welcomes every answering node into the
//! logical topology. The caller decides per signature whether a node is
//! welcomed, ignored or unknown; welcomed nodes receive the next unique
//! admin address (`0x0F00 + segment index`). The external route manager
//! builds connections on top of the welcomed set.

use crate::event::ClientId;
use crate::exc::wire::{HelloStatus, WelcomeResult, WELCOME_SUCCESS};
use crate::exc::{Exc, ExcEvent, ExcResult, ExcSlot};
use crate::hal::StackError;
use crate::timer::{TimerId, TimerMgr};
use crate::types::{Signature, Ticks, ADDR_ADMIN_BASE, ADDR_BROADCAST_BLOCKING, SIGNATURE_VERSION};
use log::{info, warn};

/// Time window for broadcast responses before the scan goes periodic.
const ND_TIME_WINDOW: u16 = 300;

/// Period of the background re-scan for late nodes.
const ND_TIME_RESCAN: u16 = 1000;

/// Supervision timeout of a directed Welcome command.
const ND_TIMEOUT_COMMAND: u16 = 100;

/// Decision of the evaluation callback for one Hello response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NdCheckResult {
    /// Welcome the node and allocate an admin address.
    Welcome,
    /// The node is not part of this network; skip it.
    Ignore,
    /// The node cannot be classified; it is reported and skipped.
    Unknown,
}

/// Progress reports of a discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NdReport {
    /// A node answered the Hello broadcast.
    TargetFound(Signature),
    /// A node acknowledged its Welcome.
    WelcomeSuccess(Signature),
    /// The evaluation callback could not classify the node.
    Unknown(Signature),
    /// No node answered within the response window.
    NoResponse,
    /// The discovery run was stopped.
    Stopped,
}

/// Per-run callbacks: classification of signatures and progress reports.
///
/// In manual mode these map to the application; in programming mode the
/// supervisor's programming subcomponent takes them over.
pub trait NdCallbacks {
    fn evaluate(&mut self, signature: &Signature) -> NdCheckResult;
    fn report(&mut self, report: NdReport);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NdState {
    Idle,
    /// Hello broadcast out, collecting responses.
    Scanning,
    /// Welcome sent to one node, waiting for its result.
    WaitWelcome,
}

pub struct NodeDiscovery {
    state: NdState,
    /// Next admin address offset; welcomed nodes get unique addresses.
    segment_index: u16,
    version_limit: u8,
    /// Signature of the node currently being welcomed.
    pending: Option<Signature>,
}

impl NodeDiscovery {
    pub fn new() -> Self {
        Self {
            state: NdState::Idle,
            segment_index: 0,
            version_limit: SIGNATURE_VERSION,
            pending: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state != NdState::Idle
    }

    /// Starts a discovery run. Fails with `ApiLocked` while another
    /// EXC-channel procedure owns the service lock.
    pub fn start(
        &mut self,
        now: Ticks,
        exc: &mut Exc,
        timers: &mut TimerMgr,
    ) -> Result<(), StackError> {
        if self.state != NdState::Idle {
            return Err(StackError::ApiLocked);
        }
        exc.reserve_service(ClientId::Discovery)?;
        info!("[ND] Starting node discovery");
        self.segment_index = 0;
        self.pending = None;
        if let Err(e) = exc.hello_get(ADDR_BROADCAST_BLOCKING, self.version_limit, ClientId::Discovery)
        {
            exc.release_service(ClientId::Discovery);
            return Err(e);
        }
        self.state = NdState::Scanning;
        timers.restart(TimerId::Discovery, ND_TIME_WINDOW, now);
        Ok(())
    }

    /// Stops the run and releases the service lock.
    pub fn stop(
        &mut self,
        exc: &mut Exc,
        timers: &mut TimerMgr,
        callbacks: &mut dyn NdCallbacks,
    ) {
        if self.state == NdState::Idle {
            return;
        }
        info!("[ND] Stopping node discovery");
        exc.cancel(ExcSlot::Hello);
        exc.cancel(ExcSlot::Welcome);
        exc.release_service(ClientId::Discovery);
        timers.stop(TimerId::Discovery);
        self.state = NdState::Idle;
        self.pending = None;
        callbacks.report(NdReport::Stopped);
    }

    /// Broadcasts the un-welcome reset. Every node falls back to the
    /// un-welcomed state and will answer the next Hello again.
    pub fn init_all(&mut self, exc: &mut Exc) -> Result<(), StackError> {
        info!("[ND] InitAll broadcast");
        self.segment_index = 0;
        exc.init_start(ADDR_BROADCAST_BLOCKING, None)
    }

    /// Response events from the transport facade.
    pub fn on_exc_event(
        &mut self,
        event: &ExcEvent,
        now: Ticks,
        exc: &mut Exc,
        timers: &mut TimerMgr,
        callbacks: &mut dyn NdCallbacks,
    ) {
        match event {
            ExcEvent::Hello(res) => self.on_hello(res, now, exc, timers, callbacks),
            ExcEvent::Welcome(res) => self.on_welcome(res, now, exc, timers, callbacks),
            _ => {}
        }
    }

    fn on_hello(
        &mut self,
        res: &ExcResult<HelloStatus>,
        now: Ticks,
        exc: &mut Exc,
        timers: &mut TimerMgr,
        callbacks: &mut dyn NdCallbacks,
    ) {
        if self.state != NdState::Scanning {
            return;
        }
        let Some(hello) = res.data.as_ref().filter(|_| res.is_success()) else {
            // Hello errors are not fatal for the scan; keep listening.
            let _ = exc.listen(ExcSlot::Hello, ClientId::Discovery);
            return;
        };
        let signature = hello.signature;
        callbacks.report(NdReport::TargetFound(signature));
        match callbacks.evaluate(&signature) {
            NdCheckResult::Welcome => {
                let admin = ADDR_ADMIN_BASE + self.segment_index;
                info!(
                    "[ND] Welcoming node {:#06X} with admin address {:#06X}",
                    signature.node_address, admin
                );
                match exc.welcome_sr(
                    signature.node_address,
                    admin,
                    SIGNATURE_VERSION,
                    signature,
                    ClientId::Discovery,
                ) {
                    Ok(()) => {
                        self.pending = Some(signature);
                        self.state = NdState::WaitWelcome;
                        timers.restart(TimerId::Discovery, ND_TIMEOUT_COMMAND, now);
                    }
                    Err(e) => {
                        warn!("[ND] Welcome could not be sent: {}", e);
                        let _ = exc.listen(ExcSlot::Hello, ClientId::Discovery);
                        timers.restart(TimerId::Discovery, ND_TIME_WINDOW, now);
                    }
                }
            }
            NdCheckResult::Ignore => {
                let _ = exc.listen(ExcSlot::Hello, ClientId::Discovery);
                timers.restart(TimerId::Discovery, ND_TIME_WINDOW, now);
            }
            NdCheckResult::Unknown => {
                callbacks.report(NdReport::Unknown(signature));
                let _ = exc.listen(ExcSlot::Hello, ClientId::Discovery);
                timers.restart(TimerId::Discovery, ND_TIME_WINDOW, now);
            }
        }
    }

    fn on_welcome(
        &mut self,
        res: &ExcResult<WelcomeResult>,
        now: Ticks,
        exc: &mut Exc,
        timers: &mut TimerMgr,
        callbacks: &mut dyn NdCallbacks,
    ) {
        if self.state != NdState::WaitWelcome {
            return;
        }
        let pending = self.pending.take();
        match res.data.as_ref() {
            Some(result) if res.is_success() && result.res == WELCOME_SUCCESS => {
                self.segment_index += 1;
                callbacks.report(NdReport::WelcomeSuccess(result.signature));
            }
            _ => {
                warn!(
                    "[ND] Welcome failed for node {:#06X} (code {:?})",
                    pending.map(|s| s.node_address).unwrap_or_default(),
                    res.code
                );
            }
        }
        // Rescan for further un-welcomed nodes.
        self.state = NdState::Scanning;
        match exc.hello_get(ADDR_BROADCAST_BLOCKING, self.version_limit, ClientId::Discovery) {
            Ok(()) => timers.restart(TimerId::Discovery, ND_TIME_WINDOW, now),
            Err(e) => {
                warn!("[ND] Hello rescan could not be sent: {}", e);
                timers.restart(TimerId::Discovery, ND_TIME_RESCAN, now);
            }
        }
    }

    /// The response-window or command timer expired.
    pub fn on_timer(
        &mut self,
        now: Ticks,
        exc: &mut Exc,
        timers: &mut TimerMgr,
        callbacks: &mut dyn NdCallbacks,
    ) {
        match self.state {
            NdState::Scanning => {
                callbacks.report(NdReport::NoResponse);
                // Keep a slow periodic scan running for late nodes.
                exc.cancel(ExcSlot::Hello);
                if exc
                    .hello_get(ADDR_BROADCAST_BLOCKING, self.version_limit, ClientId::Discovery)
                    .is_ok()
                {
                    timers.restart(TimerId::Discovery, ND_TIME_RESCAN, now);
                }
            }
            NdState::WaitWelcome => {
                // Deliver the synthetic timeout through the regular path.
                if let Some((ClientId::Discovery, event)) = exc.timeout(ExcSlot::Welcome) {
                    self.on_exc_event(&event, now, exc, timers, callbacks);
                }
            }
            NdState::Idle => {}
        }
    }

    /// Termination event: reset to Idle without reporting.
    pub fn terminate(&mut self, exc: &mut Exc, timers: &mut TimerMgr) {
        if self.state == NdState::Idle {
            return;
        }
        exc.cancel(ExcSlot::Hello);
        exc.cancel(ExcSlot::Welcome);
        exc.release_service(ClientId::Discovery);
        timers.stop(TimerId::Discovery);
        self.state = NdState::Idle;
        self.pending = None;
    }
}

impl Default for NodeDiscovery {
    fn default() -> Self {
        Self::new()
    }
}
