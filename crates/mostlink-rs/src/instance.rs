//! Stack instance: configuration, lifecycle and the service loop.
//!
//! One [`Stack`] owns every component by value and mediates their
//! interaction: received control messages and expired timers are turned
//! into pending events, the cooperative scheduler drains them in priority
//! order, and cross-component notices (job requests, reports, state
//! changes) are routed to their consumers within the same service call.

use crate::atd::{AtdCalculator, AtdReport, AtdResult};
use crate::diag::{FdxDiag, FdxReport, HdxDiag, HdxReport};
use crate::discovery::{NdCallbacks, NdCheckResult, NdReport, NodeDiscovery};
use crate::event::ClientId;
use crate::exc::wire::AliveStatus;
use crate::exc::{Exc, ExcEvent, RxDispatch};
use crate::fallback::{FallbackProtection, FbpReport};
use crate::hal::{HostCallbacks, LowLevelDriver, StackError};
use crate::inic::{Inic, InicEvent, InicRx};
use crate::msg::{Codec, PortMessage};
use crate::prog::{ProgCommand, ProgReport, Programming};
use crate::routing::RouteManager;
use crate::scheduler::{Scheduler, ServiceId};
use crate::starter::{FallbackOutcome, NetStarter, StarterNotice};
use crate::supv::{NodeRecord, ProgEventCode, Supervisor, SupervisorCallbacks, SupvNotice};
use crate::supv::mode::ApiIndex;
use crate::timer::{TimerId, TimerMgr};
use crate::types::{
    NetworkStatus, Signature, SupvMode, SupvState, Ticks, DEFAULT_PACKET_BW, FIFO_ACK_TIMEOUT,
    WATCHDOG_TRIGGER_TIME,
};
use alloc::boxed::Box;
use alloc::vec::Vec;
use log::{error, info, warn};

/// Diagnosis flavor executed when the supervisor enters Diagnosis mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagType {
    #[default]
    FullDuplex,
    HalfDuplex,
}

/// Network-status notification-mask bits reserved for future use; they
/// are ignored when the application sets them.
const NWS_MASK_RESERVED: u32 = 0x1F00;

/// Time the network starter gets to reach the quiet state required for
/// programming before `StartupTimeout` is reported.
const PROG_STARTUP_TIMEOUT: u16 = 5000;

/// Initialization configuration of one stack instance.
#[derive(Debug, Clone)]
pub struct InitData {
    /// Gates the FIFO ack timeout and watchdog in both directions.
    pub inic_watchdog_enabled: bool,
    /// Startup supervisor mode; Diagnosis and Programming are rejected.
    pub mode: SupvMode,
    /// Diagnosis flavor bound to the Diagnosis mode.
    pub diag_type: DiagType,
    /// Packet bandwidth in bytes per frame.
    pub packet_bw: u16,
    /// Proxy channel bandwidth; nonzero selects the extended startup.
    pub proxy_channel_bw: u16,
    /// Fallback duration distributed to remote nodes.
    pub fallback_duration: u16,
    /// Expected nodes of the network.
    pub nodes: Vec<NodeRecord>,
    /// Application observer mask for network-status changes.
    pub network_status_mask: u32,
}

impl Default for InitData {
    fn default() -> Self {
        Self {
            inic_watchdog_enabled: true,
            mode: SupvMode::Normal,
            diag_type: DiagType::default(),
            packet_bw: DEFAULT_PACKET_BW,
            proxy_channel_bw: 0,
            fallback_duration: crate::starter::FALLBACK_DURATION_INFINITE,
            nodes: Vec::new(),
            network_status_mask: 0,
        }
    }
}

impl InitData {
    /// Validates the configuration before an instance is created.
    pub fn validate(&self) -> Result<(), StackError> {
        match self.mode {
            SupvMode::Normal | SupvMode::Inactive | SupvMode::Fallback | SupvMode::Manual => {}
            _ => return Err(StackError::ParamError),
        }
        if self.packet_bw == 0 {
            return Err(StackError::ParamError);
        }
        Ok(())
    }
}

/// Pending event for one component, drained by the scheduler.
enum Pending {
    Exc(ExcEvent),
    Inic(InicEvent),
    Status(NetworkStatus, u32),
    Alive(AliveStatus),
    Timer(TimerId),
}

/// Progress of the programming mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProgPhase {
    Inactive,
    /// Discovery enumerates programmable nodes.
    Scan,
    /// A programming run is executing.
    Programming,
}

fn service_of(client: ClientId) -> ServiceId {
    match client {
        ClientId::Starter => ServiceId::Starter,
        ClientId::Discovery => ServiceId::Discovery,
        ClientId::DiagFdx => ServiceId::DiagFdx,
        ClientId::DiagHdx => ServiceId::DiagHdx,
        ClientId::Fallback => ServiceId::Fallback,
        ClientId::Prog => ServiceId::Prog,
        ClientId::Atd => ServiceId::Atd,
        ClientId::Supv | ClientId::App => ServiceId::Supv,
    }
}

fn client_of_timer(timer: TimerId) -> ClientId {
    match timer {
        TimerId::StarterGuard | TimerId::StarterPeriodic => ClientId::Starter,
        TimerId::Discovery => ClientId::Discovery,
        TimerId::DiagFdx => ClientId::DiagFdx,
        TimerId::DiagHdx => ClientId::DiagHdx,
        TimerId::Fallback | TimerId::FallbackGuard => ClientId::Fallback,
        TimerId::Prog => ClientId::Prog,
        TimerId::Atd => ClientId::Atd,
        TimerId::Supv => ClientId::Supv,
    }
}

/// One supervisor stack instance.
pub struct Stack {
    initialized: bool,
    watchdog_enabled: bool,
    diag_type: DiagType,
    app_status_mask: u32,
    initial_mode: SupvMode,
    scheduler: Scheduler,
    timers: TimerMgr,
    exc: Exc,
    inic: Inic,
    starter: NetStarter,
    discovery: NodeDiscovery,
    fdx: FdxDiag,
    hdx: HdxDiag,
    fbp: FallbackProtection,
    prog: Programming,
    atd: AtdCalculator,
    supv: Supervisor,
    callbacks: Box<dyn SupervisorCallbacks>,
    route_mgr: Option<Box<dyn RouteManager>>,
    driver: Box<dyn LowLevelDriver>,
    host: Option<Box<dyn HostCallbacks>>,
    mailbox: Vec<(ClientId, Pending)>,
    prog_phase: ProgPhase,
}

impl Stack {
    pub fn new(
        init: InitData,
        driver: Box<dyn LowLevelDriver>,
        callbacks: Box<dyn SupervisorCallbacks>,
    ) -> Result<Self, StackError> {
        init.validate()?;
        let mut starter = NetStarter::new(init.packet_bw, init.proxy_channel_bw);
        starter.set_fallback_duration(init.fallback_duration);
        Ok(Self {
            initialized: false,
            watchdog_enabled: init.inic_watchdog_enabled,
            diag_type: init.diag_type,
            app_status_mask: init.network_status_mask & !NWS_MASK_RESERVED,
            initial_mode: init.mode,
            scheduler: Scheduler::new(),
            timers: TimerMgr::new(),
            exc: Exc::new(),
            inic: Inic::new(),
            starter,
            discovery: NodeDiscovery::new(),
            fdx: FdxDiag::new(),
            hdx: HdxDiag::new(),
            fbp: FallbackProtection::new(),
            prog: Programming::new(),
            atd: AtdCalculator::new(),
            supv: Supervisor::new(init.mode, &init.nodes),
            callbacks,
            route_mgr: None,
            driver,
            host: None,
            mailbox: Vec::new(),
            prog_phase: ProgPhase::Inactive,
        })
    }

    pub fn set_route_manager(&mut self, route_mgr: Box<dyn RouteManager>) {
        self.route_mgr = Some(route_mgr);
    }

    pub fn set_host_callbacks(&mut self, host: Box<dyn HostCallbacks>) {
        self.host = Some(host);
    }

    /// FIFO timing towards the driver: `(ack_timeout, watchdog)` in ms,
    /// both zero (infinite) while the watchdog is disabled.
    pub fn watchdog_params(&self) -> (u16, u16) {
        if self.watchdog_enabled {
            (FIFO_ACK_TIMEOUT, WATCHDOG_TRIGGER_TIME)
        } else {
            (0, 0)
        }
    }

    /// Performs the attach: starts the driver and brings the supervisor
    /// into its configured startup mode.
    pub fn init(&mut self, now: Ticks) -> Result<(), StackError> {
        if self.initialized {
            return Err(StackError::AlreadySet);
        }
        self.driver.start()?;
        self.initialized = true;
        info!(
            "[SUPV] Attached; startup mode {:?}, watchdog {:?}",
            self.initial_mode,
            self.watchdog_params()
        );
        if self.initial_mode != SupvMode::Manual {
            match self
                .starter
                .start_process(self.initial_mode, now, &mut self.inic, &mut self.timers)
            {
                Ok(notices) => self.handle_starter_notices(notices, now),
                Err(e) => {
                    error!("[SUPV] Initial mode could not be started: {}", e);
                    return Err(e);
                }
            }
        }
        self.flush_tx();
        Ok(())
    }

    /// Tears the instance down.
    pub fn stop(&mut self, now: Ticks) {
        if !self.initialized {
            return;
        }
        self.terminate_components(now);
        self.driver.stop();
        self.initialized = false;
    }

    fn check_initialized(&self) -> Result<(), StackError> {
        if self.initialized {
            Ok(())
        } else {
            Err(StackError::NotInitialized)
        }
    }

    /// Feeds one received control message into the stack. Decoding errors
    /// are surfaced so the driver can count them.
    pub fn rx_message(&mut self, raw: &[u8], _now: Ticks) -> Result<(), StackError> {
        self.check_initialized()?;
        let msg = PortMessage::deserialize(raw)?;
        let mut handled = true;
        match self.inic.on_rx(&msg) {
            InicRx::Single(client, event) => {
                self.mailbox.push((client, Pending::Inic(event)));
                self.scheduler.set_event(service_of(client), 0x01);
            }
            InicRx::StatusChanged(status, mask, observers) => {
                for client in observers {
                    self.mailbox.push((client, Pending::Status(status, mask)));
                    self.scheduler.set_event(service_of(client), 0x01);
                }
                // The application observer mask is served independently of
                // the component subscriptions.
                if (mask & self.app_status_mask) != 0 {
                    self.mailbox
                        .push((ClientId::App, Pending::Status(status, mask)));
                    self.scheduler.set_event(ServiceId::Supv, 0x01);
                }
            }
            InicRx::PowerState(_, _) => {}
            InicRx::None => handled = false,
        }
        if !handled {
            match self.exc.on_rx(&msg) {
                RxDispatch::Single(client, event) => {
                    self.mailbox.push((client, Pending::Exc(event)));
                    self.scheduler.set_event(service_of(client), 0x01);
                }
                RxDispatch::Alive(status, observers) => {
                    for client in observers {
                        self.mailbox.push((client, Pending::Alive(status)));
                        self.scheduler.set_event(service_of(client), 0x01);
                    }
                }
                RxDispatch::None => {}
            }
        }
        self.request_host_service();
        Ok(())
    }

    /// Fatal link events (FIFO unsynchronization): every running
    /// procedure is torn down and the driver link is reset.
    pub fn notify_unsync(&mut self, now: Ticks) {
        warn!("[SUPV] Unsynchronization; terminating all procedures");
        self.terminate_components(now);
        self.driver.reset();
    }

    fn terminate_components(&mut self, _now: Ticks) {
        self.discovery.terminate(&mut self.exc, &mut self.timers);
        for report in self
            .fdx
            .terminate(&mut self.exc, &mut self.inic, &mut self.timers)
        {
            self.callbacks.diag_fdx(&report);
        }
        for report in self
            .hdx
            .terminate(&mut self.exc, &mut self.inic, &mut self.timers)
        {
            self.callbacks.diag_hdx(&report);
        }
        self.fbp
            .terminate(&mut self.exc, &mut self.inic, &mut self.timers);
        for report in self.prog.terminate(&mut self.exc, &mut self.timers) {
            self.callbacks.prog_result(&report);
        }
        self.atd.terminate(&mut self.inic, &mut self.timers);
        self.mailbox.clear();
        self.exc.xcvr.clear();
        self.inic.xcvr.clear();
    }

    /// Earliest tick at which `service` must run again.
    pub fn next_service_time(&self) -> Option<Ticks> {
        if self.scheduler.has_pending() {
            Some(0)
        } else {
            self.timers.next_deadline()
        }
    }

    /// Runs all pending work. The host calls this from its main loop when
    /// service was requested or the returned deadline elapsed.
    pub fn service(&mut self, now: Ticks) {
        // Expired timers become pending events first.
        for timer in self.timers.expired(now) {
            let client = client_of_timer(timer);
            self.mailbox.push((client, Pending::Timer(timer)));
            self.scheduler.set_event(service_of(client), 0x01);
        }
        while let Some((service, _events)) = self.scheduler.next_service() {
            self.dispatch_service(service, now);
        }
        self.flush_tx();
        // Everything pending was drained; reprogram the host wakeup for
        // the earliest timer deadline.
        let _ = self.scheduler.take_service_request();
        if let Some(host) = self.host.as_mut() {
            if let Some(deadline) = self.timers.next_deadline() {
                let delay = deadline.saturating_sub(now).min(u64::from(u16::MAX)) as u16;
                host.set_application_timer(delay);
            }
        }
    }

    /// Forwards the "service call requested" edge to the host.
    fn request_host_service(&mut self) {
        if self.scheduler.take_service_request() {
            if let Some(host) = self.host.as_mut() {
                host.request_service();
            }
        }
    }

    fn take_mail(&mut self, service: ServiceId) -> Vec<(ClientId, Pending)> {
        let mut taken = Vec::new();
        let mut index = 0;
        while index < self.mailbox.len() {
            if service_of(self.mailbox[index].0) == service {
                taken.push(self.mailbox.remove(index));
            } else {
                index += 1;
            }
        }
        taken
    }

    fn dispatch_service(&mut self, service: ServiceId, now: Ticks) {
        for (client, pending) in self.take_mail(service) {
            match client {
                ClientId::Starter => self.dispatch_starter(pending, now),
                ClientId::Discovery => self.dispatch_discovery(pending, now),
                ClientId::DiagFdx => self.dispatch_fdx(pending, now),
                ClientId::DiagHdx => self.dispatch_hdx(pending, now),
                ClientId::Fallback => self.dispatch_fallback(pending, now),
                ClientId::Prog => self.dispatch_prog(pending, now),
                ClientId::Atd => self.dispatch_atd(pending, now),
                ClientId::Supv | ClientId::App => self.dispatch_supv(pending, now),
            }
        }
    }

    // --- Per-component dispatch ---

    fn dispatch_starter(&mut self, pending: Pending, now: Ticks) {
        let notices = match pending {
            Pending::Status(status, mask) => self.starter.on_network_status(
                &status,
                mask,
                now,
                &mut self.inic,
                &mut self.timers,
            ),
            Pending::Inic(event) => {
                self.starter
                    .on_inic_event(&event, now, &mut self.inic, &mut self.timers)
            }
            Pending::Timer(TimerId::StarterGuard) | Pending::Timer(TimerId::StarterPeriodic) => {
                self.starter
                    .on_guard_timer(now, &mut self.inic, &mut self.timers)
            }
            _ => Vec::new(),
        };
        self.handle_starter_notices(notices, now);
    }

    fn dispatch_discovery(&mut self, pending: Pending, now: Ticks) {
        let mut bridge = NdBridge {
            supv: &mut self.supv,
            callbacks: self.callbacks.as_mut(),
            notices: Vec::new(),
        };
        match pending {
            Pending::Exc(event) => self.discovery.on_exc_event(
                &event,
                now,
                &mut self.exc,
                &mut self.timers,
                &mut bridge,
            ),
            Pending::Timer(TimerId::Discovery) => {
                self.discovery
                    .on_timer(now, &mut self.exc, &mut self.timers, &mut bridge)
            }
            _ => {}
        }
        let NdBridge { notices, .. } = bridge;
        self.handle_supv_notices(notices);
    }

    fn dispatch_fdx(&mut self, pending: Pending, now: Ticks) {
        let reports = match pending {
            Pending::Exc(event) => self.fdx.on_exc_event(
                &event,
                now,
                &mut self.exc,
                &mut self.inic,
                &mut self.timers,
            ),
            Pending::Inic(event) => self.fdx.on_inic_event(
                &event,
                now,
                &mut self.exc,
                &mut self.inic,
                &mut self.timers,
            ),
            Pending::Timer(TimerId::DiagFdx) => {
                self.fdx
                    .on_timer(now, &mut self.exc, &mut self.inic, &mut self.timers)
            }
            _ => Vec::new(),
        };
        for report in reports {
            self.callbacks.diag_fdx(&report);
            if report == FdxReport::Finished {
                self.leave_diagnosis_mode(now);
            }
        }
    }

    fn dispatch_hdx(&mut self, pending: Pending, now: Ticks) {
        let reports = match pending {
            Pending::Exc(event) => self.hdx.on_exc_event(
                &event,
                now,
                &mut self.exc,
                &mut self.inic,
                &mut self.timers,
            ),
            Pending::Inic(event) => self.hdx.on_inic_event(
                &event,
                now,
                &mut self.exc,
                &mut self.inic,
                &mut self.timers,
            ),
            Pending::Timer(TimerId::DiagHdx) => {
                self.hdx
                    .on_timer(now, &mut self.exc, &mut self.inic, &mut self.timers)
            }
            _ => Vec::new(),
        };
        for report in reports {
            self.callbacks.diag_hdx(&report);
            if report == HdxReport::End {
                self.leave_diagnosis_mode(now);
            }
        }
    }

    fn dispatch_fallback(&mut self, pending: Pending, now: Ticks) {
        let reports = match pending {
            Pending::Inic(event) => self.fbp.on_inic_event(
                &event,
                now,
                &mut self.exc,
                &mut self.inic,
                &mut self.timers,
            ),
            Pending::Exc(event) => {
                self.fbp
                    .on_exc_event(&event, &mut self.exc, &mut self.inic, &mut self.timers)
            }
            Pending::Status(status, _mask) => self.fbp.on_network_status(
                &status,
                &mut self.exc,
                &mut self.inic,
                &mut self.timers,
            ),
            Pending::Timer(_) => {
                self.fbp
                    .on_timer(now, &mut self.exc, &mut self.inic, &mut self.timers)
            }
            _ => Vec::new(),
        };
        for report in reports {
            self.callbacks.fallback_report(&report);
            let outcome = match report {
                FbpReport::Success => FallbackOutcome::Success,
                FbpReport::End => FallbackOutcome::End,
                FbpReport::Timeout | FbpReport::Error => FallbackOutcome::Failed,
            };
            let notices =
                self.starter
                    .on_fallback_outcome(outcome, now, &mut self.inic, &mut self.timers);
            self.handle_starter_notices(notices, now);
        }
    }

    fn dispatch_prog(&mut self, pending: Pending, now: Ticks) {
        let reports = match pending {
            Pending::Exc(event) => {
                self.prog
                    .on_exc_event(&event, now, &mut self.exc, &mut self.timers)
            }
            Pending::Timer(TimerId::Prog) => self.prog.on_timer(&mut self.exc, &mut self.timers),
            _ => Vec::new(),
        };
        for report in reports {
            self.callbacks.prog_result(&report);
            if self.prog_phase == ProgPhase::Programming {
                match report {
                    ProgReport::Success => {
                        // Rescan for further programmable nodes.
                        self.prog_phase = ProgPhase::Scan;
                        let _ = self.discovery.init_all(&mut self.exc);
                        if let Err(e) = self.discovery.start(now, &mut self.exc, &mut self.timers) {
                            warn!("[SUPV] Rescan after programming failed: {}", e);
                        }
                    }
                    ProgReport::Error { .. } => {
                        self.callbacks.prog_event(ProgEventCode::ProgramError);
                        self.exit_programming_mode(now);
                    }
                }
            }
        }
    }

    fn dispatch_atd(&mut self, pending: Pending, now: Ticks) {
        let report = match pending {
            Pending::Inic(event) => {
                self.atd
                    .on_inic_event(&event, now, &mut self.inic, &mut self.timers)
            }
            Pending::Timer(TimerId::Atd) => self.atd.on_timer(&mut self.inic),
            _ => None,
        };
        if let Some(report) = report {
            self.store_atd_result(&report);
            self.callbacks.atd_result(&report);
        }
    }

    fn dispatch_supv(&mut self, pending: Pending, now: Ticks) {
        match pending {
            Pending::Status(status, mask) => {
                if (mask & self.app_status_mask) != 0 {
                    self.callbacks.network_status(&status, mask);
                }
            }
            Pending::Inic(InicEvent::FrameCounter(res)) => {
                self.callbacks.frame_counter(res.data);
            }
            Pending::Timer(TimerId::Supv) => {
                // Programming startup supervision.
                if self.supv.target_mode() == SupvMode::Programming
                    && self.prog_phase == ProgPhase::Inactive
                {
                    self.callbacks.prog_event(ProgEventCode::StartupTimeout);
                    self.exit_programming_mode(now);
                }
            }
            Pending::Alive(_status) => {}
            _ => {}
        }
    }

    // --- Cross-component notice routing ---

    fn handle_starter_notices(&mut self, notices: Vec<StarterNotice>, now: Ticks) {
        for notice in notices {
            match notice {
                StarterNotice::StateChanged(mode, state) => {
                    if let Some((mode, state)) = self.supv.on_starter_state(mode, state) {
                        self.callbacks.report_mode(mode, state);
                        self.on_mode_reached(mode, state, now);
                    }
                }
                StarterNotice::TriggerInitAll => {
                    let _ = self.discovery.init_all(&mut self.exc);
                    let notices = self.supv.invalidate_nodes();
                    self.handle_supv_notices(notices);
                }
                StarterNotice::StartFallbackProtection(duration) => {
                    if let Err(e) =
                        self.fbp
                            .start(duration, now, &mut self.exc, &mut self.inic, &mut self.timers)
                    {
                        error!("[SUPV] Fallback protection could not start: {}", e);
                        let notices = self.starter.on_fallback_outcome(
                            FallbackOutcome::Failed,
                            now,
                            &mut self.inic,
                            &mut self.timers,
                        );
                        self.handle_starter_notices(notices, now);
                    }
                }
                StarterNotice::StopFallbackProtection => {
                    if let Err(e) = self.fbp.stop(now, &mut self.inic, &mut self.timers) {
                        error!("[SUPV] Fallback protection could not stop: {}", e);
                        let notices = self.starter.on_fallback_outcome(
                            FallbackOutcome::Failed,
                            now,
                            &mut self.inic,
                            &mut self.timers,
                        );
                        self.handle_starter_notices(notices, now);
                    }
                }
            }
        }
    }

    /// Mode-specific follow-up once the starter reports a state.
    fn on_mode_reached(&mut self, mode: SupvMode, state: SupvState, now: Ticks) {
        if state != SupvState::Ready {
            return;
        }
        match mode {
            SupvMode::Normal => {
                if !self.discovery.is_running() {
                    if let Err(e) = self.discovery.start(now, &mut self.exc, &mut self.timers) {
                        warn!("[SUPV] Node discovery could not start: {}", e);
                    }
                }
            }
            SupvMode::Diagnosis => {
                let ret = match self.diag_type {
                    DiagType::FullDuplex => {
                        self.fdx
                            .start(now, &mut self.exc, &mut self.inic, &mut self.timers)
                    }
                    DiagType::HalfDuplex => {
                        self.hdx
                            .start(now, &mut self.exc, &mut self.inic, &mut self.timers)
                    }
                };
                if let Err(e) = ret {
                    error!("[SUPV] Diagnosis could not start: {}", e);
                    self.leave_diagnosis_mode(now);
                }
            }
            SupvMode::Programming => {
                self.timers.stop(TimerId::Supv);
                self.prog_phase = ProgPhase::Scan;
                if let Err(e) = self.discovery.start(now, &mut self.exc, &mut self.timers) {
                    error!("[SUPV] Programming scan could not start: {}", e);
                    self.callbacks.prog_event(ProgEventCode::InitNwsError);
                    self.exit_programming_mode(now);
                }
            }
            _ => {}
        }
    }

    fn handle_supv_notices(&mut self, notices: Vec<SupvNotice>) {
        for notice in notices {
            match notice {
                SupvNotice::NodeAvailability(signature, available) => {
                    if let Some(route_mgr) = self.route_mgr.as_mut() {
                        route_mgr.node_availability_changed(&signature, available);
                    }
                }
            }
        }
    }

    /// Diagnosis runs return to Inactive mode internally.
    fn leave_diagnosis_mode(&mut self, now: Ticks) {
        if self.supv.target_mode() != SupvMode::Diagnosis {
            return;
        }
        self.supv.force_mode(SupvMode::Inactive);
        match self
            .starter
            .start_process(SupvMode::Inactive, now, &mut self.inic, &mut self.timers)
        {
            Ok(notices) => self.handle_starter_notices(notices, now),
            Err(e) => error!("[SUPV] Leaving diagnosis mode failed: {}", e),
        }
    }

    /// Programming exits return to Inactive mode internally.
    fn exit_programming_mode(&mut self, now: Ticks) {
        self.prog_phase = ProgPhase::Inactive;
        self.timers.stop(TimerId::Supv);
        if self.discovery.is_running() {
            let mut bridge = NdBridge {
                supv: &mut self.supv,
                callbacks: self.callbacks.as_mut(),
                notices: Vec::new(),
            };
            self.discovery
                .stop(&mut self.exc, &mut self.timers, &mut bridge);
        }
        if self.supv.target_mode() != SupvMode::Programming {
            return;
        }
        self.supv.force_mode(SupvMode::Inactive);
        match self
            .starter
            .start_process(SupvMode::Inactive, now, &mut self.inic, &mut self.timers)
        {
            Ok(notices) => self.handle_starter_notices(notices, now),
            Err(e) => error!("[SUPV] Leaving programming mode failed: {}", e),
        }
    }

    fn store_atd_result(&mut self, report: &AtdReport) {
        if let (AtdResult::Successful(value), Some(route_mgr)) =
            (report.result, self.route_mgr.as_mut())
        {
            route_mgr.set_atd_value(report.route_id, value);
        }
    }

    fn flush_tx(&mut self) {
        let mut buffer = [0u8; 64];
        loop {
            let msg = match self.inic.xcvr.pop() {
                Some(msg) => msg,
                None => match self.exc.xcvr.pop() {
                    Some(msg) => msg,
                    None => break,
                },
            };
            match msg.serialize(&mut buffer) {
                Ok(len) => {
                    if let Err(e) = self.driver.tx_transmit(&buffer[..len]) {
                        warn!("[SUPV] Tx failed, dropping message: {}", e);
                    }
                }
                Err(e) => error!("[SUPV] Tx serialization failed: {}", e),
            }
        }
    }

    // --- Public API (mode-gated) ---

    pub fn mode(&self) -> SupvMode {
        self.supv.mode()
    }

    pub fn state(&self) -> SupvState {
        self.supv.state()
    }

    /// `Supv_SetMode`: requests a new supervisor mode.
    pub fn set_mode(&mut self, mode: SupvMode, now: Ticks) -> Result<(), StackError> {
        self.check_initialized()?;
        let target = self.supv.request_mode(mode)?;
        if self.discovery.is_running() {
            let mut bridge = NdBridge {
                supv: &mut self.supv,
                callbacks: self.callbacks.as_mut(),
                notices: Vec::new(),
            };
            self.discovery
                .stop(&mut self.exc, &mut self.timers, &mut bridge);
        }
        if target == SupvMode::Programming {
            self.timers.restart(TimerId::Supv, PROG_STARTUP_TIMEOUT, now);
        }
        let notices = self
            .starter
            .start_process(target, now, &mut self.inic, &mut self.timers)?;
        self.handle_starter_notices(notices, now);
        self.flush_tx();
        Ok(())
    }

    /// `Supv_SetFbDuration`: configures the fallback duration.
    pub fn set_fallback_duration(&mut self, duration: u16) -> Result<(), StackError> {
        self.check_initialized()?;
        self.supv.check_api(ApiIndex::SupvSetFbDuration)?;
        self.starter.set_fallback_duration(duration);
        Ok(())
    }

    /// `Supv_ProgramNode`: programs a remote node found by the scan.
    pub fn program_node(
        &mut self,
        node_pos_addr: u16,
        signature: Signature,
        commands: Vec<ProgCommand>,
        now: Ticks,
    ) -> Result<(), StackError> {
        self.check_initialized()?;
        self.supv.check_api(ApiIndex::SupvProgramNode)?;
        if node_pos_addr == crate::types::ADDR_LOCAL_NODE_POS {
            // Remote programming only; the local node runs through the
            // prog_local callback during the scan.
            return Err(StackError::ParamError);
        }
        if self.prog_phase != ProgPhase::Scan {
            return Err(StackError::ApiLocked);
        }
        if !self.supv.node_programmable(signature.node_address) {
            return Err(StackError::ParamError);
        }
        if self.discovery.is_running() {
            let mut bridge = NdBridge {
                supv: &mut self.supv,
                callbacks: self.callbacks.as_mut(),
                notices: Vec::new(),
            };
            self.discovery
                .stop(&mut self.exc, &mut self.timers, &mut bridge);
        }
        self.prog
            .start(node_pos_addr, signature, commands, now, &mut self.exc, &mut self.timers)?;
        self.prog_phase = ProgPhase::Programming;
        self.flush_tx();
        Ok(())
    }

    /// `Supv_ProgramExit`: leaves the programming mode.
    pub fn program_exit(&mut self, now: Ticks) -> Result<(), StackError> {
        self.check_initialized()?;
        self.supv.check_api(ApiIndex::SupvProgramExit)?;
        if self.prog_phase != ProgPhase::Scan {
            return Err(StackError::ApiLocked);
        }
        self.callbacks.prog_event(ProgEventCode::ExitRequested);
        self.exit_programming_mode(now);
        self.flush_tx();
        Ok(())
    }

    /// `Rm_SetRouteActive`: forwards to the routing engine.
    pub fn set_route_active(&mut self, route_id: u16, active: bool) -> Result<(), StackError> {
        self.check_initialized()?;
        self.supv.check_api(ApiIndex::RmSetRouteActive)?;
        self.route_mgr
            .as_mut()
            .ok_or(StackError::NotAvailable)?
            .set_route_active(route_id, active)
    }

    /// `Rm_GetAtdValue`: cached delay of a route.
    pub fn get_atd_value(&self, route_id: u16) -> Result<u16, StackError> {
        self.check_initialized()?;
        self.supv.check_api(ApiIndex::RmGetAtdValue)?;
        self.route_mgr
            .as_ref()
            .ok_or(StackError::NotAvailable)?
            .route(route_id)
            .map(|r| r.atd_value)
            .ok_or(StackError::ParamError)
    }

    /// Starts an ATD measurement for a route; the result arrives through
    /// the `atd_result` callback and updates the route cache.
    pub fn measure_atd(&mut self, route_id: u16, now: Ticks) -> Result<(), StackError> {
        self.check_initialized()?;
        self.supv.check_api(ApiIndex::RmGetAtdValue)?;
        let route = *self
            .route_mgr
            .as_ref()
            .ok_or(StackError::NotAvailable)?
            .route(route_id)
            .ok_or(StackError::ParamError)?;
        self.atd.start(&route, now, &mut self.inic, &mut self.timers)?;
        self.flush_tx();
        Ok(())
    }

    /// `Network_GetFrameCounter`: asynchronous query, answered through the
    /// `frame_counter` callback.
    pub fn get_frame_counter(&mut self, reference: u32) -> Result<(), StackError> {
        self.check_initialized()?;
        self.supv.check_api(ApiIndex::NetworkGetFrameCounter)?;
        self.inic.frame_counter_get(reference, ClientId::App)?;
        self.flush_tx();
        Ok(())
    }

    /// `Network_GetNodesCount`: node count from the last network status.
    pub fn get_nodes_count(&self) -> Result<u8, StackError> {
        self.check_initialized()?;
        self.supv.check_api(ApiIndex::NetworkGetNodesCount)?;
        self.inic
            .current_status()
            .map(|s| s.max_position)
            .ok_or(StackError::NotAvailable)
    }

    /// Manual-mode API: marks one configured node available.
    pub fn set_node_available(
        &mut self,
        node_address: u16,
        available: bool,
    ) -> Result<(), StackError> {
        self.check_initialized()?;
        let notices = self.supv.set_node_available(node_address, available)?;
        self.handle_supv_notices(notices);
        Ok(())
    }

    pub fn node_available(&self, node_address: u16) -> Result<bool, StackError> {
        self.check_initialized()?;
        self.supv.node_available(node_address)
    }

    // --- Manual-mode procedures ---

    /// `Nd_Start`: manual node discovery.
    pub fn nd_start(&mut self, now: Ticks) -> Result<(), StackError> {
        self.check_initialized()?;
        self.supv.check_api(ApiIndex::ManualOnly)?;
        self.discovery.start(now, &mut self.exc, &mut self.timers)?;
        self.flush_tx();
        Ok(())
    }

    /// `Nd_Stop`: stops manual node discovery.
    pub fn nd_stop(&mut self) -> Result<(), StackError> {
        self.check_initialized()?;
        self.supv.check_api(ApiIndex::ManualOnly)?;
        let mut bridge = NdBridge {
            supv: &mut self.supv,
            callbacks: self.callbacks.as_mut(),
            notices: Vec::new(),
        };
        self.discovery
            .stop(&mut self.exc, &mut self.timers, &mut bridge);
        Ok(())
    }

    /// Manual full-duplex diagnosis.
    pub fn diag_fdx_start(&mut self, now: Ticks) -> Result<(), StackError> {
        self.check_initialized()?;
        self.supv.check_api(ApiIndex::ManualOnly)?;
        self.fdx
            .start(now, &mut self.exc, &mut self.inic, &mut self.timers)?;
        self.flush_tx();
        Ok(())
    }

    /// Manual half-duplex diagnosis.
    pub fn diag_hdx_start(&mut self, now: Ticks) -> Result<(), StackError> {
        self.check_initialized()?;
        self.supv.check_api(ApiIndex::ManualOnly)?;
        self.hdx
            .start(now, &mut self.exc, &mut self.inic, &mut self.timers)?;
        self.flush_tx();
        Ok(())
    }

    /// Manual programming of a node (`Prog_Start`).
    pub fn prog_start(
        &mut self,
        node_pos_addr: u16,
        signature: Signature,
        commands: Vec<ProgCommand>,
        now: Ticks,
    ) -> Result<(), StackError> {
        self.check_initialized()?;
        self.supv.check_api(ApiIndex::ManualOnly)?;
        self.prog
            .start(node_pos_addr, signature, commands, now, &mut self.exc, &mut self.timers)?;
        self.flush_tx();
        Ok(())
    }
}

/// Delegates discovery callbacks through the supervisor's mode dispatch.
struct NdBridge<'a> {
    supv: &'a mut Supervisor,
    callbacks: &'a mut dyn SupervisorCallbacks,
    notices: Vec<SupvNotice>,
}

impl NdCallbacks for NdBridge<'_> {
    fn evaluate(&mut self, signature: &Signature) -> NdCheckResult {
        self.supv.nd_evaluate(signature, self.callbacks)
    }

    fn report(&mut self, report: NdReport) {
        self.notices
            .extend(self.supv.nd_report(&report, self.callbacks));
    }
}

/// Maximum number of API instances.
pub const MAX_INSTANCES: usize = 10;

/// Explicit pool of stack instances.
///
/// Instances are addressed by the handle returned at creation; the pool
/// replaces the static instance array of classic embedded stacks without
/// introducing global state.
pub struct InstancePool {
    slots: Vec<Option<Stack>>,
}

/// Handle to one pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceHandle(usize);

impl InstancePool {
    pub fn new() -> Self {
        let mut slots = Vec::new();
        slots.resize_with(MAX_INSTANCES, || None);
        Self { slots }
    }

    /// Places a new instance into the first free slot.
    pub fn create_instance(
        &mut self,
        init: InitData,
        driver: Box<dyn LowLevelDriver>,
        callbacks: Box<dyn SupervisorCallbacks>,
    ) -> Result<InstanceHandle, StackError> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(StackError::NotAvailable)?;
        self.slots[index] = Some(Stack::new(init, driver, callbacks)?);
        Ok(InstanceHandle(index))
    }

    pub fn get_mut(&mut self, handle: InstanceHandle) -> Option<&mut Stack> {
        self.slots.get_mut(handle.0).and_then(|slot| slot.as_mut())
    }

    /// Stops and removes an instance.
    pub fn destroy_instance(&mut self, handle: InstanceHandle, now: Ticks) {
        if let Some(stack) = self.slots.get_mut(handle.0).and_then(|s| s.take()).as_mut() {
            stack.stop(now);
        }
    }
}

impl Default for InstancePool {
    fn default() -> Self {
        Self::new()
    }
}
