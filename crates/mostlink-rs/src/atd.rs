//! Audio transport delay (ATD) calculation.
//!
//! Composes the per-route delay from the source node's streaming-port
//! clock configuration and both nodes' ring positions. The default method
//! queries the streaming port and the network info of source and sink
//! (FSY-locked derivation); the legacy closed-form over routing-delay
//! constants is available behind the `atd-method-1` feature.

use crate::event::ClientId;
use crate::hal::StackError;
use crate::inic::{Inic, InicEvent, InicSlot};
use crate::routing::Route;
use crate::timer::{TimerId, TimerMgr};
use crate::types::Ticks;
use log::{error, info};

/// Supervision timeout per query.
const ATD_TIMEOUT_COMMAND: u16 = 100;

/// Bytes per network frame.
#[cfg(feature = "atd-method-1")]
const ATD_NB: u32 = 128;

/// Multiplication factor turning frame bytes into microseconds at the
/// 48 kHz network sample rate.
#[cfg(feature = "atd-method-1")]
const ATD_FACTOR: u32 = 21;

/// Streaming-port clock configuration values.
const CLK_CFG_64FS: u8 = 0x01;
const CLK_CFG_128FS: u8 = 0x02;
const CLK_CFG_256FS: u8 = 0x03;
const CLK_CFG_512FS: u8 = 0x04;

/// Maps a streaming-port clock configuration to the number of streaming
/// port loads per frame.
fn map_clk_to_spl(clock_config: u8) -> Option<u16> {
    match clock_config {
        CLK_CFG_64FS => Some(1),
        CLK_CFG_128FS => Some(2),
        CLK_CFG_256FS => Some(4),
        CLK_CFG_512FS => Some(8),
        _ => None,
    }
}

/// Outcome of a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtdResult {
    /// Delay in microseconds.
    Successful(u16),
    Error,
}

/// Measurement report handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtdReport {
    pub route_id: u16,
    pub result: AtdResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AtdState {
    Idle,
    /// Waiting for the source streaming-port resource info.
    StreamPortSource,
    /// Waiting for the source network info.
    NetInfoSource,
    /// Waiting for the sink network info.
    NetInfoSink,
}

#[derive(Debug, Clone, Copy, Default)]
struct NodeData {
    node_address: u16,
    node_pos: u16,
    spl: u16,
}

pub struct AtdCalculator {
    state: AtdState,
    route_id: u16,
    source: NodeData,
    sink: NodeData,
    total_node_num: u16,
}

impl AtdCalculator {
    pub fn new() -> Self {
        Self {
            state: AtdState::Idle,
            route_id: 0,
            source: NodeData::default(),
            sink: NodeData::default(),
            total_node_num: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state != AtdState::Idle
    }

    /// Starts a measurement for `route`.
    ///
    /// Both endpoints must be built with known streaming-port handles,
    /// and source and sink must be distinct nodes.
    pub fn start(
        &mut self,
        route: &Route,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Result<(), StackError> {
        if self.state != AtdState::Idle {
            return Err(StackError::ApiLocked);
        }
        let source_addr = route.source.signature.node_address;
        let sink_addr = route.sink.signature.node_address;
        if !route.source.built
            || !route.sink.built
            || route.source.streaming_port_handle == 0
            || source_addr == 0
            || sink_addr == 0
            || source_addr == sink_addr
        {
            error!("[ATD] Route {} not measurable", route.id);
            return Err(StackError::ParamError);
        }
        info!("[ATD] Starting measurement for route {}", route.id);
        self.route_id = route.id;
        self.source = NodeData {
            node_address: source_addr,
            ..NodeData::default()
        };
        self.sink = NodeData {
            node_address: sink_addr,
            ..NodeData::default()
        };
        inic.resource_info_get(
            source_addr,
            route.source.streaming_port_handle,
            ClientId::Atd,
        )?;
        timers.restart(TimerId::Atd, ATD_TIMEOUT_COMMAND, now);
        self.state = AtdState::StreamPortSource;
        Ok(())
    }

    /// Query responses from the INIC facade. Returns the final report once
    /// the chain is complete or failed.
    pub fn on_inic_event(
        &mut self,
        event: &InicEvent,
        now: Ticks,
        inic: &mut Inic,
        timers: &mut TimerMgr,
    ) -> Option<AtdReport> {
        timers.stop(TimerId::Atd);
        match (self.state, event) {
            (AtdState::StreamPortSource, InicEvent::ResourceInfo(res)) => {
                let clock_config = res
                    .data
                    .as_ref()
                    .filter(|_| res.is_success())
                    .and_then(|info| info.info.get(1).copied());
                match clock_config.and_then(map_clk_to_spl) {
                    Some(spl) => {
                        self.source.spl = spl;
                        if inic
                            .network_info_get(self.source.node_address, ClientId::Atd)
                            .is_err()
                        {
                            return Some(self.fail());
                        }
                        timers.restart(TimerId::Atd, ATD_TIMEOUT_COMMAND, now);
                        self.state = AtdState::NetInfoSource;
                        None
                    }
                    None => {
                        error!("[ATD] Unsupported streaming-port clock configuration");
                        Some(self.fail())
                    }
                }
            }
            (AtdState::NetInfoSource, InicEvent::NetworkInfo(res)) => {
                match res.data.as_ref().filter(|_| res.is_success()) {
                    Some(net_info) => {
                        self.source.node_pos = u16::from(net_info.node_position);
                        self.total_node_num = u16::from(net_info.total_nodes);
                        if inic
                            .network_info_get(self.sink.node_address, ClientId::Atd)
                            .is_err()
                        {
                            return Some(self.fail());
                        }
                        timers.restart(TimerId::Atd, ATD_TIMEOUT_COMMAND, now);
                        self.state = AtdState::NetInfoSink;
                        None
                    }
                    None => Some(self.fail()),
                }
            }
            (AtdState::NetInfoSink, InicEvent::NetworkInfo(res)) => {
                match res.data.as_ref().filter(|_| res.is_success()) {
                    Some(net_info) => {
                        self.sink.node_pos = u16::from(net_info.node_position);
                        self.state = AtdState::Idle;
                        let report = match calculate_delay(
                            self.source.node_pos,
                            self.sink.node_pos,
                            self.total_node_num,
                            self.source.spl,
                        ) {
                            Some(atd_us) => {
                                info!("[ATD] Route {}: {} us", self.route_id, atd_us);
                                AtdReport {
                                    route_id: self.route_id,
                                    result: AtdResult::Successful(atd_us),
                                }
                            }
                            None => AtdReport {
                                route_id: self.route_id,
                                result: AtdResult::Error,
                            },
                        };
                        Some(report)
                    }
                    None => Some(self.fail()),
                }
            }
            _ => None,
        }
    }

    /// The query supervision timer expired.
    pub fn on_timer(&mut self, inic: &mut Inic) -> Option<AtdReport> {
        if self.state == AtdState::Idle {
            return None;
        }
        inic.cancel(InicSlot::ResourceInfo);
        inic.cancel(InicSlot::NetworkInfo);
        Some(self.fail())
    }

    /// Termination: abort a pending measurement.
    pub fn terminate(&mut self, inic: &mut Inic, timers: &mut TimerMgr) {
        if self.state != AtdState::Idle {
            timers.stop(TimerId::Atd);
            inic.cancel(InicSlot::ResourceInfo);
            inic.cancel(InicSlot::NetworkInfo);
            self.state = AtdState::Idle;
        }
    }

    fn fail(&mut self) -> AtdReport {
        self.state = AtdState::Idle;
        AtdReport {
            route_id: self.route_id,
            result: AtdResult::Error,
        }
    }
}

impl Default for AtdCalculator {
    fn default() -> Self {
        Self::new()
    }
}

/// Derives the audio transport delay in microseconds (FSY-locked method).
///
/// `source_pos`/`sink_pos` are ring positions (0 = timing master), `total`
/// is the number of nodes on the ring, `spl` the streaming-port loads per
/// frame of the source. Returns `None` when source and sink share one
/// position.
#[cfg(not(feature = "atd-method-1"))]
pub fn calculate_delay(source_pos: u16, sink_pos: u16, total: u16, spl: u16) -> Option<u16> {
    if source_pos == sink_pos {
        return None;
    }
    let (m1, m2, m3, m4): (u16, u16, u16, u16) = if source_pos == 0 {
        (1, 0, 0, 0)
    } else if sink_pos == 0 {
        (0, 1, 0, 0)
    } else {
        (
            0,
            0,
            u16::from(source_pos > sink_pos),
            u16::from(source_pos < sink_pos),
        )
    };

    let mut s1: u16 = 0;
    let mut s2: u16 = 0;
    if source_pos > sink_pos {
        for i in 0..total {
            if (i < sink_pos && i > 0) || (i > source_pos && i < total) {
                s1 += 1;
            }
            if i > sink_pos && i < source_pos {
                s2 += 1;
            }
        }
    } else {
        for i in 0..total {
            if (i < source_pos && i > 0) || (i > sink_pos && i < total) {
                s2 += 1;
            }
            if i > source_pos && i < sink_pos {
                s1 += 1;
            }
        }
    }
    let sp = u16::from(spl == 1);

    // Delay in hundredths of a microsecond.
    let atd = m1 * (41 + s1 * 41)
        + m2 * (2040 - s2 * 41)
        + m3 * (2040 - s2 * 41)
        + m4 * (40 + s1 * 41)
        + sp * 2083
        + 8333;
    Some(atd / 100)
}

/// Legacy closed-form over routing-delay constants (method 1). The
/// routing delays are derived from the sync-connection resource info; the
/// network delay term counts three bytes per slave node passed plus one
/// frame for the timing master.
#[cfg(feature = "atd-method-1")]
pub fn calculate_delay(source_pos: u16, sink_pos: u16, total: u16, spl: u16) -> Option<u16> {
    if source_pos == sink_pos || spl == 0 {
        return None;
    }
    // Nodes passed between source and sink in signal direction.
    let hops = if sink_pos > source_pos {
        sink_pos - source_pos - 1
    } else {
        total - source_pos + sink_pos - 1
    };
    let passes_master = source_pos > sink_pos && sink_pos != 0;
    let num_master_nodes = u32::from(passes_master);
    let num_slave_nodes = u32::from(hops) - num_master_nodes;

    let spl = u32::from(spl);
    let routing_delay_source = (ATD_NB / spl) + ATD_NB + 6;
    let routing_delay_sink = 6 + ATD_NB + ATD_NB + (ATD_NB / spl);
    let network_delay = num_slave_nodes * 3 + num_master_nodes * ATD_NB;

    let atd = (routing_delay_sink + network_delay + routing_delay_source) * ATD_FACTOR / ATD_NB;
    u16::try_from(atd).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inic::InicRx;
    use crate::msg::PortMessage;
    use crate::routing::{Endpoint, RouteState};
    use crate::types::{
        OpType, Signature, FBLOCK_INIC, INIC_FID_NETWORK_INFO, INIC_FID_RESOURCE_INFO,
    };
    use alloc::vec;

    fn route(source_addr: u16, sink_addr: u16) -> Route {
        Route {
            id: 7,
            source: Endpoint {
                signature: Signature {
                    node_address: source_addr,
                    ..Signature::default()
                },
                streaming_port_handle: 0x0101,
                sync_connection_handle: 0x0102,
                built: true,
            },
            sink: Endpoint {
                signature: Signature {
                    node_address: sink_addr,
                    ..Signature::default()
                },
                streaming_port_handle: 0x0201,
                sync_connection_handle: 0x0202,
                built: true,
            },
            active: true,
            state: RouteState::Built,
            atd_value: 0,
        }
    }

    #[cfg(not(feature = "atd-method-1"))]
    #[test]
    fn test_formula_five_node_ring() {
        // N=5, source at 1, sink at 3, 64Fs: 10497 hundredths -> 104 us.
        assert_eq!(calculate_delay(1, 3, 5, 1), Some(104));
    }

    #[cfg(not(feature = "atd-method-1"))]
    #[test]
    fn test_formula_rejects_equal_positions() {
        assert_eq!(calculate_delay(2, 2, 5, 1), None);
    }

    #[cfg(not(feature = "atd-method-1"))]
    #[test]
    fn test_formula_source_is_root() {
        // M1 path: atd = 41 + S1*41 + SP*2083 + 8333.
        // s=0, k=2, N=4: S1 counts nodes strictly between 0 and 2 -> 1.
        assert_eq!(calculate_delay(0, 2, 4, 1), Some((41 + 41 + 2083 + 8333) / 100));
    }

    #[cfg(not(feature = "atd-method-1"))]
    #[test]
    fn test_query_chain_and_report() {
        let mut atd = AtdCalculator::new();
        let mut inic = Inic::new();
        let mut timers = TimerMgr::new();
        atd.start(&route(0x0201, 0x0203), 0, &mut inic, &mut timers)
            .unwrap();
        // Streaming-port resource info: clock config byte at offset 1.
        let msg = PortMessage::new(1, FBLOCK_INIC, INIC_FID_RESOURCE_INFO, OpType::Status)
            .with_payload(vec![0x01, 0x01, 2, 0x00, CLK_CFG_64FS]);
        let event = match inic.on_rx(&msg) {
            InicRx::Single(ClientId::Atd, ev) => ev,
            other => panic!("unexpected: {:?}", other),
        };
        assert!(atd
            .on_inic_event(&event, 0, &mut inic, &mut timers)
            .is_none());
        // Source network info: position 1 of 5 nodes.
        let msg = PortMessage::new(1, FBLOCK_INIC, INIC_FID_NETWORK_INFO, OpType::Status)
            .with_payload(vec![0x02, 0x01, 1, 5, 0, 52]);
        let event = match inic.on_rx(&msg) {
            InicRx::Single(ClientId::Atd, ev) => ev,
            other => panic!("unexpected: {:?}", other),
        };
        assert!(atd
            .on_inic_event(&event, 0, &mut inic, &mut timers)
            .is_none());
        // Sink network info: position 3.
        let msg = PortMessage::new(1, FBLOCK_INIC, INIC_FID_NETWORK_INFO, OpType::Status)
            .with_payload(vec![0x02, 0x03, 3, 5, 0, 52]);
        let event = match inic.on_rx(&msg) {
            InicRx::Single(ClientId::Atd, ev) => ev,
            other => panic!("unexpected: {:?}", other),
        };
        let report = atd
            .on_inic_event(&event, 0, &mut inic, &mut timers)
            .unwrap();
        assert_eq!(report.route_id, 7);
        assert_eq!(report.result, AtdResult::Successful(104));
        assert!(!atd.is_running());
    }

    #[test]
    fn test_source_equals_sink_rejected() {
        let mut atd = AtdCalculator::new();
        let mut inic = Inic::new();
        let mut timers = TimerMgr::new();
        assert_eq!(
            atd.start(&route(0x0201, 0x0201), 0, &mut inic, &mut timers),
            Err(StackError::ParamError)
        );
        assert!(inic.xcvr.is_empty());
    }

    #[test]
    fn test_unbuilt_endpoint_rejected() {
        let mut atd = AtdCalculator::new();
        let mut inic = Inic::new();
        let mut timers = TimerMgr::new();
        let mut r = route(0x0201, 0x0203);
        r.sink.built = false;
        assert_eq!(
            atd.start(&r, 0, &mut inic, &mut timers),
            Err(StackError::ParamError)
        );
    }

    #[cfg(not(feature = "atd-method-1"))]
    #[test]
    fn test_bad_clock_config_reports_error() {
        let mut atd = AtdCalculator::new();
        let mut inic = Inic::new();
        let mut timers = TimerMgr::new();
        atd.start(&route(0x0201, 0x0203), 0, &mut inic, &mut timers)
            .unwrap();
        let msg = PortMessage::new(1, FBLOCK_INIC, INIC_FID_RESOURCE_INFO, OpType::Status)
            .with_payload(vec![0x01, 0x01, 2, 0x00, 0x77]);
        let event = match inic.on_rx(&msg) {
            InicRx::Single(ClientId::Atd, ev) => ev,
            other => panic!("unexpected: {:?}", other),
        };
        let report = atd
            .on_inic_event(&event, 0, &mut inic, &mut timers)
            .unwrap();
        assert_eq!(report.result, AtdResult::Error);
    }
}
