//! Facade for the local INIC FBlock and the status multiplexer.
//!
//! Commands towards the local INIC travel on the ICM FIFO; results come
//! back as single-shot notifications like the EXC functions. NetworkStatus
//! and power-state notifications are unsolicited and fan out to masked
//! observers, carrying a bitmask of the fields that changed.

use crate::event::{BroadcastSubject, ClientId, MaskedSubject, SingleSubject};
use crate::exc::ExcResult as StdResult;
use crate::hal::StackError;
use crate::msg::{Codec, PortMessage, Transceiver};
use crate::types::{
    NetworkAvailability, NetworkAvailInfo, NetworkAvailTransCause, NetworkStatus, OpType,
    PowerState, ADDR_LOCAL_INIC, FBLOCK_INIC, INIC_FID_DEVICE_POWER_STATE,
    INIC_FID_NETWORK_DIAG_FDX, INIC_FID_NETWORK_DIAG_FDX_END, INIC_FID_NETWORK_DIAG_HDX,
    INIC_FID_NETWORK_DIAG_HDX_END, INIC_FID_NETWORK_FALLBACK, INIC_FID_NETWORK_FALLBACK_END,
    INIC_FID_NETWORK_FORCE_NA, INIC_FID_NETWORK_FRAME_COUNTER, INIC_FID_NETWORK_INFO,
    INIC_FID_NETWORK_INIT, INIC_FID_NETWORK_SHUTDOWN, INIC_FID_NETWORK_STARTUP,
    INIC_FID_NETWORK_STARTUP_EXT, INIC_FID_NETWORK_STATUS, INIC_FID_RESOURCE_INFO, NWS_M_AVAIL,
    NWS_M_AVAIL_INFO, NWS_M_AVAIL_TRANS_CAUSE, NWS_M_EVENTS, NWS_M_MAX_POSITION,
    NWS_M_NODE_ADDRESS, NWS_M_NODE_POSITION, NWS_M_PACKET_BW,
};
use alloc::vec::Vec;
use log::{trace, warn};

/// NetworkInfo.Status payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkInfoStatus {
    pub node_address: u16,
    pub node_position: u8,
    pub total_nodes: u8,
    pub packet_bw: u16,
}

impl Codec for NetworkInfoStatus {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, StackError> {
        if buffer.len() < 6 {
            return Err(StackError::BufferOverflow);
        }
        buffer[0..2].copy_from_slice(&self.node_address.to_be_bytes());
        buffer[2] = self.node_position;
        buffer[3] = self.total_nodes;
        buffer[4..6].copy_from_slice(&self.packet_bw.to_be_bytes());
        Ok(6)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, StackError> {
        if buffer.len() < 6 {
            return Err(StackError::PayloadTooShort);
        }
        Ok(Self {
            node_address: u16::from_be_bytes([buffer[0], buffer[1]]),
            node_position: buffer[2],
            total_nodes: buffer[3],
            packet_bw: u16::from_be_bytes([buffer[4], buffer[5]]),
        })
    }
}

/// ResourceInfo.Status payload: the raw info bytes of one resource handle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceInfoStatus {
    pub resource_handle: u16,
    pub info: Vec<u8>,
}

impl Codec for ResourceInfoStatus {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, StackError> {
        let total = 3 + self.info.len();
        if buffer.len() < total {
            return Err(StackError::BufferOverflow);
        }
        buffer[0..2].copy_from_slice(&self.resource_handle.to_be_bytes());
        buffer[2] = self.info.len() as u8;
        buffer[3..total].copy_from_slice(&self.info);
        Ok(total)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, StackError> {
        if buffer.len() < 3 {
            return Err(StackError::PayloadTooShort);
        }
        let len = buffer[2] as usize;
        if buffer.len() < 3 + len {
            return Err(StackError::PayloadTooShort);
        }
        Ok(Self {
            resource_handle: u16::from_be_bytes([buffer[0], buffer[1]]),
            info: buffer[3..3 + len].to_vec(),
        })
    }
}

/// NetworkFrameCounter.Status payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameCounterStatus {
    pub reference: u32,
    pub frame_counter: u32,
    pub lock: bool,
}

impl Codec for FrameCounterStatus {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, StackError> {
        if buffer.len() < 9 {
            return Err(StackError::BufferOverflow);
        }
        buffer[0..4].copy_from_slice(&self.reference.to_be_bytes());
        buffer[4..8].copy_from_slice(&self.frame_counter.to_be_bytes());
        buffer[8] = u8::from(self.lock);
        Ok(9)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, StackError> {
        if buffer.len() < 9 {
            return Err(StackError::PayloadTooShort);
        }
        Ok(Self {
            reference: u32::from_be_bytes(
                buffer[0..4]
                    .try_into()
                    .map_err(|_| StackError::PayloadTooShort)?,
            ),
            frame_counter: u32::from_be_bytes(
                buffer[4..8]
                    .try_into()
                    .map_err(|_| StackError::PayloadTooShort)?,
            ),
            lock: buffer[8] != 0,
        })
    }
}

fn decode_network_status(payload: &[u8]) -> Result<NetworkStatus, StackError> {
    if payload.len() < 11 {
        return Err(StackError::PayloadTooShort);
    }
    let availability = match payload[0] {
        0 => NetworkAvailability::NotAvailable,
        1 => NetworkAvailability::Available,
        _ => return Err(StackError::InvalidEnumValue),
    };
    let avail_info = match payload[1] {
        0 => NetworkAvailInfo::Regular,
        1 => NetworkAvailInfo::Fallback,
        2 => NetworkAvailInfo::ForcedNotAvailable,
        3 => NetworkAvailInfo::Diagnosis,
        _ => return Err(StackError::InvalidEnumValue),
    };
    let avail_trans_cause = match payload[2] {
        0 => NetworkAvailTransCause::Command,
        1 => NetworkAvailTransCause::RingBreak,
        2 => NetworkAvailTransCause::NormalOperation,
        3 => NetworkAvailTransCause::ErrorSystem,
        4 => NetworkAvailTransCause::NoTransition,
        _ => return Err(StackError::InvalidEnumValue),
    };
    Ok(NetworkStatus {
        availability,
        avail_info,
        avail_trans_cause,
        events: u16::from_be_bytes([payload[3], payload[4]]),
        node_address: u16::from_be_bytes([payload[5], payload[6]]),
        node_position: payload[7],
        max_position: payload[8],
        packet_bw: u16::from_be_bytes([payload[9], payload[10]]),
    })
}

/// Encodes a NetworkStatus into its notification payload. Used by test
/// harnesses that play the INIC side of the channel.
pub fn encode_network_status(status: &NetworkStatus) -> Vec<u8> {
    let mut payload = alloc::vec![0u8; 11];
    payload[0] = match status.availability {
        NetworkAvailability::NotAvailable => 0,
        NetworkAvailability::Available => 1,
    };
    payload[1] = match status.avail_info {
        NetworkAvailInfo::Regular => 0,
        NetworkAvailInfo::Fallback => 1,
        NetworkAvailInfo::ForcedNotAvailable => 2,
        NetworkAvailInfo::Diagnosis => 3,
    };
    payload[2] = match status.avail_trans_cause {
        NetworkAvailTransCause::Command => 0,
        NetworkAvailTransCause::RingBreak => 1,
        NetworkAvailTransCause::NormalOperation => 2,
        NetworkAvailTransCause::ErrorSystem => 3,
        NetworkAvailTransCause::NoTransition => 4,
    };
    payload[3..5].copy_from_slice(&status.events.to_be_bytes());
    payload[5..7].copy_from_slice(&status.node_address.to_be_bytes());
    payload[7] = status.node_position;
    payload[8] = status.max_position;
    payload[9..11].copy_from_slice(&status.packet_bw.to_be_bytes());
    payload
}

/// Typed results of local INIC commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InicEvent {
    NetworkStartup(StdResult<()>),
    NetworkShutdown(StdResult<()>),
    NetworkForceNa(StdResult<()>),
    NetworkFallback(StdResult<()>),
    NetworkFallbackEnd(StdResult<()>),
    NetworkDiagFdx(StdResult<()>),
    NetworkDiagFdxEnd(StdResult<()>),
    NetworkDiagHdx(StdResult<()>),
    NetworkDiagHdxEnd(StdResult<()>),
    NetworkInit(StdResult<()>),
    NetworkInfo(StdResult<NetworkInfoStatus>),
    ResourceInfo(StdResult<ResourceInfoStatus>),
    FrameCounter(StdResult<FrameCounterStatus>),
}

/// Single-shot observer slots, one per INIC function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum InicSlot {
    NetworkStartup = 0,
    NetworkShutdown,
    NetworkForceNa,
    NetworkFallback,
    NetworkFallbackEnd,
    NetworkDiagFdx,
    NetworkDiagFdxEnd,
    NetworkDiagHdx,
    NetworkDiagHdxEnd,
    NetworkInit,
    NetworkInfo,
    ResourceInfo,
    FrameCounter,
}

impl InicSlot {
    const COUNT: usize = 13;
}

/// Outcome of dispatching one received ICM message.
#[derive(Debug)]
pub enum InicRx {
    None,
    /// Deliver a command result to the single observer.
    Single(ClientId, InicEvent),
    /// The network status changed; notify the listed observers with the
    /// change mask that selected them.
    StatusChanged(NetworkStatus, u32, Vec<ClientId>),
    /// The INIC power state changed.
    PowerState(PowerState, Vec<ClientId>),
}

/// The local INIC facade plus network-status bookkeeping.
pub struct Inic {
    ssubs: [SingleSubject; InicSlot::COUNT],
    status_subject: MaskedSubject,
    power_subject: BroadcastSubject,
    status: NetworkStatus,
    status_seen: bool,
    power_state: PowerState,
    /// Outgoing ICM FIFO.
    pub xcvr: Transceiver,
}

impl Inic {
    pub fn new() -> Self {
        Self {
            ssubs: core::array::from_fn(|_| SingleSubject::new()),
            status_subject: MaskedSubject::new(),
            power_subject: BroadcastSubject::new(),
            status: NetworkStatus::default(),
            status_seen: false,
            power_state: PowerState::Unknown,
            xcvr: Transceiver::new(),
        }
    }

    /// The last status published by the INIC, if any arrived yet.
    pub fn current_status(&self) -> Option<NetworkStatus> {
        self.status_seen.then_some(self.status)
    }

    pub fn power_state(&self) -> PowerState {
        self.power_state
    }

    pub fn register_status_observer(&mut self, client: ClientId, mask: u32) {
        self.status_subject.subscribe(client, mask);
    }

    pub fn unregister_status_observer(&mut self, client: ClientId) {
        self.status_subject.unsubscribe(client);
    }

    pub fn register_power_observer(&mut self, client: ClientId) {
        self.power_subject.subscribe(client);
    }

    pub fn cancel(&mut self, slot: InicSlot) {
        self.ssubs[slot as usize].unsubscribe();
    }

    /// Builds the synthetic timeout event for a pending command.
    pub fn timeout(&mut self, slot: InicSlot) -> Option<(ClientId, InicEvent)> {
        let client = self.ssubs[slot as usize].notify()?;
        Some((client, Self::make_event(slot, true, &[])))
    }

    fn make_event(slot: InicSlot, timeout: bool, payload: &[u8]) -> InicEvent {
        fn unit(timeout: bool, payload: &[u8]) -> StdResult<()> {
            if timeout {
                StdResult::timeout()
            } else {
                StdResult::error(payload.to_vec())
            }
        }
        match slot {
            InicSlot::NetworkStartup => InicEvent::NetworkStartup(unit(timeout, payload)),
            InicSlot::NetworkShutdown => InicEvent::NetworkShutdown(unit(timeout, payload)),
            InicSlot::NetworkForceNa => InicEvent::NetworkForceNa(unit(timeout, payload)),
            InicSlot::NetworkFallback => InicEvent::NetworkFallback(unit(timeout, payload)),
            InicSlot::NetworkFallbackEnd => InicEvent::NetworkFallbackEnd(unit(timeout, payload)),
            InicSlot::NetworkDiagFdx => InicEvent::NetworkDiagFdx(unit(timeout, payload)),
            InicSlot::NetworkDiagFdxEnd => InicEvent::NetworkDiagFdxEnd(unit(timeout, payload)),
            InicSlot::NetworkDiagHdx => InicEvent::NetworkDiagHdx(unit(timeout, payload)),
            InicSlot::NetworkDiagHdxEnd => InicEvent::NetworkDiagHdxEnd(unit(timeout, payload)),
            InicSlot::NetworkInit => InicEvent::NetworkInit(unit(timeout, payload)),
            InicSlot::NetworkInfo => InicEvent::NetworkInfo(if timeout {
                StdResult::timeout()
            } else {
                StdResult::error(payload.to_vec())
            }),
            InicSlot::ResourceInfo => InicEvent::ResourceInfo(if timeout {
                StdResult::timeout()
            } else {
                StdResult::error(payload.to_vec())
            }),
            InicSlot::FrameCounter => InicEvent::FrameCounter(if timeout {
                StdResult::timeout()
            } else {
                StdResult::error(payload.to_vec())
            }),
        }
    }

    // --- Command senders ---

    fn send(
        &mut self,
        slot: InicSlot,
        observer: ClientId,
        func_id: u16,
        payload: Vec<u8>,
    ) -> Result<(), StackError> {
        self.send_to(slot, observer, ADDR_LOCAL_INIC, func_id, payload)
    }

    fn send_to(
        &mut self,
        slot: InicSlot,
        observer: ClientId,
        target: u16,
        func_id: u16,
        payload: Vec<u8>,
    ) -> Result<(), StackError> {
        self.ssubs[slot as usize]
            .subscribe(observer)
            .map_err(|_| StackError::ApiLocked)?;
        let msg = PortMessage::new(target, FBLOCK_INIC, func_id, OpType::StartResult)
            .with_payload(payload);
        match self.xcvr.push(msg) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.ssubs[slot as usize].unsubscribe();
                Err(e)
            }
        }
    }

    /// Starts the network. `auto_forced_na` is the time in ms after which
    /// the INIC gives up and enters ForcedNotAvailable.
    pub fn network_startup(
        &mut self,
        auto_forced_na: u16,
        packet_bw: u16,
        observer: ClientId,
    ) -> Result<(), StackError> {
        let mut payload = alloc::vec![0u8; 4];
        payload[0..2].copy_from_slice(&auto_forced_na.to_be_bytes());
        payload[2..4].copy_from_slice(&packet_bw.to_be_bytes());
        self.send(
            InicSlot::NetworkStartup,
            observer,
            INIC_FID_NETWORK_STARTUP,
            payload,
        )
    }

    /// Startup variant used when a proxy channel bandwidth is configured.
    pub fn network_startup_ext(
        &mut self,
        auto_forced_na: u16,
        packet_bw: u16,
        proxy_channel_bw: u16,
        observer: ClientId,
    ) -> Result<(), StackError> {
        let mut payload = alloc::vec![0u8; 6];
        payload[0..2].copy_from_slice(&auto_forced_na.to_be_bytes());
        payload[2..4].copy_from_slice(&packet_bw.to_be_bytes());
        payload[4..6].copy_from_slice(&proxy_channel_bw.to_be_bytes());
        self.send(
            InicSlot::NetworkStartup,
            observer,
            INIC_FID_NETWORK_STARTUP_EXT,
            payload,
        )
    }

    pub fn network_shutdown(&mut self, observer: ClientId) -> Result<(), StackError> {
        self.send(
            InicSlot::NetworkShutdown,
            observer,
            INIC_FID_NETWORK_SHUTDOWN,
            Vec::new(),
        )
    }

    /// Leaves the ForcedNotAvailable state (`force = false`).
    pub fn network_force_na(&mut self, force: bool, observer: ClientId) -> Result<(), StackError> {
        self.send(
            InicSlot::NetworkForceNa,
            observer,
            INIC_FID_NETWORK_FORCE_NA,
            alloc::vec![u8::from(force)],
        )
    }

    pub fn network_fallback(
        &mut self,
        auto_forced_na: u16,
        fallback_duration: u16,
        observer: ClientId,
    ) -> Result<(), StackError> {
        let mut payload = alloc::vec![0u8; 4];
        payload[0..2].copy_from_slice(&auto_forced_na.to_be_bytes());
        payload[2..4].copy_from_slice(&fallback_duration.to_be_bytes());
        self.send(
            InicSlot::NetworkFallback,
            observer,
            INIC_FID_NETWORK_FALLBACK,
            payload,
        )
    }

    pub fn network_fallback_end(&mut self, observer: ClientId) -> Result<(), StackError> {
        self.send(
            InicSlot::NetworkFallbackEnd,
            observer,
            INIC_FID_NETWORK_FALLBACK_END,
            Vec::new(),
        )
    }

    pub fn network_diag_fdx(&mut self, observer: ClientId) -> Result<(), StackError> {
        self.send(
            InicSlot::NetworkDiagFdx,
            observer,
            INIC_FID_NETWORK_DIAG_FDX,
            Vec::new(),
        )
    }

    pub fn network_diag_fdx_end(&mut self, observer: ClientId) -> Result<(), StackError> {
        self.send(
            InicSlot::NetworkDiagFdxEnd,
            observer,
            INIC_FID_NETWORK_DIAG_FDX_END,
            Vec::new(),
        )
    }

    pub fn network_diag_hdx(&mut self, observer: ClientId) -> Result<(), StackError> {
        self.send(
            InicSlot::NetworkDiagHdx,
            observer,
            INIC_FID_NETWORK_DIAG_HDX,
            Vec::new(),
        )
    }

    pub fn network_diag_hdx_end(&mut self, observer: ClientId) -> Result<(), StackError> {
        self.send(
            InicSlot::NetworkDiagHdxEnd,
            observer,
            INIC_FID_NETWORK_DIAG_HDX_END,
            Vec::new(),
        )
    }

    /// Broadcast reset of the welcomed state on every node.
    pub fn network_init(&mut self, observer: ClientId) -> Result<(), StackError> {
        self.send(
            InicSlot::NetworkInit,
            observer,
            INIC_FID_NETWORK_INIT,
            Vec::new(),
        )
    }

    /// Queries network info from the INIC of `target` (local or remote).
    pub fn network_info_get(&mut self, target: u16, observer: ClientId) -> Result<(), StackError> {
        self.ssubs[InicSlot::NetworkInfo as usize]
            .subscribe(observer)
            .map_err(|_| StackError::ApiLocked)?;
        let msg = PortMessage::new(target, FBLOCK_INIC, INIC_FID_NETWORK_INFO, OpType::Get);
        match self.xcvr.push(msg) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.ssubs[InicSlot::NetworkInfo as usize].unsubscribe();
                Err(e)
            }
        }
    }

    /// Queries the info record of one resource handle.
    pub fn resource_info_get(
        &mut self,
        target: u16,
        resource_handle: u16,
        observer: ClientId,
    ) -> Result<(), StackError> {
        self.ssubs[InicSlot::ResourceInfo as usize]
            .subscribe(observer)
            .map_err(|_| StackError::ApiLocked)?;
        let msg = PortMessage::new(target, FBLOCK_INIC, INIC_FID_RESOURCE_INFO, OpType::Get)
            .with_payload(resource_handle.to_be_bytes().to_vec());
        match self.xcvr.push(msg) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.ssubs[InicSlot::ResourceInfo as usize].unsubscribe();
                Err(e)
            }
        }
    }

    pub fn frame_counter_get(
        &mut self,
        reference: u32,
        observer: ClientId,
    ) -> Result<(), StackError> {
        self.ssubs[InicSlot::FrameCounter as usize]
            .subscribe(observer)
            .map_err(|_| StackError::ApiLocked)?;
        let msg = PortMessage::new(
            ADDR_LOCAL_INIC,
            FBLOCK_INIC,
            INIC_FID_NETWORK_FRAME_COUNTER,
            OpType::Get,
        )
        .with_payload(reference.to_be_bytes().to_vec());
        match self.xcvr.push(msg) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.ssubs[InicSlot::FrameCounter as usize].unsubscribe();
                Err(e)
            }
        }
    }

    // --- Receive path ---

    /// Filters and dispatches one received INIC-FBlock message.
    pub fn on_rx(&mut self, msg: &PortMessage) -> InicRx {
        if msg.id.fblock != FBLOCK_INIC {
            return InicRx::None;
        }
        if msg.id.func_id == INIC_FID_NETWORK_STATUS && msg.id.op_type == OpType::Status {
            return self.on_status(&msg.payload);
        }
        if msg.id.func_id == INIC_FID_DEVICE_POWER_STATE && msg.id.op_type == OpType::Status {
            return self.on_power_state(&msg.payload);
        }
        let is_error = matches!(msg.id.op_type, OpType::Error | OpType::ErrorAck);
        let (slot, event) = match msg.id.func_id {
            INIC_FID_NETWORK_STARTUP | INIC_FID_NETWORK_STARTUP_EXT => (
                InicSlot::NetworkStartup,
                Self::unit_event(InicSlot::NetworkStartup, msg, is_error),
            ),
            INIC_FID_NETWORK_SHUTDOWN => (
                InicSlot::NetworkShutdown,
                Self::unit_event(InicSlot::NetworkShutdown, msg, is_error),
            ),
            INIC_FID_NETWORK_FORCE_NA => (
                InicSlot::NetworkForceNa,
                Self::unit_event(InicSlot::NetworkForceNa, msg, is_error),
            ),
            INIC_FID_NETWORK_FALLBACK => (
                InicSlot::NetworkFallback,
                Self::unit_event(InicSlot::NetworkFallback, msg, is_error),
            ),
            INIC_FID_NETWORK_FALLBACK_END => (
                InicSlot::NetworkFallbackEnd,
                Self::unit_event(InicSlot::NetworkFallbackEnd, msg, is_error),
            ),
            INIC_FID_NETWORK_DIAG_FDX => (
                InicSlot::NetworkDiagFdx,
                Self::unit_event(InicSlot::NetworkDiagFdx, msg, is_error),
            ),
            INIC_FID_NETWORK_DIAG_FDX_END => (
                InicSlot::NetworkDiagFdxEnd,
                Self::unit_event(InicSlot::NetworkDiagFdxEnd, msg, is_error),
            ),
            INIC_FID_NETWORK_DIAG_HDX => (
                InicSlot::NetworkDiagHdx,
                Self::unit_event(InicSlot::NetworkDiagHdx, msg, is_error),
            ),
            INIC_FID_NETWORK_DIAG_HDX_END => (
                InicSlot::NetworkDiagHdxEnd,
                Self::unit_event(InicSlot::NetworkDiagHdxEnd, msg, is_error),
            ),
            INIC_FID_NETWORK_INIT => (
                InicSlot::NetworkInit,
                Self::unit_event(InicSlot::NetworkInit, msg, is_error),
            ),
            INIC_FID_NETWORK_INFO => (
                InicSlot::NetworkInfo,
                if is_error {
                    Some(InicEvent::NetworkInfo(StdResult::error(msg.payload.clone())))
                } else {
                    match NetworkInfoStatus::deserialize(&msg.payload) {
                        Ok(info) => Some(InicEvent::NetworkInfo(StdResult::success(info))),
                        Err(_) => None,
                    }
                },
            ),
            INIC_FID_RESOURCE_INFO => (
                InicSlot::ResourceInfo,
                if is_error {
                    Some(InicEvent::ResourceInfo(StdResult::error(
                        msg.payload.clone(),
                    )))
                } else {
                    match ResourceInfoStatus::deserialize(&msg.payload) {
                        Ok(info) => Some(InicEvent::ResourceInfo(StdResult::success(info))),
                        Err(_) => None,
                    }
                },
            ),
            INIC_FID_NETWORK_FRAME_COUNTER => (
                InicSlot::FrameCounter,
                if is_error {
                    Some(InicEvent::FrameCounter(StdResult::error(
                        msg.payload.clone(),
                    )))
                } else {
                    match FrameCounterStatus::deserialize(&msg.payload) {
                        Ok(info) => Some(InicEvent::FrameCounter(StdResult::success(info))),
                        Err(_) => None,
                    }
                },
            ),
            other => {
                trace!("[INIC] Ignoring unhandled FktID {:#05X}", other);
                return InicRx::None;
            }
        };
        let Some(event) = event else {
            warn!(
                "[INIC] Dropping malformed response for FktID {:#05X}",
                msg.id.func_id
            );
            return InicRx::None;
        };
        match self.ssubs[slot as usize].notify() {
            Some(client) => InicRx::Single(client, event),
            None => InicRx::None,
        }
    }

    fn unit_event(slot: InicSlot, msg: &PortMessage, is_error: bool) -> Option<InicEvent> {
        if is_error {
            Some(Self::make_event(slot, false, &msg.payload))
        } else {
            Some(match slot {
                InicSlot::NetworkStartup => InicEvent::NetworkStartup(StdResult::success(())),
                InicSlot::NetworkShutdown => InicEvent::NetworkShutdown(StdResult::success(())),
                InicSlot::NetworkForceNa => InicEvent::NetworkForceNa(StdResult::success(())),
                InicSlot::NetworkFallback => InicEvent::NetworkFallback(StdResult::success(())),
                InicSlot::NetworkFallbackEnd => {
                    InicEvent::NetworkFallbackEnd(StdResult::success(()))
                }
                InicSlot::NetworkDiagFdx => InicEvent::NetworkDiagFdx(StdResult::success(())),
                InicSlot::NetworkDiagFdxEnd => InicEvent::NetworkDiagFdxEnd(StdResult::success(())),
                InicSlot::NetworkDiagHdx => InicEvent::NetworkDiagHdx(StdResult::success(())),
                InicSlot::NetworkDiagHdxEnd => InicEvent::NetworkDiagHdxEnd(StdResult::success(())),
                InicSlot::NetworkInit => InicEvent::NetworkInit(StdResult::success(())),
                _ => return None,
            })
        }
    }

    fn on_status(&mut self, payload: &[u8]) -> InicRx {
        let status = match decode_network_status(payload) {
            Ok(status) => status,
            Err(e) => {
                warn!("[INIC] Dropping malformed NetworkStatus: {:?}", e);
                return InicRx::None;
            }
        };
        let mut mask = 0u32;
        if !self.status_seen || status.availability != self.status.availability {
            mask |= NWS_M_AVAIL;
        }
        if !self.status_seen || status.avail_info != self.status.avail_info {
            mask |= NWS_M_AVAIL_INFO;
        }
        if !self.status_seen || status.avail_trans_cause != self.status.avail_trans_cause {
            mask |= NWS_M_AVAIL_TRANS_CAUSE;
        }
        if !self.status_seen || status.node_address != self.status.node_address {
            mask |= NWS_M_NODE_ADDRESS;
        }
        if !self.status_seen || status.node_position != self.status.node_position {
            mask |= NWS_M_NODE_POSITION;
        }
        if !self.status_seen || status.max_position != self.status.max_position {
            mask |= NWS_M_MAX_POSITION;
        }
        if !self.status_seen || status.packet_bw != self.status.packet_bw {
            mask |= NWS_M_PACKET_BW;
        }
        if status.events != 0 {
            mask |= NWS_M_EVENTS;
        }
        self.status = status;
        self.status_seen = true;
        let observers = self.status_subject.notify(mask);
        InicRx::StatusChanged(status, mask, observers)
    }

    fn on_power_state(&mut self, payload: &[u8]) -> InicRx {
        let state = match payload.first() {
            Some(0) => PowerState::FullyOperational,
            Some(1) => PowerState::ShutdownImminent,
            Some(2) => PowerState::CriticalTemperature,
            _ => PowerState::Unknown,
        };
        self.power_state = state;
        InicRx::PowerState(state, self.power_subject.notify())
    }
}

impl Default for Inic {
    fn default() -> Self {
        Self::new()
    }
}
