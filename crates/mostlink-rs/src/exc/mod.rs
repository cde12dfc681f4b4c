//! Transport facade for the ExtendedNetworkControl FBlock.
//!
//! One primitive: send a typed request, register a single-shot observer for
//! the typed response, and let the caller supervise the command timeout.
//! The receive path dispatches on `{fblock, func_id, op_type}` and hands
//! the decoded payload to exactly one waiting component. The facade never
//! retries on its own; retry policy belongs to the caller.

pub mod wire;

use crate::event::{BroadcastSubject, ClientId, SingleSubject};
use crate::hal::StackError;
use crate::msg::{Codec, PortMessage, Transceiver};
use crate::types::{
    MsgResult, OpType, Signature, ADDR_LOCAL_INIC, EXC_FID_ALIVE_MESSAGE, EXC_FID_CABLE_LINK_DIAG,
    EXC_FID_ENABLE_PORT, EXC_FID_ENABLE_TX, EXC_FID_HELLO, EXC_FID_INIT, EXC_FID_MEMORY_READ,
    EXC_FID_MEMORY_WRITE, EXC_FID_MEM_SESSION_CLOSE, EXC_FID_MEM_SESSION_OPEN,
    EXC_FID_PHY_LAY_TEST, EXC_FID_PHY_LAY_TEST_RESULT, EXC_FID_REVERSE_REQUEST,
    EXC_FID_SIGNATURE, EXC_FID_WELCOME, FBLOCK_EXC, MAX_MEM_DATA_LEN,
};
use alloc::vec::Vec;
use log::{trace, warn};
use wire::{
    AliveStatus, CableLinkDiagResult, HelloStatus, MemId, MemReadStatus, MemWriteStatus,
    PhyTestResult, ReverseReq0List, ReverseReq0Result, ReverseReq1List, ReverseReq1Result,
    ReverseReqHeader, ReverseReqId, SessionType, SignatureStatus, WelcomeResult,
};

/// Result wrapper delivered to the waiting observer.
///
/// Either `data` holds the decoded response, or `code` carries the failure
/// and `info` the raw error bytes for callers that interpret them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcResult<T> {
    pub code: MsgResult,
    pub info: Vec<u8>,
    pub data: Option<T>,
}

impl<T> ExcResult<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: MsgResult::Success,
            info: Vec::new(),
            data: Some(data),
        }
    }

    pub fn error(info: Vec<u8>) -> Self {
        Self {
            code: MsgResult::FunctionSpecific,
            info,
            data: None,
        }
    }

    pub fn timeout() -> Self {
        Self {
            code: MsgResult::Timeout,
            info: Vec::new(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// The 24-bit function-specific error code from the error payload.
    pub fn fs_error_code(&self) -> Option<u32> {
        if self.info.len() >= 3 {
            Some(
                (u32::from(self.info[0]) << 16)
                    | (u32::from(self.info[1]) << 8)
                    | u32::from(self.info[2]),
            )
        } else {
            None
        }
    }
}

/// Typed response events delivered by the facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExcEvent {
    Hello(ExcResult<HelloStatus>),
    Welcome(ExcResult<WelcomeResult>),
    Signature(ExcResult<SignatureStatus>),
    Init(ExcResult<()>),
    EnablePort(ExcResult<()>),
    CableLinkDiag(ExcResult<CableLinkDiagResult>),
    PhyTest(ExcResult<()>),
    PhyTestResult(ExcResult<PhyTestResult>),
    ReverseReq0(ExcResult<ReverseReq0Result>),
    ReverseReq1(ExcResult<ReverseReq1Result>),
    EnableTx(ExcResult<()>),
    MemSessionOpen(ExcResult<u16>),
    MemSessionClose(ExcResult<u8>),
    MemoryRead(ExcResult<MemReadStatus>),
    MemoryWrite(ExcResult<MemWriteStatus>),
}

/// Single-shot observer slots, one per EXC function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ExcSlot {
    Hello = 0,
    Welcome,
    Signature,
    Init,
    EnablePort,
    CableLinkDiag,
    PhyTest,
    PhyTestResult,
    ReverseRequest,
    EnableTx,
    MemSessionOpen,
    MemSessionClose,
    MemoryRead,
    MemoryWrite,
}

impl ExcSlot {
    const COUNT: usize = 14;
}

/// Outcome of dispatching one received message.
#[derive(Debug)]
pub enum RxDispatch {
    /// Nobody was waiting for this message.
    None,
    /// Deliver the event to the single observer.
    Single(ClientId, ExcEvent),
    /// Alive broadcast for every registered multi-observer.
    Alive(AliveStatus, Vec<ClientId>),
}

/// The EXC transport facade.
pub struct Exc {
    ssubs: [SingleSubject; ExcSlot::COUNT],
    alive: BroadcastSubject,
    /// Provides exclusive execution of Node Discovery, Programming,
    /// HalfDuplex/FullDuplex Diagnosis and Fallback Protection.
    service_lock: Option<ClientId>,
    /// Outgoing RCM FIFO.
    pub xcvr: Transceiver,
}

impl Exc {
    pub fn new() -> Self {
        Self {
            ssubs: core::array::from_fn(|_| SingleSubject::new()),
            alive: BroadcastSubject::new(),
            service_lock: None,
            xcvr: Transceiver::new(),
        }
    }

    // --- Service lock ---

    /// Acquires the EXC service lock for an exclusive procedure run.
    pub fn reserve_service(&mut self, client: ClientId) -> Result<(), StackError> {
        match self.service_lock {
            Some(owner) if owner != client => Err(StackError::ApiLocked),
            _ => {
                self.service_lock = Some(client);
                Ok(())
            }
        }
    }

    pub fn release_service(&mut self, client: ClientId) {
        if self.service_lock == Some(client) {
            self.service_lock = None;
        }
    }

    pub fn service_owner(&self) -> Option<ClientId> {
        self.service_lock
    }

    // --- Observer management ---

    pub fn register_alive_observer(&mut self, client: ClientId) {
        self.alive.subscribe(client);
    }

    pub fn unregister_alive_observer(&mut self, client: ClientId) {
        self.alive.unsubscribe(client);
    }

    /// Drops a pending observer, e.g. on termination while a command is in
    /// flight.
    pub fn cancel(&mut self, slot: ExcSlot) {
        self.ssubs[slot as usize].unsubscribe();
    }

    /// Re-arms a single-shot observer without sending a request. Used when
    /// several nodes answer one broadcast and the caller wants the next
    /// response too.
    pub fn listen(&mut self, slot: ExcSlot, client: ClientId) -> Result<(), StackError> {
        self.ssubs[slot as usize]
            .subscribe(client)
            .map_err(|_| StackError::ApiLocked)
    }

    /// Builds the synthetic timeout event for a slot whose command timer
    /// expired, removing the registered observer.
    pub fn timeout(&mut self, slot: ExcSlot) -> Option<(ClientId, ExcEvent)> {
        let client = self.ssubs[slot as usize].notify()?;
        let event = match slot {
            ExcSlot::Hello => ExcEvent::Hello(ExcResult::timeout()),
            ExcSlot::Welcome => ExcEvent::Welcome(ExcResult::timeout()),
            ExcSlot::Signature => ExcEvent::Signature(ExcResult::timeout()),
            ExcSlot::Init => ExcEvent::Init(ExcResult::timeout()),
            ExcSlot::EnablePort => ExcEvent::EnablePort(ExcResult::timeout()),
            ExcSlot::CableLinkDiag => ExcEvent::CableLinkDiag(ExcResult::timeout()),
            ExcSlot::PhyTest => ExcEvent::PhyTest(ExcResult::timeout()),
            ExcSlot::PhyTestResult => ExcEvent::PhyTestResult(ExcResult::timeout()),
            ExcSlot::ReverseRequest => ExcEvent::ReverseReq0(ExcResult::timeout()),
            ExcSlot::EnableTx => ExcEvent::EnableTx(ExcResult::timeout()),
            ExcSlot::MemSessionOpen => ExcEvent::MemSessionOpen(ExcResult::timeout()),
            ExcSlot::MemSessionClose => ExcEvent::MemSessionClose(ExcResult::timeout()),
            ExcSlot::MemoryRead => ExcEvent::MemoryRead(ExcResult::timeout()),
            ExcSlot::MemoryWrite => ExcEvent::MemoryWrite(ExcResult::timeout()),
        };
        Some((client, event))
    }

    // --- Request senders ---

    fn send(
        &mut self,
        slot: ExcSlot,
        observer: Option<ClientId>,
        msg: PortMessage,
    ) -> Result<(), StackError> {
        if let Some(client) = observer {
            self.ssubs[slot as usize]
                .subscribe(client)
                .map_err(|_| StackError::ApiLocked)?;
        }
        match self.xcvr.push(msg) {
            Ok(()) => Ok(()),
            Err(e) => {
                if observer.is_some() {
                    self.ssubs[slot as usize].unsubscribe();
                }
                Err(e)
            }
        }
    }

    /// Broadcasts or directs `Hello.Get`.
    pub fn hello_get(
        &mut self,
        target: u16,
        version_limit: u8,
        observer: ClientId,
    ) -> Result<(), StackError> {
        let msg = PortMessage::new(target, FBLOCK_EXC, EXC_FID_HELLO, OpType::Get)
            .with_payload(alloc::vec![version_limit]);
        self.send(ExcSlot::Hello, Some(observer), msg)
    }

    /// Sends `Welcome.StartResult` binding a node to its admin address.
    pub fn welcome_sr(
        &mut self,
        target: u16,
        admin_node_address: u16,
        version: u8,
        signature: Signature,
        observer: ClientId,
    ) -> Result<(), StackError> {
        let mut payload = alloc::vec![0u8; 3 + wire::SIGNATURE_LEN];
        payload[0..2].copy_from_slice(&admin_node_address.to_be_bytes());
        payload[2] = version;
        signature.serialize(&mut payload[3..])?;
        let msg = PortMessage::new(target, FBLOCK_EXC, EXC_FID_WELCOME, OpType::StartResult)
            .with_payload(payload);
        self.send(ExcSlot::Welcome, Some(observer), msg)
    }

    pub fn signature_get(
        &mut self,
        target: u16,
        version_limit: u8,
        observer: ClientId,
    ) -> Result<(), StackError> {
        let msg = PortMessage::new(target, FBLOCK_EXC, EXC_FID_SIGNATURE, OpType::Get)
            .with_payload(alloc::vec![version_limit]);
        self.send(ExcSlot::Signature, Some(observer), msg)
    }

    /// Sends `Init.Start`. A broadcast Init has no response, so the
    /// observer is optional.
    pub fn init_start(
        &mut self,
        target: u16,
        observer: Option<ClientId>,
    ) -> Result<(), StackError> {
        let msg = PortMessage::new(target, FBLOCK_EXC, EXC_FID_INIT, OpType::Start);
        self.send(ExcSlot::Init, observer, msg)
    }

    pub fn enable_port_sr(
        &mut self,
        target: u16,
        port_number: u8,
        enabled: bool,
        observer: ClientId,
    ) -> Result<(), StackError> {
        let msg = PortMessage::new(target, FBLOCK_EXC, EXC_FID_ENABLE_PORT, OpType::StartResultAck)
            .with_payload(alloc::vec![port_number, u8::from(enabled)]);
        self.send(ExcSlot::EnablePort, Some(observer), msg)
    }

    pub fn cable_link_diag_start(
        &mut self,
        target: u16,
        port_number: u8,
        observer: ClientId,
    ) -> Result<(), StackError> {
        let msg = PortMessage::new(
            target,
            FBLOCK_EXC,
            EXC_FID_CABLE_LINK_DIAG,
            OpType::StartResultAck,
        )
        .with_payload(alloc::vec![port_number]);
        self.send(ExcSlot::CableLinkDiag, Some(observer), msg)
    }

    pub fn phy_test_start(
        &mut self,
        port_number: u8,
        test_type: u8,
        lead_in: u16,
        duration: u32,
        lead_out: u16,
        observer: ClientId,
    ) -> Result<(), StackError> {
        let mut payload = alloc::vec![0u8; 10];
        payload[0] = port_number;
        payload[1] = test_type;
        payload[2..4].copy_from_slice(&lead_in.to_be_bytes());
        payload[4..8].copy_from_slice(&duration.to_be_bytes());
        payload[8..10].copy_from_slice(&lead_out.to_be_bytes());
        let msg = PortMessage::new(
            ADDR_LOCAL_INIC,
            FBLOCK_EXC,
            EXC_FID_PHY_LAY_TEST,
            OpType::StartResultAck,
        )
        .with_payload(payload);
        self.send(ExcSlot::PhyTest, Some(observer), msg)
    }

    pub fn phy_test_result_get(&mut self, observer: ClientId) -> Result<(), StackError> {
        let msg = PortMessage::new(
            ADDR_LOCAL_INIC,
            FBLOCK_EXC,
            EXC_FID_PHY_LAY_TEST_RESULT,
            OpType::Get,
        );
        self.send(ExcSlot::PhyTestResult, Some(observer), msg)
    }

    /// Sends the HalfDuplex-diagnosis flavor of `ReverseRequest`.
    pub fn reverse_request0_start(
        &mut self,
        header: ReverseReqHeader,
        list: ReverseReq0List,
        observer: ClientId,
    ) -> Result<(), StackError> {
        let mut payload = alloc::vec![0u8; 13];
        payload[0] = ReverseReqId::Hdx as u8;
        Self::put_reverse_header(&mut payload, header);
        payload[8..10].copy_from_slice(&list.t_wait.to_be_bytes());
        payload[10..12].copy_from_slice(&list.admin_node_address.to_be_bytes());
        payload[12] = list.version_limit;
        let msg = PortMessage::new(
            ADDR_LOCAL_INIC,
            FBLOCK_EXC,
            EXC_FID_REVERSE_REQUEST,
            OpType::StartResultAck,
        )
        .with_payload(payload);
        self.send(ExcSlot::ReverseRequest, Some(observer), msg)
    }

    /// Sends the fallback-protection flavor of `ReverseRequest`.
    pub fn reverse_request1_start(
        &mut self,
        header: ReverseReqHeader,
        list: ReverseReq1List,
        observer: ClientId,
    ) -> Result<(), StackError> {
        let mut payload = alloc::vec![0u8; 12];
        payload[0] = ReverseReqId::Fbp as u8;
        Self::put_reverse_header(&mut payload, header);
        payload[8..10].copy_from_slice(&list.t_neg_guard.to_be_bytes());
        payload[10..12].copy_from_slice(&list.t_neg_initiator.to_be_bytes());
        let msg = PortMessage::new(
            ADDR_LOCAL_INIC,
            FBLOCK_EXC,
            EXC_FID_REVERSE_REQUEST,
            OpType::StartResultAck,
        )
        .with_payload(payload);
        self.send(ExcSlot::ReverseRequest, Some(observer), msg)
    }

    fn put_reverse_header(payload: &mut [u8], header: ReverseReqHeader) {
        payload[1] = header.master_position;
        payload[2..4].copy_from_slice(&header.t_switch.to_be_bytes());
        payload[4..6].copy_from_slice(&header.t_send.to_be_bytes());
        payload[6..8].copy_from_slice(&header.t_back.to_be_bytes());
    }

    pub fn enable_tx_start(&mut self, port: u8, observer: ClientId) -> Result<(), StackError> {
        let msg = PortMessage::new(
            ADDR_LOCAL_INIC,
            FBLOCK_EXC,
            EXC_FID_ENABLE_TX,
            OpType::StartResultAck,
        )
        .with_payload(alloc::vec![port]);
        self.send(ExcSlot::EnableTx, Some(observer), msg)
    }

    pub fn mem_session_open_sr(
        &mut self,
        target: u16,
        session_type: SessionType,
        observer: ClientId,
    ) -> Result<(), StackError> {
        let msg = PortMessage::new(
            target,
            FBLOCK_EXC,
            EXC_FID_MEM_SESSION_OPEN,
            OpType::StartResult,
        )
        .with_payload(alloc::vec![session_type as u8]);
        self.send(ExcSlot::MemSessionOpen, Some(observer), msg)
    }

    pub fn mem_session_close_sr(
        &mut self,
        target: u16,
        session_handle: u16,
        observer: ClientId,
    ) -> Result<(), StackError> {
        let msg = PortMessage::new(
            target,
            FBLOCK_EXC,
            EXC_FID_MEM_SESSION_CLOSE,
            OpType::StartResult,
        )
        .with_payload(session_handle.to_be_bytes().to_vec());
        self.send(ExcSlot::MemSessionClose, Some(observer), msg)
    }

    pub fn memory_read_sr(
        &mut self,
        target: u16,
        session_handle: u16,
        mem_id: MemId,
        address: u32,
        unit_len: u8,
        observer: ClientId,
    ) -> Result<(), StackError> {
        let mut payload = alloc::vec![0u8; 8];
        payload[0..2].copy_from_slice(&session_handle.to_be_bytes());
        payload[2] = mem_id as u8;
        payload[3..7].copy_from_slice(&address.to_be_bytes());
        payload[7] = unit_len;
        let msg = PortMessage::new(target, FBLOCK_EXC, EXC_FID_MEMORY_READ, OpType::StartResult)
            .with_payload(payload);
        self.send(ExcSlot::MemoryRead, Some(observer), msg)
    }

    pub fn memory_write_sr(
        &mut self,
        target: u16,
        session_handle: u16,
        mem_id: MemId,
        address: u32,
        unit_size: u8,
        data: &[u8],
        observer: ClientId,
    ) -> Result<(), StackError> {
        if data.is_empty() || data.len() > MAX_MEM_DATA_LEN {
            return Err(StackError::ParamError);
        }
        let mut payload = alloc::vec![0u8; 9 + data.len()];
        payload[0..2].copy_from_slice(&session_handle.to_be_bytes());
        payload[2] = mem_id as u8;
        payload[3..7].copy_from_slice(&address.to_be_bytes());
        payload[7] = unit_size;
        payload[8] = data.len() as u8;
        payload[9..].copy_from_slice(data);
        let msg = PortMessage::new(target, FBLOCK_EXC, EXC_FID_MEMORY_WRITE, OpType::StartResult)
            .with_payload(payload);
        self.send(ExcSlot::MemoryWrite, Some(observer), msg)
    }

    // --- Receive path ---

    /// Filters and dispatches one received RCM message.
    pub fn on_rx(&mut self, msg: &PortMessage) -> RxDispatch {
        if msg.id.fblock != FBLOCK_EXC {
            return RxDispatch::None;
        }
        if msg.id.func_id == EXC_FID_ALIVE_MESSAGE && msg.id.op_type == OpType::Status {
            return match AliveStatus::deserialize(&msg.payload) {
                Ok(status) => RxDispatch::Alive(status, self.alive.notify()),
                Err(e) => {
                    warn!("[EXC] Dropping malformed AliveMessage.Status: {:?}", e);
                    RxDispatch::None
                }
            };
        }
        let is_error = matches!(msg.id.op_type, OpType::Error | OpType::ErrorAck);
        let (slot, event) = match msg.id.func_id {
            EXC_FID_HELLO => (ExcSlot::Hello, self.decode(msg, is_error, ExcEvent::Hello)),
            EXC_FID_WELCOME => (
                ExcSlot::Welcome,
                self.decode(msg, is_error, ExcEvent::Welcome),
            ),
            EXC_FID_SIGNATURE => (
                ExcSlot::Signature,
                self.decode(msg, is_error, ExcEvent::Signature),
            ),
            EXC_FID_INIT => (
                ExcSlot::Init,
                Some(Self::decode_unit(msg, is_error, ExcEvent::Init)),
            ),
            EXC_FID_ENABLE_PORT => (
                ExcSlot::EnablePort,
                Some(Self::decode_unit(msg, is_error, ExcEvent::EnablePort)),
            ),
            EXC_FID_CABLE_LINK_DIAG => (
                ExcSlot::CableLinkDiag,
                self.decode(msg, is_error, ExcEvent::CableLinkDiag),
            ),
            EXC_FID_PHY_LAY_TEST => (
                ExcSlot::PhyTest,
                Some(Self::decode_unit(msg, is_error, ExcEvent::PhyTest)),
            ),
            EXC_FID_PHY_LAY_TEST_RESULT => (
                ExcSlot::PhyTestResult,
                self.decode(msg, is_error, ExcEvent::PhyTestResult),
            ),
            EXC_FID_REVERSE_REQUEST => (ExcSlot::ReverseRequest, self.decode_reverse(msg, is_error)),
            EXC_FID_ENABLE_TX => (
                ExcSlot::EnableTx,
                Some(Self::decode_unit(msg, is_error, ExcEvent::EnableTx)),
            ),
            EXC_FID_MEM_SESSION_OPEN => (
                ExcSlot::MemSessionOpen,
                Some(Self::decode_session_open(msg, is_error)),
            ),
            EXC_FID_MEM_SESSION_CLOSE => (
                ExcSlot::MemSessionClose,
                Some(Self::decode_session_close(msg, is_error)),
            ),
            EXC_FID_MEMORY_READ => (
                ExcSlot::MemoryRead,
                self.decode(msg, is_error, ExcEvent::MemoryRead),
            ),
            EXC_FID_MEMORY_WRITE => (
                ExcSlot::MemoryWrite,
                self.decode(msg, is_error, ExcEvent::MemoryWrite),
            ),
            other => {
                trace!("[EXC] Ignoring unhandled FktID {:#05X}", other);
                return RxDispatch::None;
            }
        };
        let Some(event) = event else {
            return RxDispatch::None;
        };
        match self.ssubs[slot as usize].notify() {
            Some(client) => RxDispatch::Single(client, event),
            None => {
                trace!(
                    "[EXC] No observer registered for FktID {:#05X} ({:?})",
                    msg.id.func_id,
                    msg.id.op_type
                );
                RxDispatch::None
            }
        }
    }

    fn decode<T: Codec>(
        &self,
        msg: &PortMessage,
        is_error: bool,
        wrap: fn(ExcResult<T>) -> ExcEvent,
    ) -> Option<ExcEvent> {
        if is_error {
            return Some(wrap(ExcResult::error(msg.payload.clone())));
        }
        match T::deserialize(&msg.payload) {
            Ok(data) => Some(wrap(ExcResult::success(data))),
            Err(e) => {
                warn!(
                    "[EXC] Dropping malformed response for FktID {:#05X}: {:?}",
                    msg.id.func_id, e
                );
                None
            }
        }
    }

    fn decode_unit(
        msg: &PortMessage,
        is_error: bool,
        wrap: fn(ExcResult<()>) -> ExcEvent,
    ) -> ExcEvent {
        if is_error {
            wrap(ExcResult::error(msg.payload.clone()))
        } else {
            wrap(ExcResult::success(()))
        }
    }

    fn decode_reverse(&self, msg: &PortMessage, is_error: bool) -> Option<ExcEvent> {
        if is_error {
            return Some(ExcEvent::ReverseReq0(ExcResult::error(msg.payload.clone())));
        }
        match msg.payload.first().copied().map(ReverseReqId::try_from) {
            Some(Ok(ReverseReqId::Hdx)) => {
                self.decode(msg, false, ExcEvent::ReverseReq0)
            }
            Some(Ok(ReverseReqId::Fbp)) => {
                self.decode(msg, false, ExcEvent::ReverseReq1)
            }
            _ => {
                warn!("[EXC] Dropping ReverseRequest result with bad request id");
                None
            }
        }
    }

    fn decode_session_open(msg: &PortMessage, is_error: bool) -> ExcEvent {
        if is_error {
            return ExcEvent::MemSessionOpen(ExcResult::error(msg.payload.clone()));
        }
        if msg.payload.len() < 2 {
            return ExcEvent::MemSessionOpen(ExcResult::error(msg.payload.clone()));
        }
        let handle = u16::from_be_bytes([msg.payload[0], msg.payload[1]]);
        ExcEvent::MemSessionOpen(ExcResult::success(handle))
    }

    fn decode_session_close(msg: &PortMessage, is_error: bool) -> ExcEvent {
        if is_error {
            return ExcEvent::MemSessionClose(ExcResult::error(msg.payload.clone()));
        }
        // The session result byte is zero on a clean close; a nonzero value
        // reports a CRC failure over the written data.
        let session_result = msg.payload.first().copied().unwrap_or(0);
        ExcEvent::MemSessionClose(ExcResult::success(session_result))
    }
}

impl Default for Exc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn hello_status_msg() -> PortMessage {
        let status = HelloStatus {
            version: 1,
            signature: Signature {
                node_address: 0x0201,
                num_ports: 1,
                ..Signature::default()
            },
        };
        let mut buffer = [0u8; 64];
        let written = status.serialize(&mut buffer).unwrap();
        PortMessage::new(ADDR_LOCAL_INIC, FBLOCK_EXC, EXC_FID_HELLO, OpType::Status)
            .with_payload(buffer[..written].to_vec())
    }

    #[test]
    fn test_service_lock_is_exclusive() {
        let mut exc = Exc::new();
        exc.reserve_service(ClientId::Discovery).unwrap();
        assert_eq!(
            exc.reserve_service(ClientId::Prog),
            Err(StackError::ApiLocked)
        );
        // Releasing by a non-owner is ignored.
        exc.release_service(ClientId::Prog);
        assert_eq!(exc.service_owner(), Some(ClientId::Discovery));
        exc.release_service(ClientId::Discovery);
        assert!(exc.reserve_service(ClientId::Prog).is_ok());
    }

    #[test]
    fn test_response_reaches_single_observer_once() {
        let mut exc = Exc::new();
        exc.hello_get(0xFFFF, 1, ClientId::Discovery).unwrap();
        assert!(!exc.xcvr.is_empty());
        let msg = hello_status_msg();
        match exc.on_rx(&msg) {
            RxDispatch::Single(ClientId::Discovery, ExcEvent::Hello(res)) => {
                assert!(res.is_success());
                assert_eq!(res.data.unwrap().signature.node_address, 0x0201);
            }
            other => panic!("unexpected dispatch: {:?}", other),
        }
        // The observer was single-shot; a second status is dropped.
        assert!(matches!(exc.on_rx(&msg), RxDispatch::None));
    }

    #[test]
    fn test_timeout_builds_synthetic_result() {
        let mut exc = Exc::new();
        exc.welcome_sr(0x0F01, 0x0F01, 1, Signature::default(), ClientId::DiagFdx)
            .unwrap();
        let (client, event) = exc.timeout(ExcSlot::Welcome).unwrap();
        assert_eq!(client, ClientId::DiagFdx);
        match event {
            ExcEvent::Welcome(res) => assert_eq!(res.code, MsgResult::Timeout),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(exc.timeout(ExcSlot::Welcome).is_none());
    }

    #[test]
    fn test_error_op_type_carries_fs_code() {
        let mut exc = Exc::new();
        exc.mem_session_open_sr(0x0F02, SessionType::Config, ClientId::Prog)
            .unwrap();
        let msg = PortMessage::new(
            ADDR_LOCAL_INIC,
            FBLOCK_EXC,
            EXC_FID_MEM_SESSION_OPEN,
            OpType::Error,
        )
        .with_payload(vec![0x20, 0x01, 0x10]);
        match exc.on_rx(&msg) {
            RxDispatch::Single(ClientId::Prog, ExcEvent::MemSessionOpen(res)) => {
                assert_eq!(res.code, MsgResult::FunctionSpecific);
                assert_eq!(res.fs_error_code(), Some(0x200110));
            }
            other => panic!("unexpected dispatch: {:?}", other),
        }
    }

    #[test]
    fn test_alive_broadcast_reaches_all_observers() {
        let mut exc = Exc::new();
        exc.register_alive_observer(ClientId::Supv);
        exc.register_alive_observer(ClientId::App);
        let alive = AliveStatus {
            alive_version: 1,
            welcomed: false,
            alive_status: 0,
            signature_version: 1,
            signature: Signature::default(),
        };
        let mut buffer = [0u8; 64];
        let written = alive.serialize(&mut buffer).unwrap();
        let msg = PortMessage::new(
            ADDR_LOCAL_INIC,
            FBLOCK_EXC,
            EXC_FID_ALIVE_MESSAGE,
            OpType::Status,
        )
        .with_payload(buffer[..written].to_vec());
        match exc.on_rx(&msg) {
            RxDispatch::Alive(status, observers) => {
                assert_eq!(status, alive);
                assert_eq!(observers.len(), 2);
            }
            other => panic!("unexpected dispatch: {:?}", other),
        }
    }

    #[test]
    fn test_memory_write_rejects_oversized_chunk() {
        let mut exc = Exc::new();
        let data = [0u8; MAX_MEM_DATA_LEN + 1];
        assert_eq!(
            exc.memory_write_sr(0x0F02, 1, MemId::ConfigString, 0, 1, &data, ClientId::Prog),
            Err(StackError::ParamError)
        );
    }
}
