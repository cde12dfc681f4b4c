//! Remote and local node programming.
//!
//! A programming run executes a list of commands against one node: open a
//! memory session, write the payload in chunks of at most 18 bytes, close
//! the session, and finally reset the node. Remote nodes are first bound
//! to an admin address with a Welcome. The INIC reports function-specific
//! errors with dedicated recovery actions (close the stale session, reset
//! the node, or both).

use crate::event::ClientId;
use crate::exc::wire::{MemId, MemWriteStatus, SessionType, WelcomeResult, WELCOME_SUCCESS};
use crate::exc::{Exc, ExcEvent, ExcResult, ExcSlot};
use crate::hal::StackError;
use crate::timer::{TimerId, TimerMgr};
use crate::types::{
    MsgResult, Signature, Ticks, ADDR_ADMIN_BASE, ADDR_LOCAL_INIC, ADDR_LOCAL_NODE_POS,
    MAX_MEM_DATA_LEN, SIGNATURE_VERSION,
};
use alloc::vec::Vec;
use crc::{Crc, CRC_16_KERMIT};
use log::{error, info, warn};

/// Supervision timeout per programming command step.
const PRG_TIMEOUT_COMMAND: u16 = 100;

/// Serialized length of an identification string.
pub const IDENT_STRING_LEN: usize = 14;

/// Format version of the identification string.
const IDENT_STRING_VERSION: u8 = 0x41;

// Function-specific error codes reported during memory sessions.
const PRG_HW_RESET_REQ: u32 = 0x200110;
const PRG_SESSION_ACTIVE: u32 = 0x200111;
const PRG_CFG_STRING_ERROR: u32 = 0x200220;
const PRG_MEM_ERASE_ERROR: u32 = 0x200221;
const PRG_CFG_WRITE_ERROR: u32 = 0x200225;
const PRG_CFG_FULL_ERROR: u32 = 0x200226;
const PRG_HDL_MATCH_ERROR: u32 = 0x200330;
const PRG_MEMID_ERROR: u32 = 0x200331;
const PRG_ADDR_EVEN_ERROR: u32 = 0x200332;
const PRG_LEN_EVEN_ERROR: u32 = 0x200333;
const PRG_SUM_OUT_OF_RANGE: u32 = 0x200334;

/// One memory-programming command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgCommand {
    pub session_type: SessionType,
    pub mem_id: MemId,
    pub address: u32,
    pub unit_size: u8,
    pub data: Vec<u8>,
}

/// Identity data programmed into a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdentString {
    pub node_address: u16,
    pub group_address: u16,
    pub mac_47_32: u16,
    pub mac_31_16: u16,
    pub mac_15_0: u16,
}

/// Builds the 14-byte identification-string payload including its
/// reflected CCITT-16 checksum (little-endian over the leading 12 bytes).
pub fn build_ident_string(ident: &IdentString) -> [u8; IDENT_STRING_LEN] {
    const CCITT16: Crc<u16> = Crc::<u16>::new(&CRC_16_KERMIT);
    let mut data = [0u8; IDENT_STRING_LEN];
    data[0] = IDENT_STRING_VERSION;
    data[1] = 0xFF;
    data[2..4].copy_from_slice(&ident.node_address.to_be_bytes());
    data[4..6].copy_from_slice(&(ident.group_address | 0xFC00).to_be_bytes());
    data[6..8].copy_from_slice(&ident.mac_15_0.to_be_bytes());
    data[8..10].copy_from_slice(&ident.mac_31_16.to_be_bytes());
    data[10..12].copy_from_slice(&ident.mac_47_32.to_be_bytes());
    let crc16 = CCITT16.checksum(&data[..12]);
    data[12..14].copy_from_slice(&crc16.to_le_bytes());
    data
}

/// Builds the single programming command writing an identification
/// string, either into the patch RAM (`test = true`) or into the ROM.
pub fn ident_string_command(ident: &IdentString, test: bool) -> ProgCommand {
    ProgCommand {
        session_type: SessionType::IdentString,
        mem_id: if test {
            MemId::IdentStringTest
        } else {
            MemId::IdentString
        },
        address: 0,
        unit_size: 1,
        data: build_ident_string(ident).to_vec(),
    }
}

/// Final report of a programming run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgReport {
    Success,
    Error {
        code: MsgResult,
        fs_error: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProgState {
    Idle,
    WaitWelcome,
    WaitMemOpen,
    WaitMemWrite,
    WaitMemClose,
    /// Closing a session after an error, before the final reset.
    WaitMemErrClose,
}

pub struct Programming {
    state: ProgState,
    /// Address the node is reached under during the run.
    target_address: u16,
    admin_address: u16,
    signature: Signature,
    commands: Vec<ProgCommand>,
    command_index: usize,
    data_offset: usize,
    current_address: u32,
    session_handle: u16,
    /// Error report deferred until the recovery commands went out.
    pending_report: Option<ProgReport>,
}

impl Programming {
    pub fn new() -> Self {
        Self {
            state: ProgState::Idle,
            target_address: 0,
            admin_address: 0,
            signature: Signature::default(),
            commands: Vec::new(),
            command_index: 0,
            data_offset: 0,
            current_address: 0,
            session_handle: 0,
            pending_report: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state != ProgState::Idle
    }

    /// Starts programming the node at `node_pos_addr`.
    ///
    /// `node_pos_addr` must be a node-position address; `0x0400` selects
    /// the local node, which skips the Welcome step.
    pub fn start(
        &mut self,
        node_pos_addr: u16,
        signature: Signature,
        commands: Vec<ProgCommand>,
        now: Ticks,
        exc: &mut Exc,
        timers: &mut TimerMgr,
    ) -> Result<(), StackError> {
        if !crate::types::is_programmable_position(node_pos_addr) {
            return Err(StackError::ParamError);
        }
        if commands.is_empty() || commands.iter().any(|c| c.data.is_empty()) {
            return Err(StackError::ParamError);
        }
        if self.state != ProgState::Idle {
            return Err(StackError::ApiLocked);
        }
        exc.reserve_service(ClientId::Prog)?;
        info!("[PROG] Starting programming of node {:#06X}", node_pos_addr);
        self.signature = signature;
        self.commands = commands;
        self.command_index = 0;
        self.pending_report = None;
        self.admin_address = ADDR_ADMIN_BASE + (node_pos_addr & 0x00FF);
        if node_pos_addr == ADDR_LOCAL_NODE_POS {
            self.target_address = ADDR_LOCAL_INIC;
            self.open_session(now, exc, timers);
        } else {
            self.target_address = node_pos_addr;
            if let Err(e) = exc.welcome_sr(
                self.target_address,
                self.admin_address,
                SIGNATURE_VERSION,
                self.signature,
                ClientId::Prog,
            ) {
                exc.release_service(ClientId::Prog);
                return Err(e);
            }
            timers.restart(TimerId::Prog, PRG_TIMEOUT_COMMAND, now);
            self.state = ProgState::WaitWelcome;
        }
        Ok(())
    }

    /// Fatal termination (e.g. unsynchronization): reset and report.
    pub fn terminate(&mut self, exc: &mut Exc, timers: &mut TimerMgr) -> Vec<ProgReport> {
        let mut reports = Vec::new();
        if self.state != ProgState::Idle {
            timers.stop(TimerId::Prog);
            exc.cancel(ExcSlot::Welcome);
            exc.cancel(ExcSlot::MemSessionOpen);
            exc.cancel(ExcSlot::MemSessionClose);
            exc.cancel(ExcSlot::MemoryWrite);
            reports.push(ProgReport::Error {
                code: MsgResult::Busy,
                fs_error: None,
            });
            exc.release_service(ClientId::Prog);
            self.state = ProgState::Idle;
        }
        reports
    }

    /// Responses from the EXC facade.
    pub fn on_exc_event(
        &mut self,
        event: &ExcEvent,
        now: Ticks,
        exc: &mut Exc,
        timers: &mut TimerMgr,
    ) -> Vec<ProgReport> {
        let mut reports = Vec::new();
        timers.stop(TimerId::Prog);
        match (self.state, event) {
            (ProgState::WaitWelcome, ExcEvent::Welcome(res)) => {
                self.on_welcome(res, now, exc, timers, &mut reports);
            }
            (ProgState::WaitMemOpen, ExcEvent::MemSessionOpen(res)) => {
                self.on_mem_open(res, now, exc, timers, &mut reports);
            }
            (ProgState::WaitMemWrite, ExcEvent::MemoryWrite(res)) => {
                self.on_mem_write(res, now, exc, timers, &mut reports);
            }
            (ProgState::WaitMemClose, ExcEvent::MemSessionClose(res)) => {
                self.on_mem_close(res, now, exc, timers, &mut reports);
            }
            (ProgState::WaitMemErrClose, ExcEvent::MemSessionClose(_)) => {
                // Recovery close finished (result irrelevant); reset the
                // node and deliver the deferred report.
                let _ = exc.init_start(self.target_address, None);
                self.exit(exc, timers, &mut reports);
            }
            _ => {}
        }
        reports
    }

    /// The command supervision timer expired.
    pub fn on_timer(&mut self, exc: &mut Exc, timers: &mut TimerMgr) -> Vec<ProgReport> {
        let mut reports = Vec::new();
        if self.state == ProgState::Idle {
            return reports;
        }
        warn!("[PROG] Command timeout in state {:?}", self.state);
        exc.cancel(ExcSlot::Welcome);
        exc.cancel(ExcSlot::MemSessionOpen);
        exc.cancel(ExcSlot::MemSessionClose);
        exc.cancel(ExcSlot::MemoryWrite);
        self.pending_report = Some(ProgReport::Error {
            code: MsgResult::Timeout,
            fs_error: None,
        });
        self.exit(exc, timers, &mut reports);
        reports
    }

    fn on_welcome(
        &mut self,
        res: &ExcResult<WelcomeResult>,
        now: Ticks,
        exc: &mut Exc,
        timers: &mut TimerMgr,
        reports: &mut Vec<ProgReport>,
    ) {
        match res.data.as_ref().filter(|_| res.is_success()) {
            Some(welcome) if welcome.res == WELCOME_SUCCESS => {
                // The node now answers under its admin address.
                self.target_address = self.admin_address;
                self.open_session(now, exc, timers);
            }
            _ => {
                error!("[PROG] Welcome failed (code {:?})", res.code);
                self.pending_report = Some(ProgReport::Error {
                    code: res.code,
                    fs_error: None,
                });
                self.exit(exc, timers, reports);
            }
        }
    }

    fn on_mem_open(
        &mut self,
        res: &ExcResult<u16>,
        now: Ticks,
        exc: &mut Exc,
        timers: &mut TimerMgr,
        reports: &mut Vec<ProgReport>,
    ) {
        match res.data.as_ref().filter(|_| res.is_success()) {
            Some(handle) => {
                self.session_handle = *handle;
                self.data_offset = 0;
                self.current_address = self.commands[self.command_index].address;
                self.write_next_chunk(now, exc, timers);
            }
            None => self.recover(res, now, exc, timers, reports),
        }
    }

    fn on_mem_write(
        &mut self,
        res: &ExcResult<MemWriteStatus>,
        now: Ticks,
        exc: &mut Exc,
        timers: &mut TimerMgr,
        reports: &mut Vec<ProgReport>,
    ) {
        if !res.is_success() {
            self.recover(res, now, exc, timers, reports);
            return;
        }
        let command = &self.commands[self.command_index];
        if self.data_offset < command.data.len() {
            self.write_next_chunk(now, exc, timers);
        } else {
            let _ = exc.mem_session_close_sr(
                self.target_address,
                self.session_handle,
                ClientId::Prog,
            );
            timers.restart(TimerId::Prog, PRG_TIMEOUT_COMMAND, now);
            self.state = ProgState::WaitMemClose;
        }
    }

    fn on_mem_close(
        &mut self,
        res: &ExcResult<u8>,
        now: Ticks,
        exc: &mut Exc,
        timers: &mut TimerMgr,
        reports: &mut Vec<ProgReport>,
    ) {
        match res.data.as_ref().filter(|_| res.is_success()) {
            Some(session_result) if *session_result == 0 => {
                self.command_index += 1;
                if self.command_index < self.commands.len() {
                    self.open_session(now, exc, timers);
                } else {
                    info!("[PROG] Programming finished");
                    self.pending_report = Some(ProgReport::Success);
                    // Reset the node so it applies the new memory content.
                    let _ = exc.init_start(self.target_address, None);
                    self.exit(exc, timers, reports);
                }
            }
            Some(session_result) => {
                // Nonzero session result signals a CRC failure over the
                // written data.
                error!("[PROG] Session close reported CRC error {}", session_result);
                self.pending_report = Some(ProgReport::Error {
                    code: MsgResult::FunctionSpecific,
                    fs_error: None,
                });
                let _ = exc.init_start(self.target_address, None);
                self.exit(exc, timers, reports);
            }
            None => self.recover(res, now, exc, timers, reports),
        }
    }

    /// Applies the function-specific recovery table.
    fn recover<T>(
        &mut self,
        res: &ExcResult<T>,
        now: Ticks,
        exc: &mut Exc,
        timers: &mut TimerMgr,
        reports: &mut Vec<ProgReport>,
    ) {
        let fs_error = res.fs_error_code();
        self.pending_report = Some(ProgReport::Error {
            code: res.code,
            fs_error,
        });
        match fs_error {
            Some(PRG_HW_RESET_REQ) | Some(PRG_HDL_MATCH_ERROR) => {
                let _ = exc.init_start(self.target_address, None);
                self.exit(exc, timers, reports);
            }
            Some(PRG_SESSION_ACTIVE) => {
                // The stale session handle rides in the error payload.
                if res.info.len() >= 5 {
                    self.session_handle = u16::from_be_bytes([res.info[3], res.info[4]]);
                }
                self.close_error_session(now, exc, timers);
            }
            Some(PRG_CFG_STRING_ERROR)
            | Some(PRG_MEM_ERASE_ERROR)
            | Some(PRG_CFG_WRITE_ERROR)
            | Some(PRG_CFG_FULL_ERROR)
            | Some(PRG_ADDR_EVEN_ERROR)
            | Some(PRG_LEN_EVEN_ERROR)
            | Some(PRG_SUM_OUT_OF_RANGE)
            | Some(PRG_MEMID_ERROR) => {
                self.close_error_session(now, exc, timers);
            }
            _ => {
                self.exit(exc, timers, reports);
            }
        }
    }

    fn open_session(&mut self, now: Ticks, exc: &mut Exc, timers: &mut TimerMgr) {
        let session_type = self.commands[self.command_index].session_type;
        let _ = exc.mem_session_open_sr(self.target_address, session_type, ClientId::Prog);
        timers.restart(TimerId::Prog, PRG_TIMEOUT_COMMAND, now);
        self.state = ProgState::WaitMemOpen;
    }

    fn write_next_chunk(&mut self, now: Ticks, exc: &mut Exc, timers: &mut TimerMgr) {
        let command = &self.commands[self.command_index];
        let remaining = &command.data[self.data_offset..];
        let len = remaining.len().min(MAX_MEM_DATA_LEN);
        let chunk = &remaining[..len];
        let _ = exc.memory_write_sr(
            self.target_address,
            self.session_handle,
            command.mem_id,
            self.current_address,
            command.unit_size,
            chunk,
            ClientId::Prog,
        );
        self.data_offset += len;
        self.current_address += len as u32;
        timers.restart(TimerId::Prog, PRG_TIMEOUT_COMMAND, now);
        self.state = ProgState::WaitMemWrite;
    }

    fn close_error_session(&mut self, now: Ticks, exc: &mut Exc, timers: &mut TimerMgr) {
        let _ = exc.mem_session_close_sr(self.target_address, self.session_handle, ClientId::Prog);
        timers.restart(TimerId::Prog, PRG_TIMEOUT_COMMAND, now);
        self.state = ProgState::WaitMemErrClose;
    }

    fn exit(&mut self, exc: &mut Exc, timers: &mut TimerMgr, reports: &mut Vec<ProgReport>) {
        timers.stop(TimerId::Prog);
        if let Some(report) = self.pending_report.take() {
            reports.push(report);
        }
        exc.release_service(ClientId::Prog);
        self.state = ProgState::Idle;
    }
}

impl Default for Programming {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exc::RxDispatch;
    use crate::msg::{Codec, PortMessage};
    use crate::types::{
        OpType, EXC_FID_INIT, EXC_FID_MEMORY_WRITE, EXC_FID_MEM_SESSION_CLOSE,
        EXC_FID_MEM_SESSION_OPEN, EXC_FID_WELCOME, FBLOCK_EXC,
    };
    use alloc::vec;

    struct Rig {
        prog: Programming,
        exc: Exc,
        timers: TimerMgr,
        reports: Vec<ProgReport>,
    }

    impl Rig {
        fn new(node_pos_addr: u16, data_len: usize) -> Self {
            let mut rig = Self {
                prog: Programming::new(),
                exc: Exc::new(),
                timers: TimerMgr::new(),
                reports: Vec::new(),
            };
            let command = ProgCommand {
                session_type: SessionType::IdentString,
                mem_id: MemId::IdentString,
                address: 0,
                unit_size: 1,
                data: vec![0xAB; data_len],
            };
            rig.prog
                .start(
                    node_pos_addr,
                    Signature::default(),
                    vec![command],
                    0,
                    &mut rig.exc,
                    &mut rig.timers,
                )
                .unwrap();
            rig
        }

        fn rx(&mut self, msg: PortMessage) {
            if let RxDispatch::Single(ClientId::Prog, event) = self.exc.on_rx(&msg) {
                self.reports.extend(self.prog.on_exc_event(
                    &event,
                    0,
                    &mut self.exc,
                    &mut self.timers,
                ));
            }
        }

        fn welcome_ok(&mut self) {
            let result = WelcomeResult {
                res: WELCOME_SUCCESS,
                version: 1,
                signature: Signature::default(),
            };
            let mut buffer = [0u8; 64];
            let written = result.serialize(&mut buffer).unwrap();
            self.rx(
                PortMessage::new(1, FBLOCK_EXC, EXC_FID_WELCOME, OpType::ResultAck)
                    .with_payload(buffer[..written].to_vec()),
            );
        }

        fn session_open_ok(&mut self, handle: u16) {
            self.rx(
                PortMessage::new(1, FBLOCK_EXC, EXC_FID_MEM_SESSION_OPEN, OpType::Result)
                    .with_payload(handle.to_be_bytes().to_vec()),
            );
        }

        fn write_ok(&mut self) {
            self.rx(
                PortMessage::new(1, FBLOCK_EXC, EXC_FID_MEMORY_WRITE, OpType::Result)
                    .with_payload(vec![0x12, 0x34, 0x02]),
            );
        }

        fn close_ok(&mut self) {
            self.rx(
                PortMessage::new(1, FBLOCK_EXC, EXC_FID_MEM_SESSION_CLOSE, OpType::Result)
                    .with_payload(vec![0]),
            );
        }
    }

    #[test]
    fn test_remote_40_byte_payload_chunks() {
        let mut rig = Rig::new(0x0402, 40);
        // Welcome binds the node to admin address 0x0F02.
        let welcome = rig.exc.xcvr.pop().unwrap();
        assert_eq!(welcome.id.func_id, EXC_FID_WELCOME);
        assert_eq!(welcome.dest_addr, 0x0402);
        assert_eq!(
            u16::from_be_bytes([welcome.payload[0], welcome.payload[1]]),
            0x0F02
        );
        rig.welcome_ok();
        let open = rig.exc.xcvr.pop().unwrap();
        assert_eq!(open.id.func_id, EXC_FID_MEM_SESSION_OPEN);
        assert_eq!(open.dest_addr, 0x0F02);
        rig.session_open_ok(0x1234);

        // Three writes with lengths 18, 18, 4 at addresses 0, 18, 36.
        let mut lens = Vec::new();
        let mut addresses = Vec::new();
        for _ in 0..3 {
            let write = rig.exc.xcvr.pop().unwrap();
            assert_eq!(write.id.func_id, EXC_FID_MEMORY_WRITE);
            addresses.push(u32::from_be_bytes([
                write.payload[3],
                write.payload[4],
                write.payload[5],
                write.payload[6],
            ]));
            lens.push(write.payload[8] as usize);
            rig.write_ok();
        }
        assert_eq!(lens, vec![18, 18, 4]);
        assert_eq!(addresses, vec![0, 18, 36]);

        let close = rig.exc.xcvr.pop().unwrap();
        assert_eq!(close.id.func_id, EXC_FID_MEM_SESSION_CLOSE);
        rig.close_ok();
        // The node is reset and the run reports success.
        let init = rig.exc.xcvr.pop().unwrap();
        assert_eq!(init.id.func_id, EXC_FID_INIT);
        assert_eq!(rig.reports, vec![ProgReport::Success]);
        assert!(!rig.prog.is_running());
        assert_eq!(rig.exc.service_owner(), None);
    }

    #[test]
    fn test_local_node_skips_welcome() {
        let mut rig = Rig::new(ADDR_LOCAL_NODE_POS, 4);
        let first = rig.exc.xcvr.pop().unwrap();
        assert_eq!(first.id.func_id, EXC_FID_MEM_SESSION_OPEN);
        assert_eq!(first.dest_addr, ADDR_LOCAL_INIC);
    }

    #[test]
    fn test_position_range_is_validated() {
        let mut prog = Programming::new();
        let mut exc = Exc::new();
        let mut timers = TimerMgr::new();
        let command = ProgCommand {
            session_type: SessionType::Config,
            mem_id: MemId::ConfigString,
            address: 0,
            unit_size: 1,
            data: vec![1],
        };
        assert_eq!(
            prog.start(
                0x0200,
                Signature::default(),
                vec![command.clone()],
                0,
                &mut exc,
                &mut timers
            ),
            Err(StackError::ParamError)
        );
        assert_eq!(
            prog.start(
                0x0402,
                Signature::default(),
                vec![],
                0,
                &mut exc,
                &mut timers
            ),
            Err(StackError::ParamError)
        );
        // No request went out for rejected parameters.
        assert!(exc.xcvr.is_empty());
    }

    #[test]
    fn test_session_active_error_recovers_stored_handle() {
        let mut rig = Rig::new(0x0402, 4);
        rig.welcome_ok();
        let _open = rig.exc.xcvr.pop().unwrap();
        // SESSION_ACTIVE carries the stale handle in the error payload.
        rig.rx(
            PortMessage::new(1, FBLOCK_EXC, EXC_FID_MEM_SESSION_OPEN, OpType::Error)
                .with_payload(vec![0x20, 0x01, 0x11, 0xAB, 0xCD]),
        );
        // The stale session is closed under its recovered handle.
        let close = rig.exc.xcvr.pop().unwrap();
        assert_eq!(close.id.func_id, EXC_FID_MEM_SESSION_CLOSE);
        assert_eq!(
            u16::from_be_bytes([close.payload[0], close.payload[1]]),
            0xABCD
        );
        rig.close_ok();
        // Then the node is reset and the error is reported.
        let init = rig.exc.xcvr.pop().unwrap();
        assert_eq!(init.id.func_id, EXC_FID_INIT);
        assert!(matches!(
            rig.reports.last(),
            Some(ProgReport::Error {
                fs_error: Some(0x200111),
                ..
            })
        ));
        assert!(!rig.prog.is_running());
    }

    #[test]
    fn test_hw_reset_req_resets_without_close() {
        let mut rig = Rig::new(0x0402, 4);
        rig.welcome_ok();
        let _open = rig.exc.xcvr.pop().unwrap();
        rig.rx(
            PortMessage::new(1, FBLOCK_EXC, EXC_FID_MEM_SESSION_OPEN, OpType::Error)
                .with_payload(vec![0x20, 0x01, 0x10]),
        );
        let init = rig.exc.xcvr.pop().unwrap();
        assert_eq!(init.id.func_id, EXC_FID_INIT);
        assert!(matches!(
            rig.reports.last(),
            Some(ProgReport::Error {
                fs_error: Some(0x200110),
                ..
            })
        ));
    }

    #[test]
    fn test_ident_string_layout_and_crc() {
        let ident = IdentString {
            node_address: 0x0205,
            group_address: 0x0022,
            mac_47_32: 0x0002,
            mac_31_16: 0x4455,
            mac_15_0: 0x6677,
        };
        let data = build_ident_string(&ident);
        assert_eq!(data.len(), IDENT_STRING_LEN);
        assert_eq!(data[0], 0x41);
        assert_eq!(data[1], 0xFF);
        assert_eq!(&data[2..4], &[0x02, 0x05]);
        // Group address high byte is forced into the 0xFC page.
        assert_eq!(data[4] & 0xFC, 0xFC);
        assert_eq!(&data[6..8], &[0x66, 0x77]);
        const CCITT16: Crc<u16> = Crc::<u16>::new(&CRC_16_KERMIT);
        let expected = CCITT16.checksum(&data[..12]);
        assert_eq!(u16::from_le_bytes([data[12], data[13]]), expected);
        // Known vector for this record, reflected CCITT-16 over the
        // leading 12 bytes, stored little-endian.
        assert_eq!(&data[12..14], &[0x4C, 0x43]);
        // Pure function: identical input yields identical output.
        assert_eq!(build_ident_string(&ident), data);
    }

    #[test]
    fn test_ident_string_command_targets_patch_ram() {
        let command = ident_string_command(&IdentString::default(), true);
        assert_eq!(command.mem_id, MemId::IdentStringTest);
        assert_eq!(command.session_type, SessionType::IdentString);
        assert_eq!(command.address, 0);
        assert_eq!(command.unit_size, 1);
        assert_eq!(command.data.len(), IDENT_STRING_LEN);
    }
}
