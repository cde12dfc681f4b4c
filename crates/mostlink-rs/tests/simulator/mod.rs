// Shared scripted-INIC harness for the integration tests.
//
// The driver records every transmitted control message; the tests play
// the INIC side by feeding crafted responses back into the stack.
#![allow(dead_code)]

use mostlink_rs::atd::AtdReport;
use mostlink_rs::diag::{FdxReport, HdxReport};
use mostlink_rs::exc::wire::{HelloStatus, ReverseReq0Result, WelcomeResult};
use mostlink_rs::fallback::FbpReport;
use mostlink_rs::inic::encode_network_status;
use mostlink_rs::prog::ProgReport;
use mostlink_rs::supv::SupervisorCallbacks;
use mostlink_rs::types::{
    NetworkAvailInfo, NetworkAvailability, NetworkStatus, OpType, FBLOCK_EXC, FBLOCK_INIC,
    INIC_FID_NETWORK_STATUS,
};
use mostlink_rs::{Codec, LowLevelDriver, PortMessage, Signature, StackError, SupvMode, SupvState};
use std::cell::RefCell;
use std::rc::Rc;

/// Records every message the stack hands to the driver.
#[derive(Clone, Default)]
pub struct TxLog {
    messages: Rc<RefCell<Vec<PortMessage>>>,
}

impl TxLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the first recorded message with `func_id`.
    pub fn take(&self, func_id: u16) -> Option<PortMessage> {
        let mut messages = self.messages.borrow_mut();
        let index = messages.iter().position(|m| m.id.func_id == func_id)?;
        Some(messages.remove(index))
    }

    pub fn contains(&self, func_id: u16) -> bool {
        self.messages.borrow().iter().any(|m| m.id.func_id == func_id)
    }

    pub fn clear(&self) {
        self.messages.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.messages.borrow().len()
    }
}

pub struct ScriptedDriver {
    pub tx: TxLog,
}

impl LowLevelDriver for ScriptedDriver {
    fn start(&mut self) -> Result<(), StackError> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn reset(&mut self) {}

    fn tx_transmit(&mut self, raw: &[u8]) -> Result<(), StackError> {
        let msg = PortMessage::deserialize(raw)?;
        self.tx.messages.borrow_mut().push(msg);
        Ok(())
    }
}

/// Records every application-facing callback.
#[derive(Clone, Default)]
pub struct Recorder {
    pub mode_reports: Rc<RefCell<Vec<(SupvMode, SupvState)>>>,
    pub fdx_reports: Rc<RefCell<Vec<FdxReport>>>,
    pub hdx_reports: Rc<RefCell<Vec<HdxReport>>>,
    pub prog_results: Rc<RefCell<Vec<ProgReport>>>,
    pub prog_signatures: Rc<RefCell<Vec<Signature>>>,
    pub prog_events: Rc<RefCell<Vec<mostlink_rs::ProgEventCode>>>,
    pub fallback_reports: Rc<RefCell<Vec<FbpReport>>>,
    pub atd_reports: Rc<RefCell<Vec<AtdReport>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SupervisorCallbacks for Recorder {
    fn report_mode(&mut self, mode: SupvMode, state: SupvState) {
        self.mode_reports.borrow_mut().push((mode, state));
    }

    fn prog_event(&mut self, code: mostlink_rs::ProgEventCode) {
        self.prog_events.borrow_mut().push(code);
    }

    fn prog_signature(&mut self, signature: &Signature) {
        self.prog_signatures.borrow_mut().push(*signature);
    }

    fn diag_fdx(&mut self, report: &FdxReport) {
        self.fdx_reports.borrow_mut().push(*report);
    }

    fn diag_hdx(&mut self, report: &HdxReport) {
        self.hdx_reports.borrow_mut().push(*report);
    }

    fn prog_result(&mut self, report: &ProgReport) {
        self.prog_results.borrow_mut().push(*report);
    }

    fn fallback_report(&mut self, report: &FbpReport) {
        self.fallback_reports.borrow_mut().push(*report);
    }

    fn atd_result(&mut self, report: &AtdReport) {
        self.atd_reports.borrow_mut().push(*report);
    }
}

/// Serializes a message the way the driver would deliver it.
pub fn raw(msg: &PortMessage) -> Vec<u8> {
    let mut buffer = [0u8; 64];
    let len = msg.serialize(&mut buffer).unwrap();
    buffer[..len].to_vec()
}

pub fn network_status_msg(status: &NetworkStatus) -> Vec<u8> {
    raw(
        &PortMessage::new(0x0001, FBLOCK_INIC, INIC_FID_NETWORK_STATUS, OpType::Status)
            .with_payload(encode_network_status(status)),
    )
}

pub fn not_available_regular() -> NetworkStatus {
    NetworkStatus::default()
}

pub fn available_regular(packet_bw: u16, node_position: u8, max_position: u8) -> NetworkStatus {
    NetworkStatus {
        availability: NetworkAvailability::Available,
        avail_info: NetworkAvailInfo::Regular,
        packet_bw,
        node_position,
        max_position,
        ..NetworkStatus::default()
    }
}

pub fn inic_result(func_id: u16) -> Vec<u8> {
    raw(&PortMessage::new(
        0x0001,
        FBLOCK_INIC,
        func_id,
        OpType::Result,
    ))
}

pub fn exc_result_ack(func_id: u16, payload: Vec<u8>) -> Vec<u8> {
    raw(&PortMessage::new(0x0001, FBLOCK_EXC, func_id, OpType::ResultAck).with_payload(payload))
}

pub fn exc_result(func_id: u16, payload: Vec<u8>) -> Vec<u8> {
    raw(&PortMessage::new(0x0001, FBLOCK_EXC, func_id, OpType::Result).with_payload(payload))
}

pub fn hello_status(signature: Signature) -> Vec<u8> {
    let status = HelloStatus {
        version: 1,
        signature,
    };
    let mut buffer = [0u8; 64];
    let len = status.serialize(&mut buffer).unwrap();
    raw(
        &PortMessage::new(
            0x0001,
            FBLOCK_EXC,
            mostlink_rs::types::EXC_FID_HELLO,
            OpType::Status,
        )
        .with_payload(buffer[..len].to_vec()),
    )
}

pub fn welcome_result(signature: Signature, res: u8) -> Vec<u8> {
    let result = WelcomeResult {
        res,
        version: 1,
        signature,
    };
    let mut buffer = [0u8; 64];
    let len = result.serialize(&mut buffer).unwrap();
    raw(
        &PortMessage::new(
            0x0001,
            FBLOCK_EXC,
            mostlink_rs::types::EXC_FID_WELCOME,
            OpType::ResultAck,
        )
        .with_payload(buffer[..len].to_vec()),
    )
}

pub fn reverse_req0_result(result: ReverseReq0Result) -> Vec<u8> {
    let mut buffer = [0u8; 64];
    let len = result.serialize(&mut buffer).unwrap();
    raw(
        &PortMessage::new(
            0x0001,
            FBLOCK_EXC,
            mostlink_rs::types::EXC_FID_REVERSE_REQUEST,
            OpType::ResultAck,
        )
        .with_payload(buffer[..len].to_vec()),
    )
}

pub fn node_signature(node_address: u16, node_pos_addr: u16, num_ports: u8) -> Signature {
    Signature {
        node_address,
        node_pos_addr,
        num_ports,
        ..Signature::default()
    }
}

/// Initializes the test logger once, matching the level used in CI runs.
pub fn init_logging() {
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Trace)
        .format_timestamp_micros()
        .is_test(true)
        .try_init();
}
