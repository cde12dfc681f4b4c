//! Payload layouts of the ExtendedNetworkControl messages.
//!
//! All multi-byte fields are big-endian on the wire. Request payloads are
//! built by the facade; response payloads are decoded on the receive path
//! and handed to the waiting component as typed values.

use crate::hal::StackError;
use crate::msg::Codec;
use crate::types::{Signature, MAX_MEM_DATA_LEN};
use alloc::vec::Vec;
use core::convert::TryFrom;

/// Serialized size of a [`Signature`] record.
pub const SIGNATURE_LEN: usize = 23;

/// Welcome.Result value reporting success.
pub const WELCOME_SUCCESS: u8 = 0;

fn put_u16(buffer: &mut [u8], offset: usize, value: u16) {
    buffer[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

fn get_u16(buffer: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buffer[offset], buffer[offset + 1]])
}

impl Codec for Signature {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, StackError> {
        if buffer.len() < SIGNATURE_LEN {
            return Err(StackError::BufferOverflow);
        }
        put_u16(buffer, 0, self.node_address);
        put_u16(buffer, 2, self.group_address);
        put_u16(buffer, 4, self.mac_47_32);
        put_u16(buffer, 6, self.mac_31_16);
        put_u16(buffer, 8, self.mac_15_0);
        put_u16(buffer, 10, self.node_pos_addr);
        put_u16(buffer, 12, self.diagnosis_id);
        buffer[14] = self.num_ports;
        buffer[15] = self.chip_id;
        buffer[16] = self.fw_major;
        buffer[17] = self.fw_minor;
        buffer[18] = self.fw_release;
        buffer[19..23].copy_from_slice(&self.fw_build.to_be_bytes());
        Ok(SIGNATURE_LEN)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, StackError> {
        if buffer.len() < SIGNATURE_LEN {
            return Err(StackError::PayloadTooShort);
        }
        Ok(Self {
            node_address: get_u16(buffer, 0),
            group_address: get_u16(buffer, 2),
            mac_47_32: get_u16(buffer, 4),
            mac_31_16: get_u16(buffer, 6),
            mac_15_0: get_u16(buffer, 8),
            node_pos_addr: get_u16(buffer, 10),
            diagnosis_id: get_u16(buffer, 12),
            num_ports: buffer[14],
            chip_id: buffer[15],
            fw_major: buffer[16],
            fw_minor: buffer[17],
            fw_release: buffer[18],
            fw_build: u32::from_be_bytes(
                buffer[19..23]
                    .try_into()
                    .map_err(|_| StackError::PayloadTooShort)?,
            ),
        })
    }
}

/// Hello.Status — a node introduces itself after a Hello.Get broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloStatus {
    pub version: u8,
    pub signature: Signature,
}

impl Codec for HelloStatus {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, StackError> {
        if buffer.len() < 1 + SIGNATURE_LEN {
            return Err(StackError::BufferOverflow);
        }
        buffer[0] = self.version;
        self.signature.serialize(&mut buffer[1..])?;
        Ok(1 + SIGNATURE_LEN)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, StackError> {
        if buffer.is_empty() {
            return Err(StackError::PayloadTooShort);
        }
        Ok(Self {
            version: buffer[0],
            signature: Signature::deserialize(&buffer[1..])?,
        })
    }
}

/// Welcome.Result — the outcome of binding a node to an admin address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WelcomeResult {
    /// `WELCOME_SUCCESS` or a node-specific failure value.
    pub res: u8,
    pub version: u8,
    pub signature: Signature,
}

impl Codec for WelcomeResult {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, StackError> {
        if buffer.len() < 2 + SIGNATURE_LEN {
            return Err(StackError::BufferOverflow);
        }
        buffer[0] = self.res;
        buffer[1] = self.version;
        self.signature.serialize(&mut buffer[2..])?;
        Ok(2 + SIGNATURE_LEN)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, StackError> {
        if buffer.len() < 2 {
            return Err(StackError::PayloadTooShort);
        }
        Ok(Self {
            res: buffer[0],
            version: buffer[1],
            signature: Signature::deserialize(&buffer[2..])?,
        })
    }
}

/// Signature.Status — reply to a directed Signature.Get.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureStatus {
    pub version: u8,
    pub signature: Signature,
}

impl Codec for SignatureStatus {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, StackError> {
        if buffer.len() < 1 + SIGNATURE_LEN {
            return Err(StackError::BufferOverflow);
        }
        buffer[0] = self.version;
        self.signature.serialize(&mut buffer[1..])?;
        Ok(1 + SIGNATURE_LEN)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, StackError> {
        if buffer.is_empty() {
            return Err(StackError::PayloadTooShort);
        }
        Ok(Self {
            version: buffer[0],
            signature: Signature::deserialize(&buffer[1..])?,
        })
    }
}

/// CableLinkDiagnosis.ResultAck payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CableLinkDiagResult {
    pub port_number: u8,
    pub result: u8,
}

impl Codec for CableLinkDiagResult {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, StackError> {
        if buffer.len() < 2 {
            return Err(StackError::BufferOverflow);
        }
        buffer[0] = self.port_number;
        buffer[1] = self.result;
        Ok(2)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, StackError> {
        if buffer.len() < 2 {
            return Err(StackError::PayloadTooShort);
        }
        Ok(Self {
            port_number: buffer[0],
            result: buffer[1],
        })
    }
}

/// Request identifier values of the ReverseRequest command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReverseReqId {
    /// HalfDuplex diagnosis request list.
    Hdx = 0,
    /// Fallback protection request list.
    Fbp = 1,
}

impl TryFrom<u8> for ReverseReqId {
    type Error = StackError;
    fn try_from(value: u8) -> Result<Self, StackError> {
        match value {
            0 => Ok(Self::Hdx),
            1 => Ok(Self::Fbp),
            _ => Err(StackError::InvalidEnumValue),
        }
    }
}

/// Tester result values of the HalfDuplex diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HdxTesterResult {
    SlaveOk = 0x00,
    SlaveWrongPosition = 0x01,
    MasterNoRxSignal = 0x10,
    MasterRxLock = 0x11,
    NoResult = 0xFF,
}

impl TryFrom<u8> for HdxTesterResult {
    type Error = StackError;
    fn try_from(value: u8) -> Result<Self, StackError> {
        match value {
            0x00 => Ok(Self::SlaveOk),
            0x01 => Ok(Self::SlaveWrongPosition),
            0x10 => Ok(Self::MasterNoRxSignal),
            0x11 => Ok(Self::MasterRxLock),
            0xFF => Ok(Self::NoResult),
            _ => Err(StackError::InvalidEnumValue),
        }
    }
}

/// Common leading fields of both ReverseRequest variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverseReqHeader {
    pub master_position: u8,
    pub t_switch: u16,
    pub t_send: u16,
    pub t_back: u16,
}

/// ReverseRequest request list for the HalfDuplex diagnosis (`req_id = 0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverseReq0List {
    pub t_wait: u16,
    pub admin_node_address: u16,
    pub version_limit: u8,
}

/// ReverseRequest request list for fallback protection (`req_id = 1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverseReq1List {
    pub t_neg_guard: u16,
    pub t_neg_initiator: u16,
}

/// ReverseRequest.ResultAck for the HalfDuplex diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverseReq0Result {
    pub tester_result: HdxTesterResult,
    pub cable_diag_result: u8,
    pub version: u8,
    pub signature: Signature,
}

impl Codec for ReverseReq0Result {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, StackError> {
        if buffer.len() < 4 + SIGNATURE_LEN {
            return Err(StackError::BufferOverflow);
        }
        buffer[0] = ReverseReqId::Hdx as u8;
        buffer[1] = self.tester_result as u8;
        buffer[2] = self.cable_diag_result;
        buffer[3] = self.version;
        self.signature.serialize(&mut buffer[4..])?;
        Ok(4 + SIGNATURE_LEN)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, StackError> {
        if buffer.len() < 4 {
            return Err(StackError::PayloadTooShort);
        }
        if ReverseReqId::try_from(buffer[0])? != ReverseReqId::Hdx {
            return Err(StackError::InvalidMessage);
        }
        // A slave that never answered carries no signature bytes.
        let tester_result = HdxTesterResult::try_from(buffer[1])?;
        let signature = if buffer.len() >= 4 + SIGNATURE_LEN {
            Signature::deserialize(&buffer[4..])?
        } else {
            Signature::default()
        };
        Ok(Self {
            tester_result,
            cable_diag_result: buffer[2],
            version: buffer[3],
            signature,
        })
    }
}

/// ReverseRequest.ResultAck for fallback protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverseReq1Result {
    /// 0 = success, 1 = no success.
    pub result: u8,
}

impl Codec for ReverseReq1Result {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, StackError> {
        if buffer.len() < 2 {
            return Err(StackError::BufferOverflow);
        }
        buffer[0] = ReverseReqId::Fbp as u8;
        buffer[1] = self.result;
        Ok(2)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, StackError> {
        if buffer.len() < 2 {
            return Err(StackError::PayloadTooShort);
        }
        if ReverseReqId::try_from(buffer[0])? != ReverseReqId::Fbp {
            return Err(StackError::InvalidMessage);
        }
        Ok(Self { result: buffer[1] })
    }
}

/// Memory session type selecting what a session may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionType {
    /// Configuration memory session.
    Config = 0x01,
    /// Identification-string session (RAM and ROM targets).
    IdentString = 0x02,
}

/// Memory resource addressed by MemoryRead/MemoryWrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MemId {
    /// Configuration string in flash.
    ConfigString = 0x00,
    /// Identification string in ROM.
    IdentString = 0x02,
    /// Identification string in the test/patch RAM.
    IdentStringTest = 0x03,
}

/// MemoryWrite.Result payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemWriteStatus {
    pub session_handle: u16,
    pub mem_id: u8,
}

impl Codec for MemWriteStatus {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, StackError> {
        if buffer.len() < 3 {
            return Err(StackError::BufferOverflow);
        }
        put_u16(buffer, 0, self.session_handle);
        buffer[2] = self.mem_id;
        Ok(3)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, StackError> {
        if buffer.len() < 3 {
            return Err(StackError::PayloadTooShort);
        }
        Ok(Self {
            session_handle: get_u16(buffer, 0),
            mem_id: buffer[2],
        })
    }
}

/// MemoryRead.Result payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemReadStatus {
    pub session_handle: u16,
    pub mem_id: u8,
    pub address: u32,
    pub unit_data: Vec<u8>,
}

impl Codec for MemReadStatus {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, StackError> {
        let total = 8 + self.unit_data.len();
        if buffer.len() < total || self.unit_data.len() > MAX_MEM_DATA_LEN {
            return Err(StackError::BufferOverflow);
        }
        put_u16(buffer, 0, self.session_handle);
        buffer[2] = self.mem_id;
        buffer[3..7].copy_from_slice(&self.address.to_be_bytes());
        buffer[7] = self.unit_data.len() as u8;
        buffer[8..total].copy_from_slice(&self.unit_data);
        Ok(total)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, StackError> {
        if buffer.len() < 8 {
            return Err(StackError::PayloadTooShort);
        }
        let len = buffer[7] as usize;
        if buffer.len() < 8 + len {
            return Err(StackError::PayloadTooShort);
        }
        Ok(Self {
            session_handle: get_u16(buffer, 0),
            mem_id: buffer[2],
            address: u32::from_be_bytes(
                buffer[3..7]
                    .try_into()
                    .map_err(|_| StackError::PayloadTooShort)?,
            ),
            unit_data: buffer[8..8 + len].to_vec(),
        })
    }
}

/// Physical-layer test result status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhyTestResult {
    pub port_number: u8,
    pub lock_status: bool,
    pub err_count: u16,
}

impl Codec for PhyTestResult {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, StackError> {
        if buffer.len() < 4 {
            return Err(StackError::BufferOverflow);
        }
        buffer[0] = self.port_number;
        buffer[1] = u8::from(self.lock_status);
        put_u16(buffer, 2, self.err_count);
        Ok(4)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, StackError> {
        if buffer.len() < 4 {
            return Err(StackError::PayloadTooShort);
        }
        Ok(Self {
            port_number: buffer[0],
            lock_status: buffer[1] != 0,
            err_count: get_u16(buffer, 2),
        })
    }
}

/// AliveMessage.Status broadcast by nodes in diagnosis-capable states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AliveStatus {
    pub alive_version: u8,
    pub welcomed: bool,
    pub alive_status: u16,
    pub signature_version: u8,
    pub signature: Signature,
}

impl Codec for AliveStatus {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, StackError> {
        if buffer.len() < 5 + SIGNATURE_LEN {
            return Err(StackError::BufferOverflow);
        }
        buffer[0] = self.alive_version;
        buffer[1] = u8::from(self.welcomed);
        put_u16(buffer, 2, self.alive_status);
        buffer[4] = self.signature_version;
        self.signature.serialize(&mut buffer[5..])?;
        Ok(5 + SIGNATURE_LEN)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, StackError> {
        if buffer.len() < 5 {
            return Err(StackError::PayloadTooShort);
        }
        Ok(Self {
            alive_version: buffer[0],
            welcomed: buffer[1] != 0,
            alive_status: get_u16(buffer, 2),
            signature_version: buffer[4],
            signature: Signature::deserialize(&buffer[5..])?,
        })
    }
}
