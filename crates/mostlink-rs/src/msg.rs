//! Control-channel message model.
//!
//! A [`PortMessage`] is one fully assembled message on the port-message
//! channel between the host and the INIC. The byte-level FIFO framing,
//! acknowledgement and credit handling live in the low-level driver; this
//! module only defines the message header layout and the [`Codec`] trait
//! used to move messages across the driver boundary.

use crate::hal::StackError;
use crate::types::OpType;
use alloc::vec::Vec;
use core::convert::TryFrom;

/// A trait for objects that can be serialized into and deserialized from a
/// byte buffer.
pub trait Codec: Sized {
    /// Serializes the object into the provided buffer.
    ///
    /// Returns the number of bytes written.
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, StackError>;

    /// Deserializes an object from the provided buffer.
    fn deserialize(buffer: &[u8]) -> Result<Self, StackError>;
}

/// Addressing and routing key of a control message.
///
/// The receive path dispatches on `{fblock, func_id, op_type}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgId {
    pub fblock: u8,
    pub inst_id: u8,
    pub func_id: u16,
    pub op_type: OpType,
}

/// One assembled control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMessage {
    pub dest_addr: u16,
    pub src_addr: u16,
    pub id: MsgId,
    pub payload: Vec<u8>,
}

/// Header bytes ahead of the payload: destination, source, FBlock,
/// instance, FktID/OpType word and payload length.
const HEADER_SIZE: usize = 10;

impl PortMessage {
    pub fn new(dest_addr: u16, fblock: u8, func_id: u16, op_type: OpType) -> Self {
        Self {
            dest_addr,
            src_addr: 0,
            id: MsgId {
                fblock,
                inst_id: 0,
                func_id,
                op_type,
            },
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

impl Codec for PortMessage {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, StackError> {
        let total = HEADER_SIZE + self.payload.len();
        if buffer.len() < total {
            return Err(StackError::BufferOverflow);
        }
        buffer[0..2].copy_from_slice(&self.dest_addr.to_be_bytes());
        buffer[2..4].copy_from_slice(&self.src_addr.to_be_bytes());
        buffer[4] = self.id.fblock;
        buffer[5] = self.id.inst_id;
        // FktID is 12 bits; the low nibble of the word carries the op-type.
        let fkt_op = (self.id.func_id << 4) | u16::from(self.id.op_type as u8);
        buffer[6..8].copy_from_slice(&fkt_op.to_be_bytes());
        let len = u16::try_from(self.payload.len()).map_err(|_| StackError::ParamError)?;
        buffer[8..10].copy_from_slice(&len.to_be_bytes());
        buffer[10..total].copy_from_slice(&self.payload);
        Ok(total)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, StackError> {
        if buffer.len() < HEADER_SIZE {
            return Err(StackError::InvalidMessage);
        }
        let dest_addr = u16::from_be_bytes(buffer[0..2].try_into().map_err(|_| StackError::InvalidMessage)?);
        let src_addr = u16::from_be_bytes(buffer[2..4].try_into().map_err(|_| StackError::InvalidMessage)?);
        let fblock = buffer[4];
        let inst_id = buffer[5];
        let fkt_op = u16::from_be_bytes(buffer[6..8].try_into().map_err(|_| StackError::InvalidMessage)?);
        let func_id = fkt_op >> 4;
        let op_type = OpType::try_from((fkt_op & 0xF) as u8)?;
        let len = u16::from_be_bytes(buffer[8..10].try_into().map_err(|_| StackError::InvalidMessage)?) as usize;
        if buffer.len() < HEADER_SIZE + len {
            return Err(StackError::PayloadTooShort);
        }
        Ok(Self {
            dest_addr,
            src_addr,
            id: MsgId {
                fblock,
                inst_id,
                func_id,
                op_type,
            },
            payload: buffer[HEADER_SIZE..HEADER_SIZE + len].to_vec(),
        })
    }
}

/// Outgoing message queue of one control FIFO (ICM or RCM).
///
/// The queue is bounded; a full queue surfaces as `BufferOverflow` to the
/// caller, which keeps its state machine in place and retries later.
#[derive(Debug, Default)]
pub struct Transceiver {
    queue: Vec<PortMessage>,
}

/// Maximum number of unsent messages held per FIFO.
const TX_QUEUE_CAP: usize = 16;

impl Transceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: PortMessage) -> Result<(), StackError> {
        if self.queue.len() >= TX_QUEUE_CAP {
            return Err(StackError::BufferOverflow);
        }
        self.queue.push(msg);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<PortMessage> {
        if self.queue.is_empty() {
            None
        } else {
            Some(self.queue.remove(0))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EXC_FID_HELLO, FBLOCK_EXC};
    use alloc::vec;

    #[test]
    fn test_message_round_trip() {
        let original = PortMessage::new(0xFFFF, FBLOCK_EXC, EXC_FID_HELLO, OpType::Get)
            .with_payload(vec![0x01]);
        let mut buffer = [0u8; 64];
        let written = original.serialize(&mut buffer).unwrap();
        assert_eq!(written, 11);
        let decoded = PortMessage::deserialize(&buffer[..written]).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert_eq!(
            PortMessage::deserialize(&[0u8; 6]),
            Err(StackError::InvalidMessage)
        );
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let msg = PortMessage::new(0x0001, FBLOCK_EXC, EXC_FID_HELLO, OpType::Status)
            .with_payload(vec![1, 2, 3, 4]);
        let mut buffer = [0u8; 64];
        let written = msg.serialize(&mut buffer).unwrap();
        assert_eq!(
            PortMessage::deserialize(&buffer[..written - 1]),
            Err(StackError::PayloadTooShort)
        );
    }

    #[test]
    fn test_transceiver_is_fifo_and_bounded() {
        let mut xcvr = Transceiver::new();
        for i in 0..16u16 {
            let msg = PortMessage::new(i, FBLOCK_EXC, EXC_FID_HELLO, OpType::Get);
            xcvr.push(msg).unwrap();
        }
        let overflow = PortMessage::new(0xFFFF, FBLOCK_EXC, EXC_FID_HELLO, OpType::Get);
        assert_eq!(xcvr.push(overflow), Err(StackError::BufferOverflow));
        assert_eq!(xcvr.pop().unwrap().dest_addr, 0);
        assert_eq!(xcvr.pop().unwrap().dest_addr, 1);
    }
}
