use core::convert::TryFrom;

// --- Primitive Types ---
// These aliases keep struct definitions aligned with the wire-level field widths.

/// Alias for an 8-bit unsigned wire field
pub type UNSIGNED8 = u8;
/// Alias for a 16-bit unsigned wire field
pub type UNSIGNED16 = u16;
/// Alias for a 32-bit unsigned wire field
pub type UNSIGNED32 = u32;

/// Host tick count in milliseconds. The resolution of the host clock must be
/// at least 1 ms so that the shortest command timeouts (100 ms) are observed.
pub type Ticks = u64;

// --- Protocol Constants (control channel addressing) ---

/// Control address of the local INIC.
pub const ADDR_LOCAL_INIC: u16 = 0x0001;

/// Broadcast address, blocking variant (every node answers).
pub const ADDR_BROADCAST_BLOCKING: u16 = 0xFFFF;

/// First address of the temporary admin range used during discovery.
pub const ADDR_ADMIN_BASE: u16 = 0x0F00;

/// Last address of the temporary admin range.
pub const ADDR_ADMIN_MAX: u16 = 0x0FFF;

/// Node-position address of the local node.
pub const ADDR_LOCAL_NODE_POS: u16 = 0x0400;

/// First node-position address of a remote node.
pub const ADDR_REMOTE_NODE_POS_MIN: u16 = 0x0401;

/// Last node-position address accepted by the programming service.
pub const ADDR_NODE_POS_MAX: u16 = 0x04FF;

/// Default packet bandwidth in bytes per frame.
pub const DEFAULT_PACKET_BW: u16 = 52;

/// Time in ms after which the INIC automatically enters ForcedNotAvailable
/// when the startup command is interrupted.
pub const AUTOFORCED_NA_TIME: u16 = 5000;

/// Control-channel ack timeout in ms while the INIC watchdog is enabled.
pub const FIFO_ACK_TIMEOUT: u16 = 10;

/// Watchdog trigger period in ms while the INIC watchdog is enabled.
pub const WATCHDOG_TRIGGER_TIME: u16 = 600;

// --- FBlock Identifiers ---

/// FBlock ID of the local Network Interface Controller.
pub const FBLOCK_INIC: u8 = 0x01;

/// FBlock ID of the ExtendedNetworkControl block addressable on every node.
pub const FBLOCK_EXC: u8 = 0x0A;

// --- ExtendedNetworkControl Function IDs ---

pub const EXC_FID_HELLO: u16 = 0x200;
pub const EXC_FID_WELCOME: u16 = 0x201;
pub const EXC_FID_SIGNATURE: u16 = 0x202;
pub const EXC_FID_INIT: u16 = 0x203;
pub const EXC_FID_ALIVE_MESSAGE: u16 = 0x204;
pub const EXC_FID_ENABLE_PORT: u16 = 0x210;
pub const EXC_FID_CABLE_LINK_DIAG: u16 = 0x211;
pub const EXC_FID_PHY_LAY_TEST: u16 = 0x220;
pub const EXC_FID_PHY_LAY_TEST_RESULT: u16 = 0x221;
pub const EXC_FID_REVERSE_REQUEST: u16 = 0x222;
pub const EXC_FID_ENABLE_TX: u16 = 0x223;
pub const EXC_FID_MEM_SESSION_OPEN: u16 = 0x300;
pub const EXC_FID_MEM_SESSION_CLOSE: u16 = 0x301;
pub const EXC_FID_MEMORY_READ: u16 = 0x302;
pub const EXC_FID_MEMORY_WRITE: u16 = 0x303;

// --- INIC Function IDs (local FBlock) ---

pub const INIC_FID_NETWORK_STATUS: u16 = 0x520;
pub const INIC_FID_NETWORK_STARTUP: u16 = 0x521;
pub const INIC_FID_NETWORK_STARTUP_EXT: u16 = 0x526;
pub const INIC_FID_NETWORK_SHUTDOWN: u16 = 0x522;
pub const INIC_FID_NETWORK_FORCE_NA: u16 = 0x523;
pub const INIC_FID_NETWORK_FRAME_COUNTER: u16 = 0x524;
pub const INIC_FID_NETWORK_INFO: u16 = 0x525;
pub const INIC_FID_NETWORK_DIAG_FDX: u16 = 0x527;
pub const INIC_FID_NETWORK_DIAG_FDX_END: u16 = 0x528;
pub const INIC_FID_NETWORK_DIAG_HDX: u16 = 0x529;
pub const INIC_FID_NETWORK_DIAG_HDX_END: u16 = 0x52A;
pub const INIC_FID_NETWORK_FALLBACK: u16 = 0x52B;
pub const INIC_FID_NETWORK_FALLBACK_END: u16 = 0x52C;
pub const INIC_FID_NETWORK_INIT: u16 = 0x52D;
pub const INIC_FID_DEVICE_POWER_STATE: u16 = 0x52E;
pub const INIC_FID_RESOURCE_INFO: u16 = 0x52F;

/// Maximum number of data bytes carried by one MemoryRead/MemoryWrite command.
pub const MAX_MEM_DATA_LEN: usize = 18;

/// Signature format version sent with Hello and Welcome messages.
pub const SIGNATURE_VERSION: u8 = 1;

// --- Core Protocol Identifiers ---

/// Operation types of the port-message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpType {
    Set = 0x0,
    Get = 0x1,
    Start = 0x2,
    StartResult = 0x6,
    StartResultAck = 0x7,
    Status = 0xC,
    Result = 0xD,
    ResultAck = 0xE,
    Error = 0xF,
    ErrorAck = 0x9,
    Report = 0xA,
}

impl TryFrom<u8> for OpType {
    type Error = InvalidOpTypeError;
    fn try_from(value: u8) -> Result<Self, InvalidOpTypeError> {
        match value {
            0x0 => Ok(Self::Set),
            0x1 => Ok(Self::Get),
            0x2 => Ok(Self::Start),
            0x6 => Ok(Self::StartResult),
            0x7 => Ok(Self::StartResultAck),
            0xC => Ok(Self::Status),
            0xD => Ok(Self::Result),
            0xE => Ok(Self::ResultAck),
            0xF => Ok(OpType::Error),
            0x9 => Ok(Self::ErrorAck),
            0xA => Ok(Self::Report),
            v => Err(InvalidOpTypeError(v)),
        }
    }
}

/// Error type for an op-type nibble that has no defined meaning.
#[derive(Debug, PartialEq, Eq)]
pub struct InvalidOpTypeError(pub u8);

/// A node identity record as reported by Hello and Signature messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Signature {
    pub node_address: u16,
    pub group_address: u16,
    /// MAC address bits 47..32
    pub mac_47_32: u16,
    /// MAC address bits 31..16
    pub mac_31_16: u16,
    /// MAC address bits 15..0
    pub mac_15_0: u16,
    pub node_pos_addr: u16,
    pub diagnosis_id: u16,
    pub num_ports: u8,
    pub chip_id: u8,
    pub fw_major: u8,
    pub fw_minor: u8,
    pub fw_release: u8,
    pub fw_build: u32,
}

/// Network availability as reported by the INIC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkAvailability {
    #[default]
    NotAvailable,
    Available,
}

/// Additional availability information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkAvailInfo {
    #[default]
    Regular,
    /// Network is down in reverse-direction fallback operation.
    Fallback,
    /// Network is forced down and will not wake on activity.
    ForcedNotAvailable,
    /// Network is down for a running diagnosis.
    Diagnosis,
}

/// Cause of the last availability transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkAvailTransCause {
    #[default]
    Command,
    RingBreak,
    NormalOperation,
    ErrorSystem,
    NoTransition,
}

/// Aggregated network status as published by the local INIC.
///
/// Mutated only by INIC notifications; every component observes it through
/// the status multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkStatus {
    pub availability: NetworkAvailability,
    pub avail_info: NetworkAvailInfo,
    pub avail_trans_cause: NetworkAvailTransCause,
    pub events: u16,
    pub node_address: u16,
    pub node_position: u8,
    pub max_position: u8,
    pub packet_bw: u16,
}

// Change-mask bits used when registering network-status observers.
pub const NWS_M_AVAIL: u32 = 0x01;
pub const NWS_M_AVAIL_INFO: u32 = 0x02;
pub const NWS_M_AVAIL_TRANS_CAUSE: u32 = 0x04;
pub const NWS_M_NODE_ADDRESS: u32 = 0x08;
pub const NWS_M_NODE_POSITION: u32 = 0x10;
pub const NWS_M_MAX_POSITION: u32 = 0x20;
pub const NWS_M_PACKET_BW: u32 = 0x40;
pub const NWS_M_EVENTS: u32 = 0x80;

/// Operation mode of the network supervisor.
///
/// `None` is only valid during initialization, before the configured
/// startup mode is applied. It never reappears later on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupvMode {
    Manual,
    Inactive,
    Normal,
    Fallback,
    Diagnosis,
    Programming,
    None,
}

impl SupvMode {
    /// Bit used in mode permission masks.
    pub fn bit(self) -> u8 {
        match self {
            SupvMode::Manual => 0x01,
            SupvMode::Inactive => 0x02,
            SupvMode::Normal => 0x04,
            SupvMode::Fallback => 0x08,
            SupvMode::Diagnosis => 0x10,
            SupvMode::Programming => 0x20,
            SupvMode::None => 0x00,
        }
    }
}

/// Whether the supervisor has reached the current target mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupvState {
    Busy,
    Ready,
}

/// Power state of the INIC as reported by DeviceStatus notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    FullyOperational,
    ShutdownImminent,
    CriticalTemperature,
    #[default]
    Unknown,
}

/// Result code carried by INIC and EXC result/error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MsgResult {
    #[default]
    Success,
    /// The addressed function rejected one of the parameters.
    ParamError,
    /// The function is locked or temporarily unavailable.
    Busy,
    /// The INIC reported a function-specific error; the raw info bytes
    /// are kept for the components that interpret them.
    FunctionSpecific,
    /// No response arrived within the command timeout.
    Timeout,
}

impl MsgResult {
    pub fn is_success(self) -> bool {
        self == MsgResult::Success
    }
}

/// Checks that an address lies inside the admin range used during discovery.
pub fn is_admin_address(address: u16) -> bool {
    (ADDR_ADMIN_BASE..=ADDR_ADMIN_MAX).contains(&address)
}

/// Checks that an address is a node-position address the programming
/// service may target.
pub fn is_programmable_position(address: u16) -> bool {
    (ADDR_LOCAL_NODE_POS..=ADDR_NODE_POS_MAX).contains(&address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_type_round_trip() {
        for op in [
            OpType::Set,
            OpType::Get,
            OpType::Start,
            OpType::StartResult,
            OpType::StartResultAck,
            OpType::Status,
            OpType::Result,
            OpType::ResultAck,
            OpType::Error,
            OpType::ErrorAck,
            OpType::Report,
        ] {
            assert_eq!(OpType::try_from(op as u8), Ok(op));
        }
        assert!(OpType::try_from(0x5).is_err());
    }

    #[test]
    fn test_address_ranges() {
        assert!(is_admin_address(0x0F00));
        assert!(is_admin_address(0x0FFF));
        assert!(!is_admin_address(0x0E00));
        assert!(is_programmable_position(0x0400));
        assert!(is_programmable_position(0x04FF));
        assert!(!is_programmable_position(0x03FF));
        assert!(!is_programmable_position(0x0500));
    }
}
