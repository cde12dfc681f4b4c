use crate::types::InvalidOpTypeError;
use core::fmt;

/// Defines a portable, descriptive Error type for the supervisor stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    /// A null/empty parameter or a value outside its allowed range.
    ParamError,
    /// No transmit slot is available on the control channel.
    BufferOverflow,
    /// The EXC sub-service is already in use by another procedure.
    ApiLocked,
    /// The stack has not completed the attach handshake yet.
    NotInitialized,
    /// The operation is not available in the current network state.
    NotAvailable,
    /// The current supervisor mode does not permit the called API.
    NotSupported,
    /// The requested mode is already the current mode.
    AlreadySet,
    /// A received message is fundamentally invalid (e.g., bad op-type nibble).
    InvalidMessage,
    /// A received payload is too short for its message type.
    PayloadTooShort,
    /// A value in a message is not a valid enum variant.
    InvalidEnumValue,
    /// A timer that is already armed was armed again.
    TimerActive,
    /// An underlying driver error occurred.
    DriverError,
    /// Internal logic error.
    InternalError(&'static str),
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParamError => write!(f, "Invalid parameter"),
            Self::BufferOverflow => write!(f, "No Tx slot available"),
            Self::ApiLocked => write!(f, "EXC sub-service already in use"),
            Self::NotInitialized => write!(f, "Stack not initialized"),
            Self::NotAvailable => write!(f, "Operation not available in current network state"),
            Self::NotSupported => write!(f, "API not permitted in current supervisor mode"),
            Self::AlreadySet => write!(f, "Mode is already set"),
            Self::InvalidMessage => write!(f, "Invalid control message"),
            Self::PayloadTooShort => write!(f, "Message payload too short"),
            Self::InvalidEnumValue => write!(f, "Invalid enum value in message"),
            Self::TimerActive => write!(f, "Timer is already armed"),
            Self::DriverError => write!(f, "Low-level driver error"),
            Self::InternalError(s) => write!(f, "Internal error: {}", s),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StackError {}

impl From<InvalidOpTypeError> for StackError {
    fn from(_: InvalidOpTypeError) -> Self {
        StackError::InvalidEnumValue
    }
}

impl From<&'static str> for StackError {
    fn from(s: &'static str) -> Self {
        StackError::InternalError(s)
    }
}

/// Low-level driver interface to the port-message channel.
///
/// This trait abstracts the framed FIFO link towards the INIC, enabling the
/// supervisor core to remain platform-agnostic (no_std). The byte-level
/// framing, ack and credit handling live below this boundary; the core hands
/// over fully assembled control messages.
pub trait LowLevelDriver {
    /// Starts the driver and (re)synchronizes the FIFOs.
    fn start(&mut self) -> Result<(), StackError>;

    /// Stops the driver; no further transmissions are accepted.
    fn stop(&mut self);

    /// Resets the link after an unsynchronization.
    fn reset(&mut self);

    /// Transmits one assembled control message.
    ///
    /// Returns `StackError::BufferOverflow` when no Tx slot is available;
    /// the caller keeps the message queued and retries on the next service.
    fn tx_transmit(&mut self, raw: &[u8]) -> Result<(), StackError>;
}

/// Host service callbacks.
///
/// `request_service` asks the application to call `Stack::service()` from
/// its main loop; `set_application_timer` programs the next wakeup. The two
/// must either both be provided or both be absent (pure polling operation).
pub trait HostCallbacks {
    fn request_service(&mut self);
    fn set_application_timer(&mut self, delay_ms: u16);
}
