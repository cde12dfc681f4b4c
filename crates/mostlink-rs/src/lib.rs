#![cfg_attr(not(feature = "std"), no_std)]

// 'alloc' is used for dynamic allocation (e.g., Vec<u8> in payloads)
extern crate alloc;

// --- Foundation Modules ---
pub mod types;
pub mod hal;
pub mod event;
pub mod timer;
pub mod scheduler;
pub mod jobs;

// --- Control Transport ---
pub mod msg;
pub mod exc;
pub mod inic;

// --- Supervisor Components ---
pub mod starter;
pub mod discovery;
pub mod diag;
pub mod fallback;
pub mod prog;
pub mod atd;
pub mod routing;
pub mod supv;

// --- Instance ---
pub mod instance;

// --- Top-level Exports ---
pub use hal::{HostCallbacks, LowLevelDriver, StackError};
pub use instance::{DiagType, InitData, InstanceHandle, InstancePool, Stack, MAX_INSTANCES};
pub use msg::{Codec, PortMessage};
pub use routing::{Route, RouteManager};
pub use supv::{NodeRecord, ProgEventCode, SupervisorCallbacks};
pub use types::{NetworkStatus, Signature, SupvMode, SupvState};
