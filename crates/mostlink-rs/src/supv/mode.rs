//! Mode gate: the per-API permission table and the legality of mode
//! transitions.

use crate::hal::StackError;
use crate::types::{SupvMode, SupvState};

/// Gated API groups, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ApiIndex {
    /// Read-only APIs permitted everywhere.
    All = 0,
    /// APIs reserved for manual operation (Rm_Start, Nd_Start/Stop,
    /// diagnosis triggers and friends).
    ManualOnly,
    SupvSetMode,
    SupvSetFbDuration,
    SupvProgramExit,
    SupvProgramNode,
    RmSetRouteActive,
    RmGetAtdValue,
    XrmStreamSetPortConfig,
    XrmStreamGetPortConfig,
    NetworkGetFrameCounter,
    NetworkGetNodesCount,
    AmsTxAllocMsg,
    AmsTxSendMsg,
}

impl ApiIndex {
    const COUNT: usize = 14;
}

const MANUAL: u8 = 0x01;
const INACTIVE: u8 = 0x02;
const NORMAL: u8 = 0x04;
const FALLBACK: u8 = 0x08;
const DIAG: u8 = 0x10;
const PROG: u8 = 0x20;

/// Permission table indexed by [`ApiIndex`]; each entry carries its own
/// index so the positions can be verified at construction.
const ACCESS_TABLE: [(ApiIndex, u8); ApiIndex::COUNT] = [
    (ApiIndex::All, MANUAL | INACTIVE | NORMAL | FALLBACK | DIAG | PROG),
    (ApiIndex::ManualOnly, MANUAL),
    (ApiIndex::SupvSetMode, INACTIVE | NORMAL | FALLBACK),
    (ApiIndex::SupvSetFbDuration, INACTIVE | NORMAL | FALLBACK | DIAG | PROG),
    (ApiIndex::SupvProgramExit, PROG),
    (ApiIndex::SupvProgramNode, PROG),
    (ApiIndex::RmSetRouteActive, MANUAL | INACTIVE | NORMAL | FALLBACK),
    (ApiIndex::RmGetAtdValue, MANUAL | NORMAL),
    (ApiIndex::XrmStreamSetPortConfig, MANUAL | INACTIVE | NORMAL),
    (ApiIndex::XrmStreamGetPortConfig, MANUAL | INACTIVE | NORMAL),
    (ApiIndex::NetworkGetFrameCounter, MANUAL | NORMAL),
    (ApiIndex::NetworkGetNodesCount, MANUAL | INACTIVE | NORMAL | PROG),
    (ApiIndex::AmsTxAllocMsg, MANUAL | INACTIVE | NORMAL),
    (ApiIndex::AmsTxSendMsg, MANUAL | INACTIVE | NORMAL),
];

/// O(1) permission lookup over the fixed access table.
#[derive(Debug)]
pub struct ModeGate;

impl ModeGate {
    pub fn new() -> Self {
        // The table is positional; a mismatch here is a build defect.
        for (i, (api, _)) in ACCESS_TABLE.iter().enumerate() {
            debug_assert_eq!(*api as usize, i);
        }
        Self
    }

    /// Checks whether `api` may be called in `mode`.
    pub fn check_api(&self, api: ApiIndex, mode: SupvMode) -> Result<(), StackError> {
        if mode == SupvMode::None {
            return Err(StackError::NotInitialized);
        }
        let mask = ACCESS_TABLE[api as usize].1;
        if (mask & mode.bit()) != 0 {
            Ok(())
        } else {
            Err(StackError::NotSupported)
        }
    }

    /// Checks whether a user-requested transition `from -> to` is legal.
    ///
    /// Every mode change out of Inactive requires the Ready state;
    /// Diagnosis and Programming are additionally only reachable this way
    /// and are left through internal transitions only.
    pub fn check_transition(
        &self,
        from: SupvMode,
        state: SupvState,
        to: SupvMode,
    ) -> Result<(), StackError> {
        if to == from {
            return Err(StackError::AlreadySet);
        }
        match (from, to) {
            (SupvMode::Manual, _) => Err(StackError::NotSupported),
            (SupvMode::Normal, SupvMode::Inactive) | (SupvMode::Normal, SupvMode::Fallback) => {
                Ok(())
            }
            (SupvMode::Inactive, SupvMode::Normal)
            | (SupvMode::Inactive, SupvMode::Fallback)
            | (SupvMode::Inactive, SupvMode::Diagnosis)
            | (SupvMode::Inactive, SupvMode::Programming) => {
                if state == SupvState::Ready {
                    Ok(())
                } else {
                    Err(StackError::ApiLocked)
                }
            }
            (SupvMode::Fallback, SupvMode::Inactive) => Ok(()),
            _ => Err(StackError::ApiLocked),
        }
    }
}

impl Default for ModeGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_permissions() {
        let gate = ModeGate::new();
        assert!(gate.check_api(ApiIndex::All, SupvMode::Programming).is_ok());
        assert!(gate.check_api(ApiIndex::ManualOnly, SupvMode::Manual).is_ok());
        assert_eq!(
            gate.check_api(ApiIndex::ManualOnly, SupvMode::Normal),
            Err(StackError::NotSupported)
        );
        assert_eq!(
            gate.check_api(ApiIndex::SupvSetMode, SupvMode::Manual),
            Err(StackError::NotSupported)
        );
        assert!(gate.check_api(ApiIndex::SupvSetMode, SupvMode::Normal).is_ok());
        assert_eq!(
            gate.check_api(ApiIndex::SupvProgramNode, SupvMode::Normal),
            Err(StackError::NotSupported)
        );
        assert!(gate
            .check_api(ApiIndex::SupvProgramNode, SupvMode::Programming)
            .is_ok());
        assert_eq!(
            gate.check_api(ApiIndex::RmGetAtdValue, SupvMode::Inactive),
            Err(StackError::NotSupported)
        );
        assert!(gate
            .check_api(ApiIndex::NetworkGetNodesCount, SupvMode::Programming)
            .is_ok());
        assert_eq!(
            gate.check_api(ApiIndex::AmsTxSendMsg, SupvMode::Fallback),
            Err(StackError::NotSupported)
        );
    }

    #[test]
    fn test_uninitialized_mode_is_gated() {
        let gate = ModeGate::new();
        assert_eq!(
            gate.check_api(ApiIndex::All, SupvMode::None),
            Err(StackError::NotInitialized)
        );
    }

    #[test]
    fn test_transition_legality() {
        let gate = ModeGate::new();
        let ready = SupvState::Ready;
        let busy = SupvState::Busy;
        assert!(gate.check_transition(SupvMode::Normal, ready, SupvMode::Inactive).is_ok());
        assert!(gate.check_transition(SupvMode::Normal, busy, SupvMode::Fallback).is_ok());
        assert!(gate.check_transition(SupvMode::Inactive, ready, SupvMode::Normal).is_ok());
        assert!(gate.check_transition(SupvMode::Inactive, ready, SupvMode::Fallback).is_ok());
        assert!(gate.check_transition(SupvMode::Inactive, ready, SupvMode::Programming).is_ok());
        // Leaving Inactive always requires the Ready state, whatever the
        // target mode is.
        assert_eq!(
            gate.check_transition(SupvMode::Inactive, busy, SupvMode::Normal),
            Err(StackError::ApiLocked)
        );
        assert_eq!(
            gate.check_transition(SupvMode::Inactive, busy, SupvMode::Fallback),
            Err(StackError::ApiLocked)
        );
        assert_eq!(
            gate.check_transition(SupvMode::Inactive, busy, SupvMode::Programming),
            Err(StackError::ApiLocked)
        );
        assert_eq!(
            gate.check_transition(SupvMode::Manual, ready, SupvMode::Normal),
            Err(StackError::NotSupported)
        );
        assert_eq!(
            gate.check_transition(SupvMode::Programming, ready, SupvMode::Normal),
            Err(StackError::ApiLocked)
        );
        assert_eq!(
            gate.check_transition(SupvMode::Normal, ready, SupvMode::Normal),
            Err(StackError::AlreadySet)
        );
        assert_eq!(
            gate.check_transition(SupvMode::Fallback, ready, SupvMode::Normal),
            Err(StackError::ApiLocked)
        );
    }
}
