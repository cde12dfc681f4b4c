//! Route manager interface.
//!
//! Routes are owned and driven by an external routing engine; the
//! supervisor only activates/deactivates them through this interface and
//! updates the cached audio transport delay after a measurement.

use crate::hal::StackError;
use crate::types::Signature;

/// State of one route as maintained by the routing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteState {
    #[default]
    Idle,
    Building,
    Built,
    Suspended,
}

/// One end of a route, resolved against a discovered node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Endpoint {
    /// Identity of the node hosting the endpoint.
    pub signature: Signature,
    /// Streaming port resource on the node, 0 when not yet created.
    pub streaming_port_handle: u16,
    /// Synchronous connection resource on the node, 0 when not created.
    pub sync_connection_handle: u16,
    /// Whether the routing engine finished building this endpoint.
    pub built: bool,
}

/// Source-to-sink streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Route {
    pub id: u16,
    pub source: Endpoint,
    pub sink: Endpoint,
    pub active: bool,
    pub state: RouteState,
    /// Cached audio transport delay in microseconds; zero until a
    /// measurement succeeded.
    pub atd_value: u16,
}

/// The external routing engine consumed by the supervisor.
pub trait RouteManager {
    /// Activates or deactivates a route.
    fn set_route_active(&mut self, route_id: u16, active: bool) -> Result<(), StackError>;

    /// Read access to one route.
    fn route(&self, route_id: u16) -> Option<&Route>;

    /// Updates the cached ATD value of a route.
    fn set_atd_value(&mut self, route_id: u16, atd_value: u16);

    /// Called when a discovered node became available/unavailable so the
    /// engine can build or tear down affected routes.
    fn node_availability_changed(&mut self, signature: &Signature, available: bool);
}
