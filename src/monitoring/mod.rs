/// Health monitoring of live connections and dependent components
pub mod components;
pub mod connection;

pub use components::{
    ComponentHealth, ComponentHealthMonitor, ComponentSpec, ComponentStatus, HealthProbe,
};
pub use connection::{
    ConnectionMetrics, ConnectionMonitor, ConnectionQuality, ConnectionSnapshot, ConnectionState,
    ConnectionTransport, StateChange, TransportEvent,
};
