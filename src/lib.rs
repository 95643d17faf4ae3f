mod core;

pub use crate::core::{daemon, router, serve, DaemonArgs};

// Re-export commonly used types for integration tests
pub use crate::core::{
    AttachHandle, CreateEndpointRequest, CreateNetworkRequest, Driver, DriverError, DriverState,
    EndpointController, EndpointInterface, EndpointRecord, EndpointRequest, IpamData, JoinRequest,
    LinkProvisioner, LinkRemoval, NetworkRecord, NetworkRequest, PersistenceGateway, Snapshot,
    SwitchAttacher, TapProvisioner, VdePlugAttacher, DATASTORE_FILE, GENERIC_OPTIONS,
};
