mod endpoint;
mod link;
mod network;
mod options;
mod plug;
mod reconcile;
mod tap;

pub use endpoint::{
    gateway_address, interface_name, random_mac, EndpointController, EndpointRecord,
    EXTERNAL_CALL_TIMEOUT, IF_ID_LEN, IF_PREFIX,
};
pub use link::{AttachHandle, LinkProvisioner, LinkRemoval, SwitchAttacher};
pub use network::{Driver, DriverState, NetworkRecord};
pub use options::{NetworkOptions, OPT_IF_PREFIX, OPT_SOCK};
pub use plug::VdePlugAttacher;
pub use tap::{parse_cidr, TapProvisioner};
