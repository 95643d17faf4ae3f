mod snapshot;

pub use snapshot::{PersistenceGateway, Snapshot, DATASTORE_FILE};
