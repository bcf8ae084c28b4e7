//! Domain model (ids, trackable reference, status, tracker record, errors).

pub mod errors;
pub mod ids;
pub mod record;
pub mod status;
pub mod trackable;

pub use self::errors::{ErrorKind, TrackerError};
pub use self::ids::{JobId, TrackerId};
pub use self::record::{TrackerRecord, progress_cache_key};
pub use self::status::TrackerStatus;
pub use self::trackable::TrackableRef;
