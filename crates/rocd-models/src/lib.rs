//! rocd data model - devices, streams, addresses, and events.
//!
//! This crate contains the domain records shared between the device
//! manager, the persistent store, the event dispatcher, and the HTTP
//! boundary. Records are treated as immutable values: mutation means
//! allocating a new record.

pub mod address;
pub mod device;
pub mod error;
pub mod event;
pub mod stream;
pub mod uri;

pub use address::{Address, AddressList};
pub use device::{Device, DeviceDriver, DeviceStatus, DeviceType};
pub use error::ValidationError;
pub use event::{Event, EventType};
pub use stream::{Stream, StreamType};
pub use uri::{Fec, Interface, Uri};
