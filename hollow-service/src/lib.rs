//! The hollow service: loopback request endpoint over the framed protocol,
//! service host state, and the periodic idle-connection sweep.

pub mod error;
pub mod host;
pub mod paths;
pub mod runtime;

pub use error::ServiceError;
pub use host::ServiceHost;
pub use runtime::{run, start_blocking};
