pub mod broadcaster;
pub mod registry;

pub use broadcaster::Broadcaster;
pub use registry::{Session, SessionRegistry};
