pub mod error;
pub mod ids;
pub mod packets;
pub mod sparse_list;
pub mod update;
pub mod window;

pub use error::CoreError;
pub use ids::*;
pub use packets::{IdListPacket, UpdatePacket};
pub use sparse_list::SparseList;
pub use update::{ApplyOutcome, RawUpdate, Update};
pub use window::{IdPhase, RecordsPhase, WindowStatus, WindowTable};
