pub mod change;
pub mod error;
pub mod field_value;
pub mod ids;
pub mod snapshot;

pub use change::{ChangeOp, ChangeRecord, NewChange};
pub use error::CoreError;
pub use field_value::FieldValue;
pub use ids::*;
pub use snapshot::Snapshot;
