mod array_value;
pub(crate) mod json;
mod map_value;
mod value;

pub use array_value::ArrayValue;
pub use map_value::MapValue;
pub use value::{FirestoreValue, SentinelValue, ValueKind};
