pub mod datastore;
pub mod rpc_error;
pub mod serializer;
pub(crate) mod structured_query;

pub use datastore::{
    Datastore, InMemoryDatastore, TransactionId, TransactionReads, TransactionResult, WatchEvent,
    WatchHandle, WatchSink, WatchTarget, WriteKind, WriteOperation,
};
pub use rpc_error::{map_error_payload, map_status_code};
pub use serializer::JsonProtoSerializer;
