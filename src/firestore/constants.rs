pub(crate) const DEFAULT_DATABASE_ID: &str = "(default)";

/// Reserved key marking a write-time sentinel in the JSON wire format.
pub(crate) const FIELD_VALUE_MARKER: &str = "__fieldValue__";

pub(crate) const DEFAULT_MAX_TRANSACTION_ATTEMPTS: u32 = 5;
pub(crate) const DEFAULT_MAX_BATCH_WRITES: usize = 500;
pub(crate) const AUTO_ID_LENGTH: usize = 20;
