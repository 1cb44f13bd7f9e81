pub mod clock;
pub mod error;
pub mod types;
pub mod value;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, system_clock};
pub use error::{ErrorKind, LedgerError, Result, WRITE_CONFLICT_MARKER};
pub use types::{
    JsonValue, Row, optional_timestamp_value, parse_timestamp, row_bool, row_i64, row_str,
    row_string, row_timestamp, stored_precision, timestamp_value, to_row,
};
pub use value::{compare_values, values_equal};
