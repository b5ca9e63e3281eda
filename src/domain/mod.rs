mod record;

pub use record::{Coordinates, Record, RecordError, RecordFields};
