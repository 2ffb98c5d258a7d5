mod cells;
mod writer;

pub use cells::{render_value, table_reader, table_writer, DELIMITER, MISSING_VALUE};
pub use writer::{OutputMode, ResultWriter};
