pub mod picker;
pub mod selector;

pub use picker::DateTimePicker;
pub use selector::{Choice, PaginatedSelector};
