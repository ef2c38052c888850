pub mod dataset;
pub mod session;

pub use dataset::{ColumnSet, Dataset, SessionView};
pub use session::SessionRecord;
