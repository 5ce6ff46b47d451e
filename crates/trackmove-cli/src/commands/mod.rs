pub mod diff;
pub mod format;
pub mod list;
pub mod sync;
