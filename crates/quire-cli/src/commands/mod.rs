pub mod category;
pub mod common;
pub mod note;
pub mod sync;
