pub mod session;
pub mod summary;
