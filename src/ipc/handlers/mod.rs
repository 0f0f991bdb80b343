pub mod core;
pub mod documents;
pub mod import;
pub mod reference;
pub mod students;
