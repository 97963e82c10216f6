pub mod dbnotes;
pub mod memory;
