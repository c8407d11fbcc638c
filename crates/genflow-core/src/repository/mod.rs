pub mod memory;
pub mod state;
