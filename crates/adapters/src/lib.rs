pub mod export;
pub mod memory;
