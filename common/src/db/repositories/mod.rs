pub mod entity;
pub mod memory;
