pub mod javascript;
pub mod python;
