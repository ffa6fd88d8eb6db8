pub mod hash;
pub mod ring;
