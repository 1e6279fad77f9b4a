pub mod providers;
pub mod slots;
