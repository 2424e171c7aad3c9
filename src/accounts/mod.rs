pub mod devices;
pub mod registration;
