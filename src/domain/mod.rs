pub mod delta;
pub mod input;
pub mod keys;
pub mod models;
pub mod settings;
