pub mod app;
pub mod console;
