pub mod extract;
pub mod loading;
pub mod processing;
pub mod tasks;
