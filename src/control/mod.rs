pub mod pid;
pub mod regulator;
