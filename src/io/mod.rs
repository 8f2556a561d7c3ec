pub mod net;
pub mod process;
pub mod progress;
pub mod workspace;
