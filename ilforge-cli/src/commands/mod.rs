pub mod common;
pub mod compile;
pub mod hardware;
pub mod run;
