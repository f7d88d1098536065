pub mod logger;
pub mod sink;
