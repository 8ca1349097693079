pub mod data_lake;
pub mod http;
pub mod kernel;
