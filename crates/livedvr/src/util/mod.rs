pub mod http;
pub mod path;
pub mod pool;
