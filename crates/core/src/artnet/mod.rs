pub mod broadcaster;
pub mod network_config;
pub mod output;
pub mod packet;
