pub mod client_config;
pub mod driver;
pub mod payload_fill;
pub mod request;
pub mod ron_client;
pub mod ron_node;
pub mod ron_trace;
