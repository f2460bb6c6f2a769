pub mod selection_reader;
pub mod outbound_channel;
pub mod client_channel;
pub mod server_processor;
