pub mod in_memory;
pub mod peer_id;
pub mod transport;
