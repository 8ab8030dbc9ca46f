//! Request/response calls on top of a best-effort, broadcast-capable signaling channel.
//!
//! An [rpc::endpoint::RpcEndpoint] is bound to one peer identity on a channel. It exposes local
//!  procedures to the other peers, and it calls theirs, correlating each response with its call
//!  and resolving every call exactly once: with the remote result, with the remote failure, or
//!  with a local failure like a timeout.

pub mod rpc;
pub mod signaling;
pub mod test_util;

pub use rpc::config::{PartialRpcConfig, RpcConfig, RpcEndpointConfig};
pub use rpc::endpoint::{EndpointFault, RpcEndpoint};
pub use rpc::error::RpcError;
pub use rpc::resolver::{ExposeTarget, ImplementationResolver, Outcome, Procedure};
pub use signaling::in_memory::InMemorySignalChannel;
pub use signaling::peer_id::{PeerId, Recipient};


#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            .try_init()
            .ok();
    }
}
