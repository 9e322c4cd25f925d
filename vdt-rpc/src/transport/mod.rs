//! Transport adapters
//!
//! A transport moves serialized envelopes between two execution contexts.
//! Every adapter offers the same two-call contract: [`Transport::tracker`]
//! installs the inbound path and [`Transport::trigger`] sends outbound.
//!
//! Delivery is not guaranteed. A closed or detached channel silently drops
//! messages; the handshake above recovers from that, not the adapter.

mod broadcast;
mod channel;
mod websocket;

pub use broadcast::{APP_TAG, BroadcastHub, BroadcastTransport, CLIENT_TAG};
pub use channel::ChannelTransport;
pub use websocket::WebSocketTransport;

/// Inbound callback installed by the bridge
pub type Deliver = Box<dyn Fn(String) + Send + Sync + 'static>;

/// Uniform send/receive primitive
pub trait Transport: Send + Sync + 'static {
    /// Register the inbound path. Only the first call per adapter instance
    /// takes effect.
    fn tracker(&self, deliver: Deliver);

    /// Send `data` to the peer. Never blocks.
    fn trigger(&self, data: String);
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn tracker(&self, deliver: Deliver) {
        (**self).tracker(deliver)
    }

    fn trigger(&self, data: String) {
        (**self).trigger(data)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn tracker(&self, deliver: Deliver) {
        (**self).tracker(deliver)
    }

    fn trigger(&self, data: String) {
        (**self).trigger(data)
    }
}
