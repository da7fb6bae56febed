mod host;
mod policy;
mod socket;

pub use host::{is_local_or_private_host, resolve_scheme};
pub use policy::{EffectAction, EffectInput, SocketBindingPolicy};
pub use socket::{
    BoxUrlFuture, ConnectionPhase, Frame, ReconnectingSocket, ReconnectingSocketConfig,
    SocketEvent, UrlProvider,
};
