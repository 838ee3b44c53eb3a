//! Anti-detection plumbing: who we look like, how fast we go, where we come from.

pub mod delay;
pub mod proxy;
pub mod user_agents;
pub mod window;

pub use delay::{DelayPolicy, HumanDelay};
pub use proxy::{Proxy, ProxyProtocol, ProxyRotator, ProxySelectionStrategy};
pub use user_agents::UserAgentPool;
pub use window::RequestWindow;
