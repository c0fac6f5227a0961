//! Auto Message Sender dispatch
//!
//! - [`Dispatcher`]: controllable polling loop over the message store
//! - [`DeliveryChannel`] / [`WebhookChannel`]: outbound delivery
//! - [`SideCache`] / [`RedisSideCache`]: best-effort sent-time mirror

pub mod cache;
pub mod channel;
pub mod delivery;
pub mod dispatcher;
pub mod error;

pub use cache::{cache_key, format_sent_at, NoopSideCache, RedisSideCache, SideCache};
pub use channel::{DeliveryChannel, WebhookChannel, WebhookChannelConfig};
pub use delivery::{Delivered, DeliveryFailure, TickReport};
pub use dispatcher::{DispatchConfig, DispatchControl, Dispatcher};
pub use error::{CacheError, ChannelError, DeliveryError, DispatchError};
