//! eventwire - Global event dispatch over pluggable messaging transports.
//!
//! A [`GlobalEventDispatcher`] bridges a process-local event dispatcher to a
//! messaging backbone. Events fired remotely fan out to every dispatcher
//! subscribed to the event or one of its ancestors, optionally restricted to
//! a recipient list. Transports live under [`bus`].

pub mod bus;
pub mod config;
pub mod delivered;
pub mod dispatcher;
pub mod envelope;
pub mod event_name;
pub mod filter;
pub mod identity;
pub mod ping;
pub mod publisher;
pub mod registry;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use bus::{BusError, MessageSink, Transport};
pub use config::Config;
pub use dispatcher::{
    DispatcherError, DispatcherState, EventDispatcher, GlobalEventDispatcher,
    LocalEventDispatcher, MessageProcessingHooks,
};
pub use envelope::{Envelope, Recipients};
pub use identity::{AnonymousIdentity, IdentityProvider, StaticIdentity, User};
pub use ping::{PingFilter, PingRequest};
pub use publisher::PublisherInfo;
