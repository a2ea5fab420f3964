//! Deep-link capture and auth-callback routing
//!
//! Bridges the two link sources the platform offers (the link the process
//! was launched with, and the live stream of links arriving while it runs)
//! into a single filtered path that completes pending sign-ins through the
//! auth provider.

pub mod filter;
pub mod router;
pub mod source;

pub use filter::CallbackHostFilter;
pub use router::{DeepLinkRouter, ErrorReporter, LinkDisposition, RouteError, log_route_error};
pub use source::{
    ChannelLinkSource, LinkError, LinkFuture, LinkResult, LinkSender, LinkSource, LinkStream,
    NoLinkSource, parse_link,
};
