//! Live analytics client core for the LMS dashboards.
//!
//! A [`view::DashboardView`] bootstraps from the REST collaborators, then
//! keeps its [`aggregator::LiveSnapshot`] current from two producers: the
//! reconnecting live-update stream ([`stream::StreamManager`]) and the
//! fixed-interval poll fallback ([`poll`]).

pub mod aggregator;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod poll;
pub mod render;
pub mod stream;
pub mod transport;
pub mod view;

pub use aggregator::{LiveSnapshot, PollUpdate};
pub use config::LiveConfig;
pub use stream::{ConnectionState, StreamEvent, StreamManager};
pub use view::{DashboardView, ViewError};
