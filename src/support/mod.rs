//! Support console core: data model, message service, realtime events and HTTP surface.

pub mod model;
pub mod notifier;
pub mod routes;
pub mod service;

pub use notifier::{BroadcastNotifier, DashboardEvent, Notifier};
pub use routes::console_routes;
pub use service::MessageService;
