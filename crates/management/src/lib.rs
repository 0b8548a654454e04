//! Campaign send management: stores, the recipient directory adapter, the
//! campaign send lifecycle, stuck-send reconciliation, and the REST surface
//! that triggers sends.
//!
//! Data stored in DashMap (development); swap to PostgreSQL for production.

pub mod handlers;
pub mod models;
pub mod recipients;
pub mod reconcile;
pub mod router;
pub mod store;
pub mod workflows;

pub use handlers::ManagementState;
pub use recipients::InMemoryRecipientDirectory;
pub use reconcile::ReconciliationSweep;
pub use router::management_router;
pub use store::ManagementStore;
pub use workflows::CampaignSender;
