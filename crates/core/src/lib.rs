//! Campaign dispatch core: domain types, error taxonomy, configuration,
//! variant assignment, and message rendering.

pub mod channels;
pub mod config;
pub mod error;
pub mod experimentation;
pub mod store;
pub mod templates;
pub mod types;

pub use config::AppConfig;
pub use error::{CampaignError, CampaignResult, RenderError, TransportError};
pub use experimentation::ExperimentEngine;
pub use templates::{RenderedMessage, TemplateRenderer};
