pub mod client;
pub mod filters;
pub mod session;
pub mod types;

pub use client::ApicClient;
pub use session::{DeploymentMode, SessionContext};
pub use types::ApicError;
