pub mod attempts;
pub mod auth;
pub mod client;
pub mod errors;
pub mod exams;
pub mod gateway;
pub mod questions;
pub mod token;
pub(crate) mod validation;

pub use client::{ApiClient, ClientContext};
pub use errors::ApiError;
pub use gateway::ExamGateway;
pub use token::{FileTokenStore, MemoryTokenStore, TokenStore};
