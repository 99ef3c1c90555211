//! `hhrec-core` — domain building blocks of the recommendation lookup pipeline.
//!
//! This crate contains **pure domain** types (no broker or storage concerns):
//! identifiers, catalog rows, the rendering rule, and the request audit log.

pub mod catalog;
pub mod error;
pub mod id;
pub mod items;
pub mod request_log;
pub mod result;

pub use catalog::{CatalogRecord, HouseholdProfile};
pub use error::DomainError;
pub use id::{HouseholdKey, RequestId};
pub use items::{ItemDirectory, ItemInfo, ItemMap};
pub use request_log::{RequestKind, RequestLogEntry};
pub use result::{RenderedProfile, ResultRecord};
