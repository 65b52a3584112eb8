//! Freight intake: turns shipment-request email into validated shipment records.

pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod review;
pub mod store;
