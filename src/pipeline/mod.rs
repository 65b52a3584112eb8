//! Freight intake pipeline.
//!
//! Every inbound message flows through, in order:
//! 1. `Classifier`: is this a new shipment request? (rules first, then text service)
//! 2. `Extractor`: fixed shipment schema from free text, no quality judgment
//! 3. `freight_type::resolve`: pure priority chain to one `FreightType`
//! 4. `Validator`: structural and semantic issues
//! 5. `ClarificationManager`: ask, merge replies, bound the rounds
//! 6. `Materializer`: exactly one `ShipmentRecord` per conversation
//!
//! `IntakeProcessor` orchestrates the stages; `spawn_clarification_sweeper`
//! abandons clarifications nobody answered.

pub mod clarification;
pub mod classifier;
pub mod correlation;
pub mod extractor;
pub mod freight_type;
pub mod materializer;
pub mod normalize;
pub mod processor;
pub mod rules;
pub mod sweeper;
pub mod types;
pub mod validator;

pub use clarification::{ClarificationManager, ReplyOutcome};
pub use classifier::Classifier;
pub use extractor::{ExtractionOutcome, Extractor};
pub use materializer::Materializer;
pub use processor::{IntakeOutcome, IntakeProcessor};
pub use rules::RulesEngine;
pub use sweeper::spawn_clarification_sweeper;
pub use validator::Validator;
