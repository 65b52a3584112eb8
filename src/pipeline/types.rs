//! Shared types for the intake pipeline.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Inbound message ─────────────────────────────────────────────────

/// A normalized message handed over by the transport layer.
///
/// Immutable; one per pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Transport-native message id (used to drop duplicate deliveries).
    pub id: String,
    /// Sender address.
    pub sender: String,
    /// Subject line.
    #[serde(default)]
    pub subject: String,
    /// Body text.
    pub body: String,
    /// Reply-chain identifier (thread root Message-ID or similar).
    #[serde(default)]
    pub correlation_token: Option<String>,
    /// When the transport received it.
    #[serde(default = "chrono::Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            correlation_token: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_correlation_token(mut self, token: impl Into<String>) -> Self {
        self.correlation_token = Some(token.into());
        self
    }

    /// Whether the subject marks this as a reply ("Re:", "RE:", "Fwd:" excluded).
    pub fn looks_like_reply(&self) -> bool {
        self.subject.trim_start().to_ascii_lowercase().starts_with("re:")
    }
}

// ── Conversation identifier ─────────────────────────────────────────

/// Namespace for deriving conversation ids from transport tokens.
const CONVERSATION_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_37c2_0b8e_4d55_9c1e_f2a4_7d30_b918);

/// Namespace for conversations keyed by the message that started them.
const MESSAGE_NAMESPACE: Uuid = Uuid::from_u128(0x2d94_c0a7_51e3_4b86_a0f2_8c17_e6b5_3f41);

/// Stable token tying an original request to all of its replies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Derive the id from a transport correlation token.
    ///
    /// Angle brackets, surrounding whitespace and case are ignored, so
    /// `<ABC@mail>` and `abc@mail` map to the same conversation.
    pub fn from_token(token: &str) -> Self {
        let normalized = token
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_ascii_lowercase();
        Self(Uuid::new_v5(&CONVERSATION_NAMESPACE, normalized.as_bytes()).to_string())
    }

    /// Derive the id of a conversation started by a message with no reply
    /// chain. Redelivery of the same message maps to the same conversation.
    pub fn from_message_id(message_id: &str) -> Self {
        Self(Uuid::new_v5(&MESSAGE_NAMESPACE, message_id.trim().as_bytes()).to_string())
    }

    /// A random id, unrelated to any message.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an id that was previously rendered with `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(|u| Self(u.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Classification ──────────────────────────────────────────────────

/// What kind of message the classifier believes it is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    NewShipmentRequest,
    StatusUpdate,
    Billing,
    RateNegotiation,
    CapacityOffer,
    ContractPlanning,
    ClarificationResponse,
    Other,
}

impl MessageCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NewShipmentRequest => "new_shipment_request",
            Self::StatusUpdate => "status_update",
            Self::Billing => "billing",
            Self::RateNegotiation => "rate_negotiation",
            Self::CapacityOffer => "capacity_offer",
            Self::ContractPlanning => "contract_planning",
            Self::ClarificationResponse => "clarification_response",
            Self::Other => "other",
        }
    }
}

/// Classifier verdict for one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationDecision {
    pub is_request: bool,
    pub confidence: f32,
    pub rationale: String,
    pub category: MessageCategory,
}

impl ClassificationDecision {
    pub fn reject(category: MessageCategory, rationale: impl Into<String>) -> Self {
        Self {
            is_request: false,
            confidence: 1.0,
            rationale: rationale.into(),
            category,
        }
    }
}

// ── Extracted shipment ──────────────────────────────────────────────

/// A location as written, plus whatever structure could be parsed out of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub text: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
}

/// Piece dimensions as written, with parsed numbers when available.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub text: String,
    #[serde(default)]
    pub length: Option<f64>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnit {
    F,
    C,
}

/// An explicitly required temperature range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureRequirement {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub unit: TemperatureUnit,
}

/// Hazardous-materials details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HazmatInfo {
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub un_number: Option<String>,
    #[serde(default)]
    pub proper_shipping_name: Option<String>,
    #[serde(default)]
    pub packing_group: Option<String>,
    #[serde(default)]
    pub emergency_contact: Option<String>,
    #[serde(default)]
    pub placard_required: Option<bool>,
    /// The text explicitly says the load is hazmat.
    #[serde(default)]
    pub declared: bool,
}

impl HazmatInfo {
    pub fn is_empty(&self) -> bool {
        self.class.is_none()
            && self.un_number.is_none()
            && self.proper_shipping_name.is_none()
            && self.packing_group.is_none()
            && self.emergency_contact.is_none()
            && self.placard_required.is_none()
            && !self.declared
    }
}

/// Raw-but-complete extraction result. A field is `None` only when the
/// source text never mentions it; vague mentions are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedShipment {
    #[serde(default)]
    pub pickup_location: Option<Location>,
    #[serde(default)]
    pub delivery_location: Option<Location>,
    /// Always pounds.
    #[serde(default)]
    pub weight_lb: Option<f64>,
    #[serde(default)]
    pub commodity: Option<String>,
    #[serde(default)]
    pub pickup_timing: Option<String>,
    /// Free text; categorized later by the freight-type resolver.
    #[serde(default)]
    pub equipment_type: Option<String>,
    #[serde(default)]
    pub piece_count: Option<u32>,
    #[serde(default)]
    pub freight_class: Option<String>,
    #[serde(default)]
    pub dimensions: Option<Dimensions>,
    #[serde(default)]
    pub temperature: Option<TemperatureRequirement>,
    #[serde(default)]
    pub hazmat: Option<HazmatInfo>,
}

impl ExtractedShipment {
    /// Whether the given field carries a value.
    pub fn has(&self, field: ShipmentField) -> bool {
        let hazmat = self.hazmat.as_ref();
        match field {
            ShipmentField::PickupLocation => self.pickup_location.is_some(),
            ShipmentField::DeliveryLocation => self.delivery_location.is_some(),
            ShipmentField::Weight => self.weight_lb.is_some(),
            ShipmentField::Commodity => self.commodity.is_some(),
            ShipmentField::PickupTiming => self.pickup_timing.is_some(),
            ShipmentField::EquipmentType => self.equipment_type.is_some(),
            ShipmentField::PieceCount => self.piece_count.is_some(),
            ShipmentField::FreightClass => self.freight_class.is_some(),
            ShipmentField::Dimensions => self.dimensions.is_some(),
            ShipmentField::Temperature => self.temperature.is_some(),
            ShipmentField::HazmatClass => hazmat.is_some_and(|h| h.class.is_some()),
            ShipmentField::UnNumber => hazmat.is_some_and(|h| h.un_number.is_some()),
            ShipmentField::ProperShippingName => {
                hazmat.is_some_and(|h| h.proper_shipping_name.is_some())
            }
            ShipmentField::PackingGroup => hazmat.is_some_and(|h| h.packing_group.is_some()),
            ShipmentField::EmergencyContact => {
                hazmat.is_some_and(|h| h.emergency_contact.is_some())
            }
        }
    }

    /// Number of populated fields (for logging).
    pub fn populated_count(&self) -> usize {
        ShipmentField::ALL.iter().filter(|f| self.has(**f)).count()
    }
}

/// Addressable fields of an `ExtractedShipment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentField {
    PickupLocation,
    DeliveryLocation,
    Weight,
    Commodity,
    PickupTiming,
    EquipmentType,
    PieceCount,
    FreightClass,
    Dimensions,
    Temperature,
    HazmatClass,
    UnNumber,
    ProperShippingName,
    PackingGroup,
    EmergencyContact,
}

impl ShipmentField {
    pub const ALL: [ShipmentField; 15] = [
        Self::PickupLocation,
        Self::DeliveryLocation,
        Self::Weight,
        Self::Commodity,
        Self::PickupTiming,
        Self::EquipmentType,
        Self::PieceCount,
        Self::FreightClass,
        Self::Dimensions,
        Self::Temperature,
        Self::HazmatClass,
        Self::UnNumber,
        Self::ProperShippingName,
        Self::PackingGroup,
        Self::EmergencyContact,
    ];

    /// Machine key, matching the serde name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PickupLocation => "pickup_location",
            Self::DeliveryLocation => "delivery_location",
            Self::Weight => "weight",
            Self::Commodity => "commodity",
            Self::PickupTiming => "pickup_timing",
            Self::EquipmentType => "equipment_type",
            Self::PieceCount => "piece_count",
            Self::FreightClass => "freight_class",
            Self::Dimensions => "dimensions",
            Self::Temperature => "temperature",
            Self::HazmatClass => "hazmat_class",
            Self::UnNumber => "un_number",
            Self::ProperShippingName => "proper_shipping_name",
            Self::PackingGroup => "packing_group",
            Self::EmergencyContact => "emergency_contact",
        }
    }

    /// Wording used when asking the sender about this field.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PickupLocation => "pickup location",
            Self::DeliveryLocation => "delivery location",
            Self::Weight => "total weight",
            Self::Commodity => "commodity",
            Self::PickupTiming => "pickup date and time",
            Self::EquipmentType => "equipment type",
            Self::PieceCount => "piece or pallet count",
            Self::FreightClass => "freight class",
            Self::Dimensions => "dimensions (length x width x height)",
            Self::Temperature => "temperature",
            Self::HazmatClass => "hazmat class",
            Self::UnNumber => "UN number",
            Self::ProperShippingName => "proper shipping name",
            Self::PackingGroup => "packing group",
            Self::EmergencyContact => "24-hour emergency contact",
        }
    }
}

impl fmt::Display for ShipmentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Freight type ────────────────────────────────────────────────────

/// Closed freight-category taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FreightType {
    DryVan,
    Reefer,
    Flatbed,
    Hazmat,
    Ltl,
    Partial,
    Unknown,
}

impl FreightType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DryVan => "DRY_VAN",
            Self::Reefer => "REEFER",
            Self::Flatbed => "FLATBED",
            Self::Hazmat => "HAZMAT",
            Self::Ltl => "LTL",
            Self::Partial => "PARTIAL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for FreightType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FreightType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRY_VAN" => Ok(Self::DryVan),
            "REEFER" => Ok(Self::Reefer),
            "FLATBED" => Ok(Self::Flatbed),
            "HAZMAT" => Ok(Self::Hazmat),
            "LTL" => Ok(Self::Ltl),
            "PARTIAL" => Ok(Self::Partial),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(format!("unknown freight type '{other}'")),
        }
    }
}

// ── Validation ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Absent.
    Missing,
    /// Present but not actionable.
    Insufficient,
    /// Present and malformed.
    Invalid,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Missing => "missing",
            Self::Insufficient => "insufficient",
            Self::Invalid => "invalid",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: ShipmentField,
    pub kind: IssueKind,
    pub message: String,
    /// Whether this issue prevents materialization.
    pub blocking: bool,
}

/// Output of the validator: the union of structural and semantic issues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub freight_type: FreightType,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|i| i.blocking)
    }

    pub fn blocking_issues(&self) -> Vec<ValidationIssue> {
        self.issues.iter().filter(|i| i.blocking).cloned().collect()
    }

    pub fn warnings(&self) -> Vec<ValidationIssue> {
        self.issues.iter().filter(|i| !i.blocking).cloned().collect()
    }

    /// Every field with an issue of any kind.
    pub fn flagged_fields(&self) -> HashSet<ShipmentField> {
        self.issues.iter().map(|i| i.field).collect()
    }

    pub fn issue_for(&self, field: ShipmentField) -> Option<&ValidationIssue> {
        self.issues.iter().find(|i| i.field == field)
    }
}

// ── Clarification ───────────────────────────────────────────────────

/// Phases of one conversation's intake lifecycle.
///
/// ClassifiedValid → Materialized;
/// ClassifiedInvalid → ClarificationSent → {ReplyMergedValid → Materialized,
/// ReplyMergedInvalid → ClarificationSent, NoReplyTimeout → Abandoned}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationPhase {
    ClassifiedValid,
    ClassifiedInvalid,
    ClarificationSent,
    ReplyMergedValid,
    ReplyMergedInvalid,
    NoReplyTimeout,
    Materialized,
    Abandoned,
}

impl ClarificationPhase {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: ClarificationPhase) -> bool {
        use ClarificationPhase::*;
        matches!(
            (self, target),
            (ClassifiedValid, Materialized)
                | (ClassifiedInvalid, ClarificationSent)
                | (ClarificationSent, ReplyMergedValid)
                | (ClarificationSent, ReplyMergedInvalid)
                | (ClarificationSent, NoReplyTimeout)
                | (ReplyMergedValid, Materialized)
                | (ReplyMergedInvalid, ClarificationSent)
                | (ReplyMergedInvalid, Abandoned)
                | (NoReplyTimeout, Abandoned)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Materialized | Self::Abandoned)
    }
}

impl fmt::Display for ClarificationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ClassifiedValid => "classified_valid",
            Self::ClassifiedInvalid => "classified_invalid",
            Self::ClarificationSent => "clarification_sent",
            Self::ReplyMergedValid => "reply_merged_valid",
            Self::ReplyMergedInvalid => "reply_merged_invalid",
            Self::NoReplyTimeout => "no_reply_timeout",
            Self::Materialized => "materialized",
            Self::Abandoned => "abandoned",
        };
        write!(f, "{s}")
    }
}

/// Pending clarification for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub conversation_id: ConversationId,
    pub sender: String,
    /// Subject of the original request.
    pub subject: String,
    pub freight_type: FreightType,
    /// Shipment snapshot as of the last clarification sent.
    pub snapshot: ExtractedShipment,
    /// Full validation report for `snapshot` (drives merge decisions).
    pub report: ValidationReport,
    /// Issues the sender was asked about.
    pub outstanding: Vec<ValidationIssue>,
    pub phase: ClarificationPhase,
    /// Clarification messages sent so far.
    pub rounds: u32,
    pub sent_at: DateTime<Utc>,
    pub response_received: bool,
    pub resulted_in_record: bool,
    /// Transport ids of messages already applied (drops duplicate deliveries).
    #[serde(default)]
    pub processed_message_ids: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl ClarificationRequest {
    /// Move to `target`, or fail if the phase graph forbids it.
    pub fn transition(
        &mut self,
        target: ClarificationPhase,
    ) -> Result<(), crate::error::PipelineError> {
        if !self.phase.can_transition_to(target) {
            return Err(crate::error::PipelineError::InvalidTransition {
                conversation_id: self.conversation_id.to_string(),
                from: self.phase.to_string(),
                to: target.to_string(),
            });
        }
        self.phase = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn has_processed(&self, message_id: &str) -> bool {
        self.processed_message_ids.iter().any(|m| m == message_id)
    }
}

/// Outbound text for the transport layer to deliver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub conversation_id: ConversationId,
    pub to: String,
    pub subject: String,
    pub body: String,
}

// ── Shipment record ─────────────────────────────────────────────────

/// Final, immutable, fully valid shipment. One per conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRecord {
    pub id: Uuid,
    pub conversation_id: ConversationId,
    pub sender: String,
    pub freight_type: FreightType,
    pub shipment: ExtractedShipment,
    /// Non-blocking issues carried forward for downstream review.
    pub warnings: Vec<ValidationIssue>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_rederivable_from_token() {
        let a = ConversationId::from_token("<ABC123@mail.example.com>");
        let b = ConversationId::from_token("abc123@mail.example.com");
        assert_eq!(a, b);
        assert_ne!(a, ConversationId::from_token("other@mail.example.com"));
        assert_eq!(ConversationId::parse(a.as_str()), Some(a));
    }

    #[test]
    fn message_id_derivation_is_stable_and_separate_from_tokens() {
        let a = ConversationId::from_message_id("<m-1@acme.com>");
        assert_eq!(a, ConversationId::from_message_id("<m-1@acme.com>"));
        assert_ne!(a, ConversationId::from_message_id("<m-2@acme.com>"));
        assert_ne!(a, ConversationId::from_token("<m-1@acme.com>"));
    }

    #[test]
    fn conversation_id_parse_rejects_garbage() {
        assert!(ConversationId::parse("not-a-uuid").is_none());
    }

    #[test]
    fn reply_detection_uses_subject_prefix() {
        let msg = InboundMessage::new("1", "a@x.com", "RE: Load to Dallas", "ok");
        assert!(msg.looks_like_reply());
        let msg = InboundMessage::new("2", "a@x.com", "Load to Dallas", "ok");
        assert!(!msg.looks_like_reply());
    }

    #[test]
    fn valid_transitions() {
        use ClarificationPhase::*;
        let transitions = [
            (ClassifiedValid, Materialized),
            (ClassifiedInvalid, ClarificationSent),
            (ClarificationSent, ReplyMergedValid),
            (ClarificationSent, ReplyMergedInvalid),
            (ClarificationSent, NoReplyTimeout),
            (ReplyMergedValid, Materialized),
            (ReplyMergedInvalid, ClarificationSent),
            (ReplyMergedInvalid, Abandoned),
            (NoReplyTimeout, Abandoned),
        ];
        for (from, to) in transitions {
            assert!(from.can_transition_to(to), "{from} should transition to {to}");
        }
    }

    #[test]
    fn invalid_transitions() {
        use ClarificationPhase::*;
        assert!(!ClassifiedInvalid.can_transition_to(Materialized));
        assert!(!ClarificationSent.can_transition_to(Materialized));
        assert!(!Materialized.can_transition_to(ClarificationSent));
        assert!(!Abandoned.can_transition_to(ReplyMergedValid));
        assert!(!ClarificationSent.can_transition_to(ClarificationSent));
    }

    #[test]
    fn terminal_phases() {
        assert!(ClarificationPhase::Materialized.is_terminal());
        assert!(ClarificationPhase::Abandoned.is_terminal());
        assert!(!ClarificationPhase::ClarificationSent.is_terminal());
    }

    #[test]
    fn phase_display_matches_serde() {
        use ClarificationPhase::*;
        for phase in [
            ClassifiedValid,
            ClassifiedInvalid,
            ClarificationSent,
            ReplyMergedValid,
            ReplyMergedInvalid,
            NoReplyTimeout,
            Materialized,
            Abandoned,
        ] {
            let json = serde_json::to_string(&phase).unwrap();
            assert_eq!(format!("\"{phase}\""), json);
        }
    }

    #[test]
    fn freight_type_display_matches_serde_and_parses_back() {
        for ft in [
            FreightType::DryVan,
            FreightType::Reefer,
            FreightType::Flatbed,
            FreightType::Hazmat,
            FreightType::Ltl,
            FreightType::Partial,
            FreightType::Unknown,
        ] {
            let json = serde_json::to_string(&ft).unwrap();
            assert_eq!(format!("\"{ft}\""), json);
            assert_eq!(ft.as_str().parse::<FreightType>(), Ok(ft));
        }
    }

    #[test]
    fn shipment_field_display_matches_serde() {
        for field in ShipmentField::ALL {
            let json = serde_json::to_string(&field).unwrap();
            assert_eq!(format!("\"{field}\""), json);
        }
    }

    #[test]
    fn has_tracks_hazmat_subfields() {
        let shipment = ExtractedShipment {
            hazmat: Some(HazmatInfo {
                class: Some("3".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(shipment.has(ShipmentField::HazmatClass));
        assert!(!shipment.has(ShipmentField::UnNumber));
        assert_eq!(shipment.populated_count(), 1);
    }

    #[test]
    fn report_validity_follows_blocking_flag() {
        let mut report = ValidationReport {
            freight_type: FreightType::DryVan,
            issues: vec![ValidationIssue {
                field: ShipmentField::PickupTiming,
                kind: IssueKind::Insufficient,
                message: "no date".into(),
                blocking: false,
            }],
        };
        assert!(report.is_valid());
        assert_eq!(report.warnings().len(), 1);

        report.issues.push(ValidationIssue {
            field: ShipmentField::Weight,
            kind: IssueKind::Missing,
            message: "weight missing".into(),
            blocking: true,
        });
        assert!(!report.is_valid());
        assert_eq!(report.blocking_issues().len(), 1);
        assert!(report.flagged_fields().contains(&ShipmentField::PickupTiming));
    }
}
