//! Shipment validation.
//!
//! The only authority on whether extracted data is usable. Two layers:
//!
//! - **Structural**: each freight type declares the fields it requires;
//!   absent ones produce `Missing` issues.
//! - **Semantic**: present fields are checked for usability: vague
//!   landmark locations, times without a date and generic commodity nouns
//!   are `Insufficient`; non-positive weights and malformed hazmat
//!   identifiers are `Invalid`.
//!
//! A shipment is valid when no issue is blocking. `Missing` and `Invalid`
//! always block; `Insufficient` blocks on locations and commodity, and on
//! pickup timing only for timing-critical freight types.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::config::FreightPolicy;
use crate::pipeline::normalize::{has_calendar_date, has_street_address, normalize_phrase};
use crate::pipeline::types::{
    ExtractedShipment, FreightType, IssueKind, Location, ShipmentField, ValidationIssue,
    ValidationReport,
};

const BASE_REQUIRED: &[ShipmentField] = &[
    ShipmentField::PickupLocation,
    ShipmentField::DeliveryLocation,
    ShipmentField::Weight,
    ShipmentField::Commodity,
    ShipmentField::PickupTiming,
];

/// NMFC freight classes.
const NMFC_CLASSES: &[&str] = &[
    "50", "55", "60", "65", "70", "77.5", "85", "92.5", "100", "110", "125", "150", "175", "200",
    "250", "300", "400", "500",
];

static VAGUE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:near|around|close to|by|next to|outside(?: of)?|somewhere (?:in|near|around)|vicinity of|in the .+ area|the .+ area)\b",
    )
    .unwrap()
});

static LANDMARK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:airport|o'hare|stadium|arena|mall|downtown|uptown|midtown|port of|harbor|station|terminal|metro area|area|suburbs?|outskirts|region|county)\b",
    )
    .unwrap()
});

static UN_FORMAT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:UN|NA)\d{4}$").unwrap());

static HAZMAT_CLASS_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:class\s*)?[1-9](?:\.[1-6])?[A-LNS]?$").unwrap());

static PACKING_GROUP_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:pg\s*|packing group\s*)?(?:I{1,3}|[1-3])$").unwrap());

/// Every field a freight type requires, base set included.
pub fn required_fields(freight_type: FreightType) -> Vec<ShipmentField> {
    let mut fields = BASE_REQUIRED.to_vec();
    match freight_type {
        FreightType::Flatbed => fields.push(ShipmentField::Dimensions),
        FreightType::Hazmat => fields.extend([
            ShipmentField::HazmatClass,
            ShipmentField::UnNumber,
            ShipmentField::ProperShippingName,
            ShipmentField::PackingGroup,
            ShipmentField::EmergencyContact,
        ]),
        FreightType::Ltl => fields.extend([ShipmentField::Dimensions, ShipmentField::FreightClass]),
        FreightType::Reefer => fields.push(ShipmentField::Temperature),
        FreightType::Unknown => fields.push(ShipmentField::EquipmentType),
        FreightType::DryVan | FreightType::Partial => {}
    }
    fields
}

/// Validates shipments against a freight policy.
#[derive(Debug, Clone)]
pub struct Validator {
    policy: FreightPolicy,
}

impl Validator {
    pub fn new(policy: FreightPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &FreightPolicy {
        &self.policy
    }

    /// Run both layers and return the union of their issues.
    pub fn validate(&self, shipment: &ExtractedShipment, freight_type: FreightType) -> ValidationReport {
        let mut issues = Vec::new();

        for field in required_fields(freight_type) {
            if !shipment.has(field) {
                issues.push(self.issue(
                    freight_type,
                    field,
                    IssueKind::Missing,
                    format!("{} is missing", field.label()),
                ));
            }
        }

        for (field, kind, message) in self.semantic_checks(shipment) {
            issues.push(self.issue(freight_type, field, kind, message));
        }

        let report = ValidationReport {
            freight_type,
            issues,
        };
        debug!(
            freight_type = %freight_type,
            issues = report.issues.len(),
            valid = report.is_valid(),
            "Validation complete"
        );
        report
    }

    fn issue(
        &self,
        freight_type: FreightType,
        field: ShipmentField,
        kind: IssueKind,
        message: String,
    ) -> ValidationIssue {
        ValidationIssue {
            field,
            kind,
            message,
            blocking: self.is_blocking(freight_type, field, kind),
        }
    }

    fn is_blocking(&self, freight_type: FreightType, field: ShipmentField, kind: IssueKind) -> bool {
        match kind {
            IssueKind::Missing | IssueKind::Invalid => true,
            IssueKind::Insufficient => match field {
                ShipmentField::PickupLocation
                | ShipmentField::DeliveryLocation
                | ShipmentField::Commodity => true,
                ShipmentField::PickupTiming => self.policy.is_timing_critical(freight_type),
                _ => false,
            },
        }
    }

    fn semantic_checks(&self, s: &ExtractedShipment) -> Vec<(ShipmentField, IssueKind, String)> {
        let mut out = Vec::new();

        for (field, location) in [
            (ShipmentField::PickupLocation, &s.pickup_location),
            (ShipmentField::DeliveryLocation, &s.delivery_location),
        ] {
            if let Some(loc) = location
                && let Some(reason) = location_insufficiency(loc)
            {
                out.push((
                    field,
                    IssueKind::Insufficient,
                    format!("{} \"{}\" {reason}", field.label(), loc.text),
                ));
            }
        }

        if let Some(weight) = s.weight_lb
            && weight <= 0.0
        {
            out.push((
                ShipmentField::Weight,
                IssueKind::Invalid,
                format!("weight must be positive, got {weight} lb"),
            ));
        }

        if let Some(commodity) = s.commodity.as_deref() {
            let normalized = normalize_phrase(commodity);
            if normalized.is_empty() || self.policy.is_generic_commodity(&normalized) {
                out.push((
                    ShipmentField::Commodity,
                    IssueKind::Insufficient,
                    format!("commodity \"{commodity}\" is too generic; what exactly is shipping?"),
                ));
            }
        }

        if let Some(timing) = s.pickup_timing.as_deref()
            && !has_calendar_date(timing)
        {
            out.push((
                ShipmentField::PickupTiming,
                IssueKind::Insufficient,
                format!("pickup timing \"{timing}\" has no calendar date"),
            ));
        }

        if let Some(class) = s.freight_class.as_deref()
            && !NMFC_CLASSES.contains(&class.trim())
        {
            out.push((
                ShipmentField::FreightClass,
                IssueKind::Invalid,
                format!("freight class \"{class}\" is not a valid NMFC class"),
            ));
        }

        if let Some(dims) = &s.dimensions {
            let values = [dims.length, dims.width, dims.height];
            if values.iter().flatten().any(|v| *v <= 0.0) {
                out.push((
                    ShipmentField::Dimensions,
                    IssueKind::Invalid,
                    format!("dimensions \"{}\" must be positive", dims.text),
                ));
            } else if dims.length.is_none() {
                out.push((
                    ShipmentField::Dimensions,
                    IssueKind::Insufficient,
                    format!("dimensions \"{}\" could not be read as L x W x H", dims.text),
                ));
            }
        }

        if let Some(t) = &s.temperature
            && let (Some(min), Some(max)) = (t.min, t.max)
            && min > max
        {
            out.push((
                ShipmentField::Temperature,
                IssueKind::Invalid,
                format!("temperature range {min} to {max} is inverted"),
            ));
        }

        if let Some(h) = &s.hazmat {
            if let Some(class) = h.class.as_deref()
                && !HAZMAT_CLASS_FORMAT.is_match(class.trim())
            {
                out.push((
                    ShipmentField::HazmatClass,
                    IssueKind::Invalid,
                    format!("hazmat class \"{class}\" must be 1-9 with optional division"),
                ));
            }
            if let Some(un) = h.un_number.as_deref()
                && !UN_FORMAT.is_match(un.trim())
            {
                out.push((
                    ShipmentField::UnNumber,
                    IssueKind::Invalid,
                    format!("UN number \"{un}\" must look like UN1234"),
                ));
            }
            if let Some(pg) = h.packing_group.as_deref()
                && !PACKING_GROUP_FORMAT.is_match(pg.trim())
            {
                out.push((
                    ShipmentField::PackingGroup,
                    IssueKind::Invalid,
                    format!("packing group \"{pg}\" must be I, II or III"),
                ));
            }
        }

        out
    }
}

/// Why a location is not actionable, or `None` if it is.
fn location_insufficiency(loc: &Location) -> Option<&'static str> {
    let has_postal = loc.postal_code.is_some();
    let has_city_state = loc.city.is_some() && loc.state.is_some();
    if !has_postal && !has_city_state {
        return Some("has no parseable city and state");
    }

    let vague = VAGUE_PREFIX.is_match(&loc.text) || LANDMARK.is_match(&loc.text);
    if vague && !has_postal && !has_street_address(&loc.text) {
        return Some("is a landmark, not an address");
    }
    None
}
