//! Freight-type resolution.
//!
//! A pure function from an extracted shipment to one `FreightType`.
//! Evaluated top to bottom, first match wins:
//!
//! 1. Hazmat markers (class, UN number, explicit declaration) → HAZMAT
//! 2. Recognized equipment text → that type (beats any commodity hint)
//! 3. Freight class or more than one piece → LTL
//! 4. Weight below the LTL ceiling → LTL; up to the partial ceiling → PARTIAL
//! 5. Explicit temperature requirement → REEFER
//! 6. DRY_VAN, or UNKNOWN when neither weight nor equipment was extracted

use crate::config::FreightPolicy;
use crate::pipeline::normalize::normalize_phrase;
use crate::pipeline::types::{ExtractedShipment, FreightType};

const REEFER_TERMS: &[&str] = &[
    "reefer",
    "refrigerated",
    "multi temp",
    "multi-temp",
    "multitemp",
    "temp controlled",
    "temp-controlled",
    "temperature controlled",
    "temperature-controlled",
];

const FLATBED_TERMS: &[&str] = &[
    "flatbed",
    "flat bed",
    "flat-bed",
    "step deck",
    "step-deck",
    "stepdeck",
    "conestoga",
    "lowboy",
    "low boy",
    "rgn",
    "drop deck",
    "double drop",
];

const DRY_VAN_TERMS: &[&str] = &["dry van", "van", "enclosed", "vented", "box trailer"];

/// Map equipment wording to the freight type it names.
///
/// Reefer and flatbed vocabulary is checked before the generic "van",
/// so "refrigerated van" is REEFER.
pub fn equipment_family(text: &str) -> Option<FreightType> {
    let lower = text.to_lowercase();
    if contains_any(&lower, REEFER_TERMS) {
        Some(FreightType::Reefer)
    } else if contains_any(&lower, FLATBED_TERMS) {
        Some(FreightType::Flatbed)
    } else if contains_any(&lower, DRY_VAN_TERMS) {
        Some(FreightType::DryVan)
    } else {
        None
    }
}

/// Whether `source` uses any vocabulary of the given equipment family.
pub fn mentions_family(source: &str, family: FreightType) -> bool {
    let lower = source.to_lowercase();
    let terms = match family {
        FreightType::Reefer => REEFER_TERMS,
        FreightType::Flatbed => FLATBED_TERMS,
        FreightType::DryVan => DRY_VAN_TERMS,
        _ => return false,
    };
    contains_any(&lower, terms)
}

fn contains_any(haystack: &str, terms: &[&str]) -> bool {
    let normalized = format!(" {} ", normalize_phrase(haystack));
    terms.iter().any(|term| {
        let term = normalize_phrase(term);
        normalized.contains(&format!(" {term} "))
    })
}

/// Resolve the freight type of a shipment.
pub fn resolve(shipment: &ExtractedShipment, policy: &FreightPolicy) -> FreightType {
    if has_hazmat_markers(shipment) {
        return FreightType::Hazmat;
    }

    if let Some(family) = shipment.equipment_type.as_deref().and_then(equipment_family) {
        return family;
    }

    if shipment.freight_class.is_some() || shipment.piece_count.is_some_and(|n| n > 1) {
        return FreightType::Ltl;
    }

    if let Some(weight) = shipment.weight_lb {
        if weight < policy.ltl_max_lb {
            return FreightType::Ltl;
        }
        if weight <= policy.partial_max_lb {
            return FreightType::Partial;
        }
    }

    if shipment.temperature.is_some() {
        return FreightType::Reefer;
    }

    if shipment.weight_lb.is_none() && shipment.equipment_type.is_none() {
        FreightType::Unknown
    } else {
        FreightType::DryVan
    }
}

fn has_hazmat_markers(shipment: &ExtractedShipment) -> bool {
    shipment
        .hazmat
        .as_ref()
        .is_some_and(|h| h.declared || h.class.is_some() || h.un_number.is_some())
}
