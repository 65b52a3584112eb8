//! Shipment field extraction.
//!
//! **Extraction records, it never judges.** Whatever the sender wrote is kept,
//! however vague; the validator alone decides whether a value is usable.
//!
//! Flow:
//! 1. Text service returns one JSON object with the fixed field schema
//! 2. Each field is parsed on its own; a malformed field is nulled and
//!    reported in `dropped_fields`, the rest survive
//! 3. Values are normalized (weight to pounds, location subfields)
//! 4. Guards discard inferred values the source does not support
//!    (temperature from "frozen", reefer from a food commodity)

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::llm::{
    ChatMessage, CompletionRequest, LlmProvider, RetryPolicy, complete_with_retry,
    extract_json_object,
};
use crate::pipeline::correlation::strip_quoted_text;
use crate::pipeline::freight_type::{equipment_family, mentions_family};
use crate::pipeline::normalize::{
    mentions_hazmat, normalize_un_number, parse_dimensions, parse_freight_class, parse_location,
    parse_piece_count, parse_temperature, parse_weight_lb,
};
use crate::pipeline::types::{
    Dimensions, ExtractedShipment, HazmatInfo, InboundMessage, Location, ShipmentField,
    TemperatureRequirement, TemperatureUnit, ValidationIssue,
};

/// Max tokens for the extraction call.
const EXTRACTION_MAX_TOKENS: u32 = 1024;

/// Extraction runs cold; the same text should yield the same fields.
const EXTRACTION_TEMPERATURE: f32 = 0.0;

/// Characters of message body sent to the text service.
const MAX_BODY_CHARS: usize = 6000;

/// Result of one extraction pass.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    pub shipment: ExtractedShipment,
    /// Fields the text service returned in a shape that could not be read.
    pub dropped_fields: Vec<ShipmentField>,
}

/// Pulls the shipment schema out of message text.
pub struct Extractor {
    llm: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
}

impl Extractor {
    pub fn new(llm: Arc<dyn LlmProvider>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }

    /// Extract from an original request (subject and body).
    pub async fn extract(&self, message: &InboundMessage) -> Result<ExtractionOutcome, PipelineError> {
        let source = format!("{}\n\n{}", message.subject, message.body);
        let request = build_extraction_request(&source, None);
        self.run(request, source).await
    }

    /// Extract from a clarification reply.
    ///
    /// Only the reply's own text is considered; quoted history is stripped
    /// so the original request is not extracted twice.
    pub async fn extract_reply(
        &self,
        body: &str,
        outstanding: &[ValidationIssue],
    ) -> Result<ExtractionOutcome, PipelineError> {
        let source = strip_quoted_text(body);
        let request = build_extraction_request(&source, Some(outstanding));
        self.run(request, source).await
    }

    async fn run(
        &self,
        request: CompletionRequest,
        source: String,
    ) -> Result<ExtractionOutcome, PipelineError> {
        let outcome = complete_with_retry(self.llm.as_ref(), &request, &self.retry, |raw| {
            parse_extraction_response(raw, &source)
        })
        .await
        .map_err(|e| {
            warn!(error = %e, "Extraction failed after retries");
            PipelineError::ExtractionFault {
                reason: e.to_string(),
            }
        })?;

        if !outcome.dropped_fields.is_empty() {
            warn!(
                dropped = ?outcome.dropped_fields,
                "Extraction dropped malformed fields"
            );
        }
        info!(
            populated = outcome.shipment.populated_count(),
            "Extraction complete"
        );
        Ok(outcome)
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_extraction_system_prompt() -> String {
    "You extract freight shipment details from email text. You record what is written; \
     you never judge whether it is good enough.\n\n\
     Respond with ONLY a JSON object with these keys (use null when the text does not mention it):\n\
     {\"pickup_location\": \"...\", \"delivery_location\": \"...\", \"weight\": \"...\", \
     \"commodity\": \"...\", \"pickup_timing\": \"...\", \"equipment_type\": \"...\", \
     \"piece_count\": \"...\", \"freight_class\": \"...\", \"dimensions\": \"...\", \
     \"temperature\": \"...\", \"hazmat\": {\"class\": \"...\", \"un_number\": \"...\", \
     \"proper_shipping_name\": \"...\", \"packing_group\": \"...\", \"emergency_contact\": \"...\", \
     \"placard_required\": true}}\n\n\
     Rules:\n\
     - Copy values using the sender's own wording, including units (\"20 tons\", \"near O'Hare\")\n\
     - Keep vague values verbatim; do not drop them and do not improve them\n\
     - temperature: only an explicitly required temperature with a number. \
       \"frozen\" or \"keep cold\" alone is NOT a temperature\n\
     - equipment_type: only equipment the sender names. Never infer it from the commodity\n\
     - hazmat: null unless the text mentions hazardous materials\n\
     - Do not invent values"
        .to_string()
}

fn build_extraction_user_prompt(source: &str, outstanding: Option<&[ValidationIssue]>) -> String {
    let mut prompt = String::with_capacity(source.len().min(MAX_BODY_CHARS) + 256);

    if let Some(issues) = outstanding
        && !issues.is_empty()
    {
        prompt.push_str("This is a reply to our questions about: ");
        let labels: Vec<&str> = issues.iter().map(|i| i.field.label()).collect();
        prompt.push_str(&labels.join(", "));
        prompt.push_str(".\nExtract whatever fields the reply provides.\n\n");
    }

    let body: String = source.chars().take(MAX_BODY_CHARS).collect();
    prompt.push_str("Message:\n");
    prompt.push_str(&body);
    prompt
}

fn build_extraction_request(
    source: &str,
    outstanding: Option<&[ValidationIssue]>,
) -> CompletionRequest {
    CompletionRequest::new(vec![
        ChatMessage::system(build_extraction_system_prompt()),
        ChatMessage::user(build_extraction_user_prompt(source, outstanding)),
    ])
    .with_temperature(EXTRACTION_TEMPERATURE)
    .with_max_tokens(EXTRACTION_MAX_TOKENS)
}

// ── Response parsing ────────────────────────────────────────────────

/// Parse the text service's JSON into a shipment.
///
/// Fails only when there is no JSON object at all; individual fields that
/// cannot be read are nulled and listed in `dropped_fields`.
pub fn parse_extraction_response(raw: &str, source: &str) -> Result<ExtractionOutcome, String> {
    let json_str = extract_json_object(raw);
    let value: Value =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;
    let Value::Object(obj) = value else {
        return Err("expected a JSON object".into());
    };

    use ShipmentField as F;
    let d = &mut Vec::new();
    let pickup_location = field(&obj, &["pickup_location", "origin"], F::PickupLocation, d, read_location);
    let delivery_location =
        field(&obj, &["delivery_location", "destination"], F::DeliveryLocation, d, read_location);
    let weight_lb = field(&obj, &["weight", "weight_lb"], F::Weight, d, read_weight);
    let commodity = field(&obj, &["commodity"], F::Commodity, d, read_text);
    let pickup_timing = field(&obj, &["pickup_timing", "pickup_date"], F::PickupTiming, d, read_text);
    let equipment_type = field(&obj, &["equipment_type", "equipment"], F::EquipmentType, d, read_text);
    let piece_count = field(&obj, &["piece_count", "pieces", "pallets"], F::PieceCount, d, read_count);
    let freight_class = field(&obj, &["freight_class"], F::FreightClass, d, read_freight_class);
    let dimensions = field(&obj, &["dimensions"], F::Dimensions, d, read_dimensions);
    let temperature = field(&obj, &["temperature"], F::Temperature, d, read_temperature);
    let hazmat = match obj.get("hazmat") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => None,
        Some(Value::Object(h)) => Some(read_hazmat(h, d)),
        Some(Value::Bool(true)) => Some(HazmatInfo::default()),
        Some(_) => {
            d.push(F::HazmatClass);
            None
        }
    };

    let mut shipment = ExtractedShipment {
        pickup_location,
        delivery_location,
        weight_lb,
        commodity,
        pickup_timing,
        equipment_type,
        piece_count,
        freight_class,
        dimensions,
        temperature,
        hazmat,
    };
    let dropped = std::mem::take(d);

    apply_source_guards(&mut shipment, source);
    Ok(ExtractionOutcome {
        shipment,
        dropped_fields: dropped,
    })
}

/// Look up the first present key and read it; record a drop on failure.
fn field<T>(
    obj: &Map<String, Value>,
    keys: &[&str],
    which: ShipmentField,
    dropped: &mut Vec<ShipmentField>,
    read: fn(&Value) -> Option<T>,
) -> Option<T> {
    let value = keys.iter().find_map(|k| obj.get(*k))?;
    if value.is_null() || value.as_str().is_some_and(|s| s.trim().is_empty()) {
        return None;
    }
    let parsed = read(value);
    if parsed.is_none() {
        debug!(field = %which, value = %value, "Dropping malformed field");
        dropped.push(which);
    }
    parsed
}

fn read_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn read_location(value: &Value) -> Option<Location> {
    match value {
        Value::String(s) => Some(parse_location(s)),
        Value::Object(o) => {
            let text = o.get("text").and_then(Value::as_str).map(str::to_string);
            let city = o.get("city").and_then(Value::as_str).map(str::to_string);
            let state = o.get("state").and_then(Value::as_str).map(str::to_string);
            let postal = o
                .get("postal_code")
                .or_else(|| o.get("zip"))
                .and_then(read_text);
            let text = text.or_else(|| {
                let parts: Vec<&str> = [city.as_deref(), state.as_deref(), postal.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect();
                (!parts.is_empty()).then(|| parts.join(" "))
            })?;
            // Fill any subfield the service left out from the text itself.
            let parsed = parse_location(&text);
            Some(Location {
                text: parsed.text,
                city: city.or(parsed.city),
                state: state
                    .and_then(|s| crate::pipeline::normalize::state_code(&s))
                    .or(parsed.state),
                postal_code: postal.or(parsed.postal_code),
            })
        }
        _ => None,
    }
}

fn read_weight(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_weight_lb(s),
        _ => None,
    }
}

fn read_count(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => parse_piece_count(s),
        _ => None,
    }
}

fn read_freight_class(value: &Value) -> Option<String> {
    let text = read_text(value)?;
    // Unreadable classes stay verbatim for the validator to flag.
    Some(parse_freight_class(&text).unwrap_or(text))
}

fn read_dimensions(value: &Value) -> Option<Dimensions> {
    match value {
        Value::String(s) => Some(parse_dimensions(s).unwrap_or_else(|| Dimensions {
            text: s.trim().to_string(),
            ..Default::default()
        })),
        Value::Object(o) => {
            let num = |k: &str| o.get(k).and_then(Value::as_f64);
            let dims = Dimensions {
                text: o
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_default(),
                length: num("length"),
                width: num("width"),
                height: num("height"),
                unit: o.get("unit").and_then(Value::as_str).map(str::to_string),
            };
            (dims.length.is_some() || !dims.text.is_empty()).then_some(dims)
        }
        _ => None,
    }
}

fn read_temperature(value: &Value) -> Option<TemperatureRequirement> {
    match value {
        Value::String(s) => parse_temperature(s),
        Value::Number(n) => n.as_f64().map(|v| TemperatureRequirement {
            min: Some(v),
            max: Some(v),
            unit: TemperatureUnit::F,
        }),
        Value::Object(o) => {
            let min = o.get("min").and_then(Value::as_f64);
            let max = o.get("max").and_then(Value::as_f64);
            if min.is_none() && max.is_none() {
                return None;
            }
            let unit = match o.get("unit").and_then(Value::as_str) {
                Some(u) if u.eq_ignore_ascii_case("c") || u.eq_ignore_ascii_case("celsius") => {
                    TemperatureUnit::C
                }
                _ => TemperatureUnit::F,
            };
            Some(TemperatureRequirement { min, max, unit })
        }
        _ => None,
    }
}

fn read_hazmat(obj: &Map<String, Value>, dropped: &mut Vec<ShipmentField>) -> HazmatInfo {
    let mut text = |keys: &[&str], which: ShipmentField| field(obj, keys, which, dropped, read_text);
    let class = text(&["class", "hazmat_class"], ShipmentField::HazmatClass);
    let un_number = text(&["un_number"], ShipmentField::UnNumber)
        .map(|raw| normalize_un_number(&raw).unwrap_or(raw));
    let proper_shipping_name = text(&["proper_shipping_name"], ShipmentField::ProperShippingName);
    let packing_group = text(&["packing_group"], ShipmentField::PackingGroup);
    let emergency_contact = text(&["emergency_contact"], ShipmentField::EmergencyContact);
    HazmatInfo {
        class,
        un_number,
        proper_shipping_name,
        packing_group,
        emergency_contact,
        placard_required: obj.get("placard_required").and_then(Value::as_bool),
        declared: false,
    }
}

/// Discard values the source text does not support.
fn apply_source_guards(shipment: &mut ExtractedShipment, source: &str) {
    // Temperature must come from a numeric expression in the text.
    if shipment.temperature.is_some() && parse_temperature(source).is_none() {
        debug!("Discarding temperature with no numeric expression in source");
        shipment.temperature = None;
    }

    // Equipment must be named by the sender, not inferred from the commodity.
    if let Some(equipment) = shipment.equipment_type.as_deref() {
        let supported = match equipment_family(equipment) {
            Some(family) => mentions_family(source, family),
            None => source.to_lowercase().contains(&equipment.to_lowercase()),
        };
        if !supported {
            debug!(equipment, "Discarding equipment type not present in source");
            shipment.equipment_type = None;
        }
    }

    let declared = mentions_hazmat(source);
    match shipment.hazmat.as_mut() {
        Some(h) => {
            h.declared = declared;
            if h.is_empty() {
                shipment.hazmat = None;
            }
        }
        None if declared => {
            shipment.hazmat = Some(HazmatInfo {
                declared: true,
                ..Default::default()
            });
        }
        None => {}
    }
}
