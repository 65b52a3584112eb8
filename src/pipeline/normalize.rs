//! Deterministic text normalization for shipment fields.
//!
//! The text service returns field values close to the source wording; these
//! helpers turn that wording into canonical values (pounds, parsed location
//! parts, temperature ranges) without judging whether the value is good
//! enough. Sufficiency is the validator's call.

use std::sync::LazyLock;

use regex::Regex;

use crate::pipeline::types::{Dimensions, Location, TemperatureRequirement, TemperatureUnit};

const LB_PER_SHORT_TON: f64 = 2000.0;
const LB_PER_METRIC_TONNE: f64 = 2204.62;
const LB_PER_KG: f64 = 2.20462;

static WEIGHT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?P<num>-?(?:\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?))(?:\s*(?:-|–|to)\s*(?P<hi>\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?))?\s*(?P<k>k\b)?\s*(?:(?P<unit>lbs?|pounds?|tonnes?|metric\s+tons?|short\s+tons?|tons?|kgs?|kilograms?|kilos?|mt)\b\.?|(?P<hash>#))?",
    )
    .unwrap()
});

static BARE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*-?[\d,]+(?:\.\d+)?\s*k?\s*$").unwrap());

/// Parse a weight expression into pounds.
///
/// Accepts "42,000 lbs", "42k lbs", "20 tons", "18 tonnes", "9000 kg",
/// "15000#", "40,000-42,000 lbs". A bare number is taken as pounds.
/// Returns `None` when no weight can be read.
pub fn parse_weight_lb(text: &str) -> Option<f64> {
    let mut bare: Option<f64> = None;
    for caps in WEIGHT.captures_iter(text) {
        // A range ("40,000-42,000 lbs") is read as its upper bound.
        let Some(num) = caps.name("hi").or_else(|| caps.name("num")) else {
            continue;
        };
        let Ok(mut value) = num.as_str().replace(',', "").parse::<f64>() else {
            continue;
        };
        if caps.name("k").is_some() {
            value *= 1000.0;
        }

        let factor = match (caps.name("unit"), caps.name("hash")) {
            (Some(unit), _) => unit_factor(unit.as_str()),
            (None, Some(_)) => Some(1.0),
            (None, None) => {
                if bare.is_none() && BARE_NUMBER.is_match(text) {
                    bare = Some(value);
                }
                None
            }
        };
        if let Some(factor) = factor {
            return Some(round2(value * factor));
        }
    }
    bare.map(round2)
}

fn unit_factor(unit: &str) -> Option<f64> {
    let unit = unit.to_ascii_lowercase();
    let unit = unit.split_whitespace().collect::<Vec<_>>().join(" ");
    match unit.as_str() {
        "lb" | "lbs" | "pound" | "pounds" => Some(1.0),
        "ton" | "tons" | "short ton" | "short tons" => Some(LB_PER_SHORT_TON),
        "tonne" | "tonnes" | "metric ton" | "metric tons" | "mt" => Some(LB_PER_METRIC_TONNE),
        "kg" | "kgs" | "kilogram" | "kilograms" | "kilo" | "kilos" => Some(LB_PER_KG),
        _ => None,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ── Locations ───────────────────────────────────────────────────────

const STATES: &[(&str, &str)] = &[
    ("AL", "alabama"),
    ("AK", "alaska"),
    ("AZ", "arizona"),
    ("AR", "arkansas"),
    ("CA", "california"),
    ("CO", "colorado"),
    ("CT", "connecticut"),
    ("DE", "delaware"),
    ("DC", "district of columbia"),
    ("FL", "florida"),
    ("GA", "georgia"),
    ("HI", "hawaii"),
    ("ID", "idaho"),
    ("IL", "illinois"),
    ("IN", "indiana"),
    ("IA", "iowa"),
    ("KS", "kansas"),
    ("KY", "kentucky"),
    ("LA", "louisiana"),
    ("ME", "maine"),
    ("MD", "maryland"),
    ("MA", "massachusetts"),
    ("MI", "michigan"),
    ("MN", "minnesota"),
    ("MS", "mississippi"),
    ("MO", "missouri"),
    ("MT", "montana"),
    ("NE", "nebraska"),
    ("NV", "nevada"),
    ("NH", "new hampshire"),
    ("NJ", "new jersey"),
    ("NM", "new mexico"),
    ("NY", "new york"),
    ("NC", "north carolina"),
    ("ND", "north dakota"),
    ("OH", "ohio"),
    ("OK", "oklahoma"),
    ("OR", "oregon"),
    ("PA", "pennsylvania"),
    ("RI", "rhode island"),
    ("SC", "south carolina"),
    ("SD", "south dakota"),
    ("TN", "tennessee"),
    ("TX", "texas"),
    ("UT", "utah"),
    ("VT", "vermont"),
    ("VA", "virginia"),
    ("WA", "washington"),
    ("WV", "west virginia"),
    ("WI", "wisconsin"),
    ("WY", "wyoming"),
];

static POSTAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d{5})(?:-\d{4})?\b").unwrap());

/// Two-letter state followed by a postal code, a comma, or the end.
static STATE_ABBR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2})\b\.?(?:\s+\d{5}|\s*,|\s*$)").unwrap());

static STREET_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[\s,])\d{1,6}\s+[A-Za-z]").unwrap());

const STREET_SUFFIXES: &[&str] = &[
    "st", "street", "ave", "avenue", "rd", "road", "blvd", "boulevard", "dr", "drive", "hwy",
    "highway", "ln", "lane", "way", "pkwy", "parkway", "ct", "court", "suite", "ste",
];

/// Normalize a state name or abbreviation to its two-letter code.
pub fn state_code(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('.');
    if trimmed.len() == 2 {
        let upper = trimmed.to_ascii_uppercase();
        return STATES
            .iter()
            .find(|(code, _)| *code == upper)
            .map(|(code, _)| code.to_string());
    }
    let lower = trimmed.to_lowercase();
    STATES
        .iter()
        .find(|(_, name)| *name == lower)
        .map(|(code, _)| code.to_string())
}

/// Split a free-text location into city, state and postal code.
///
/// The original text is always kept; subfields stay `None` when they
/// cannot be read.
pub fn parse_location(text: &str) -> Location {
    let text = text.trim();
    let postal_code = POSTAL.captures(text).map(|c| c[1].to_string());

    let mut state: Option<String> = None;
    let mut state_start: Option<usize> = None;

    for caps in STATE_ABBR.captures_iter(text) {
        let m = caps.get(1).map(|m| (m.start(), m.as_str()));
        if let Some((start, abbr)) = m
            && let Some(code) = state_code(abbr)
        {
            state = Some(code);
            state_start = Some(start);
        }
    }

    if state.is_none() {
        let lower = text.to_ascii_lowercase();
        // Longest names first so "west virginia" wins over "virginia".
        let mut by_len: Vec<&(&str, &str)> = STATES.iter().collect();
        by_len.sort_by_key(|(_, name)| std::cmp::Reverse(name.len()));
        for (code, name) in by_len {
            if let Some(pos) = find_word(&lower, name) {
                state = Some(code.to_string());
                state_start = Some(pos);
                break;
            }
        }
    }

    let city = state_start.and_then(|start| city_before(&text[..start]));

    Location {
        text: text.to_string(),
        city,
        state,
        postal_code,
    }
}

fn find_word(haystack: &str, needle: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = haystack[from..].find(needle) {
        let start = from + rel;
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return Some(start);
        }
        from = end;
    }
    None
}

/// Trailing capitalized words before the state, skipping street parts.
fn city_before(prefix: &str) -> Option<String> {
    let segment = prefix
        .trim_end_matches(|c: char| c == ',' || c.is_whitespace())
        .rsplit(',')
        .next()
        .unwrap_or("")
        .trim();

    let mut words: Vec<&str> = Vec::new();
    for word in segment.split_whitespace().rev() {
        let bare = word.trim_matches(|c: char| c == '.' || c == ',');
        let is_name = bare
            .chars()
            .next()
            .is_some_and(|c| c.is_uppercase())
            && bare
                .chars()
                .all(|c| c.is_alphabetic() || c == '\'' || c == '-' || c == '.');
        if !is_name || STREET_SUFFIXES.contains(&bare.to_lowercase().as_str()) || words.len() == 3
        {
            break;
        }
        words.push(bare);
    }
    if words.is_empty() {
        return None;
    }
    words.reverse();
    Some(words.join(" "))
}

/// Whether the text carries a street number ("1200 W Lake St").
pub fn has_street_address(text: &str) -> bool {
    STREET_NUMBER.is_match(text)
}

// ── Timing ──────────────────────────────────────────────────────────

static CALENDAR_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)
        \b\d{1,2}/\d{1,2}(?:/\d{2,4})?\b
        | \b\d{4}-\d{2}-\d{2}\b
        | \b(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s+\d{1,2}(?:st|nd|rd|th)?\b
        | \b\d{1,2}(?:st|nd|rd|th)?\s+(?:of\s+)?(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\b
        | \b(?:today|tonight|tomorrow)\b
        | \b(?:mon|tues?|wed(?:nes)?|thu(?:rs?)?|fri|sat(?:ur)?|sun)(?:day)?\b
        ",
    )
    .unwrap()
});

/// Whether a timing string pins down a calendar day.
///
/// "tomorrow 8am", "Friday", "3/14", "March 14" qualify; "8am" or
/// "ASAP" do not.
pub fn has_calendar_date(text: &str) -> bool {
    CALENDAR_DATE.is_match(text)
}

// ── Temperature ─────────────────────────────────────────────────────

static TEMP_BETWEEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)between\s+(?P<a>-?\d+(?:\.\d+)?)\s*°?\s*(?P<ua>[FC]\b)?\s*and\s+(?P<b>-?\d+(?:\.\d+)?)\s*(?:°\s*|degrees?\s*)(?P<ub>fahrenheit|celsius|[FC]\b)?",
    )
    .unwrap()
});

static TEMP_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?P<a>-?\d+(?:\.\d+)?)\s*°?\s*(?P<ua>[FC]\b)?\s*(?:-|–|to)\s*(?P<b>-?\d+(?:\.\d+)?)\s*(?:(?:°|º)\s*(?P<ub1>[FC]\b)?|degrees?\s*(?P<ub2>fahrenheit|celsius|[FC]\b)?|(?P<ub3>[FC])\b)",
    )
    .unwrap()
});

static TEMP_SINGLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?P<qual>at or below|at or above|below|under|above|over|at least|no warmer than|no colder than|max(?:imum)?|min(?:imum)?)?\s*(?P<v>-?\d+(?:\.\d+)?)\s*(?:(?:°|º)\s*(?P<u1>[FC]\b)?|degrees?\s*(?P<u2>fahrenheit|celsius|[FC]\b)?|(?P<u3>[FC])\b)",
    )
    .unwrap()
});

fn unit_of(raw: Option<&str>) -> TemperatureUnit {
    match raw.map(|s| s.to_ascii_lowercase()) {
        Some(u) if u == "c" || u == "celsius" => TemperatureUnit::C,
        _ => TemperatureUnit::F,
    }
}

/// Parse an explicit temperature requirement.
///
/// Only numeric expressions count: "-10°F", "34-38F",
/// "between 34 and 38 degrees", "below 0 F". Words like "frozen" or
/// "keep cold" return `None`.
pub fn parse_temperature(text: &str) -> Option<TemperatureRequirement> {
    if let Some(c) = TEMP_BETWEEN.captures(text) {
        let a: f64 = c["a"].parse().ok()?;
        let b: f64 = c["b"].parse().ok()?;
        let unit = unit_of(c.name("ub").or(c.name("ua")).map(|m| m.as_str()));
        return Some(TemperatureRequirement {
            min: Some(a.min(b)),
            max: Some(a.max(b)),
            unit,
        });
    }

    if let Some(c) = TEMP_RANGE.captures(text) {
        let a: f64 = c["a"].parse().ok()?;
        let b: f64 = c["b"].parse().ok()?;
        let unit = unit_of(
            c.name("ub1")
                .or(c.name("ub2"))
                .or(c.name("ub3"))
                .or(c.name("ua"))
                .map(|m| m.as_str()),
        );
        // Keep the written order; min > max is for the validator to flag.
        return Some(TemperatureRequirement {
            min: Some(a),
            max: Some(b),
            unit,
        });
    }

    let c = TEMP_SINGLE.captures(text)?;
    let v: f64 = c["v"].parse().ok()?;
    let unit = unit_of(
        c.name("u1")
            .or(c.name("u2"))
            .or(c.name("u3"))
            .map(|m| m.as_str()),
    );
    let qual = c.name("qual").map(|m| m.as_str().to_ascii_lowercase());
    let (min, max) = match qual.as_deref() {
        Some("at or below" | "below" | "under" | "no warmer than" | "max" | "maximum") => {
            (None, Some(v))
        }
        Some("at or above" | "above" | "over" | "at least" | "no colder than" | "min" | "minimum") => {
            (Some(v), None)
        }
        _ => (Some(v), Some(v)),
    };
    Some(TemperatureRequirement { min, max, unit })
}

// ── Counts, classes, dimensions ─────────────────────────────────────

static PIECES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,5})\s*(?:pallets?|plts?|pieces?|pcs?|skids?|crates?|boxes|cartons?|units?|drums?|totes?|bundles?|coils?|cases?)\b",
    )
    .unwrap()
});

static FREIGHT_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:\bclass\s*)?\b(\d{2,3}(?:\.5)?)\b").unwrap());

static DIMENSIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(?P<l>-?\d+(?:\.\d+)?)\s*(?:x|by|\*|×)\s*(?P<w>-?\d+(?:\.\d+)?)(?:\s*(?:x|by|\*|×)\s*(?P<h>-?\d+(?:\.\d+)?))?\s*(?P<unit>inches|inch|in\b|"|feet|foot|ft\b|'|cm\b|m\b)?"#,
    )
    .unwrap()
});

/// Read a piece or pallet count ("24 pallets", or a bare "24").
pub fn parse_piece_count(text: &str) -> Option<u32> {
    if let Some(c) = PIECES.captures(text) {
        return c[1].parse().ok();
    }
    text.trim().parse().ok()
}

/// Read an NMFC-style freight class ("class 70", "92.5").
pub fn parse_freight_class(text: &str) -> Option<String> {
    FREIGHT_CLASS.captures(text).map(|c| c[1].to_string())
}

/// Read dimensions ("48x40x60 in", "20' x 8'").
pub fn parse_dimensions(text: &str) -> Option<Dimensions> {
    let c = DIMENSIONS.captures(text)?;
    let unit = c.name("unit").map(|m| match m.as_str().to_ascii_lowercase().as_str() {
        "\"" | "in" | "inch" | "inches" => "in".to_string(),
        "'" | "ft" | "foot" | "feet" => "ft".to_string(),
        other => other.to_string(),
    });
    Some(Dimensions {
        text: text.trim().to_string(),
        length: c["l"].parse().ok(),
        width: c["w"].parse().ok(),
        height: c.name("h").and_then(|m| m.as_str().parse().ok()),
        unit,
    })
}

// ── Hazmat ──────────────────────────────────────────────────────────

static HAZMAT_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:haz-?mat|hazardous(?:\s+materials?)?|dangerous\s+goods|placard(?:ed|s)?|flammable|corrosive|explosives?|oxidizers?|un\s?-?\d{4})\b",
    )
    .unwrap()
});

static UN_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(UN|NA)\s?-?(\d{4})\b").unwrap());

const NEGATIONS: &[&str] = &["non", "not", "no", "isn't", "without"];

/// Whether the text explicitly declares hazardous materials.
///
/// Negated mentions ("non-hazmat", "not hazardous", "no hazmat") don't count.
pub fn mentions_hazmat(text: &str) -> bool {
    HAZMAT_KEYWORD.find_iter(text).any(|m| {
        let before = text[..m.start()].to_ascii_lowercase();
        if before.ends_with("non-") {
            return false;
        }
        let previous = before.split_whitespace().next_back().unwrap_or("");
        !NEGATIONS.contains(&previous)
    })
}

/// Canonical "UN1203" form, or `None` if the text has no UN/NA number.
pub fn normalize_un_number(text: &str) -> Option<String> {
    UN_NUMBER
        .captures(text)
        .map(|c| format!("{}{}", c[1].to_ascii_uppercase(), &c[2]))
}

/// Lowercase, collapse whitespace, drop surrounding punctuation.
pub fn normalize_phrase(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
