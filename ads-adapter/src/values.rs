//! Value composition and persistence policy.
//!
//! Raw values are strings as delivered by the wire; composition turns
//! them into typed display values, and the DAQ policy decides which tags
//! a polling tick forwards to the persistence hook.

use serde_json::Value;

use crate::config::{TagConfig, TagType};
use crate::tags::Tag;
use crate::transport::RawWrite;

/// Compose the typed value of a tag from its raw string.
///
/// Numbers honor the tag's `format` as decimal rounding; a raw value
/// with no numeric prefix composes to `Null`.
pub fn compose_value(raw: &str, config: &TagConfig) -> Value {
    match config.tag_type {
        TagType::Number => match parse_float(raw) {
            Some(number) => {
                let rounded = match config.format {
                    Some(digits) => {
                        let factor = 10f64.powi(i32::from(digits));
                        (number * factor).round() / factor
                    }
                    None => number,
                };
                serde_json::Number::from_f64(rounded).map_or(Value::Null, Value::Number)
            }
            None => Value::Null,
        },
        TagType::Boolean => Value::Bool(is_truthy(raw)),
        TagType::String => Value::String(raw.to_owned()),
    }
}

/// Convert a user-entered value string into the raw shape to write.
///
/// Booleans actuate as integer `1`/`0`: anything other than an empty
/// string or a case-insensitive `"false"` is true.
pub fn raw_from_typed(tag_type: TagType, input: &str) -> RawWrite {
    match tag_type {
        TagType::Boolean => {
            let truthy = !input.is_empty() && !input.eq_ignore_ascii_case("false");
            RawWrite::Integer(i64::from(truthy))
        }
        TagType::Number => RawWrite::Number(parse_float(input).unwrap_or(f64::NAN)),
        TagType::String => RawWrite::Text(input.to_owned()),
    }
}

/// Whether a polling tick should hand this tag to the persistence hook.
pub fn should_persist(tag: &Tag, now_ms: i64) -> bool {
    let rule = &tag.config.daq;
    if !rule.enabled {
        return false;
    }
    if tag.changed && rule.change_on_save {
        return true;
    }
    rule.interval_ms > 0 && now_ms.saturating_sub(tag.last_persisted) >= rule.interval_ms as i64
}

/// Boolean reading of a raw display value: empty, `"0"` and a
/// case-insensitive `"false"` are false, everything else is true.
fn is_truthy(raw: &str) -> bool {
    let trimmed = raw.trim();
    !(trimmed.is_empty() || trimmed == "0" || trimmed.eq_ignore_ascii_case("false"))
}

/// `parseFloat` semantics: the longest numeric prefix of the trimmed
/// input, `None` when there is none.
fn parse_float(input: &str) -> Option<f64> {
    let candidate = numeric_prefix(input.trim());
    (1..=candidate.len())
        .rev()
        .find_map(|end| candidate[..end].parse::<f64>().ok())
}

/// Limit the candidate to sign, digit, dot and exponent characters so a
/// unit suffix like in `"12.5 bar"` cannot defeat prefix parsing. The
/// result is pure ASCII, slicing it at any index is safe.
fn numeric_prefix(input: &str) -> &str {
    let end = input
        .char_indices()
        .find(|&(idx, c)| {
            !(c.is_ascii_digit()
                || matches!(c, '.' | '+' | '-')
                || (matches!(c, 'e' | 'E') && idx > 0))
        })
        .map_or(input.len(), |(idx, _)| idx);
    &input[..end]
}
