//! Runtime tag state and the address → tags subscription map.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::TagConfig;

/// Runtime record for one logical tag.
///
/// `raw_value` is written by notification handling, `value` and `changed`
/// are derived by the polling tick.
#[derive(Debug, Clone)]
pub struct Tag {
    pub config: TagConfig,
    /// Stringified raw payload as last delivered, `None` until the first
    /// notification arrives.
    pub raw_value: Option<String>,
    /// Typed value composed from `raw_value` on the last polling tick.
    pub value: Value,
    /// Timestamp of the last notification, ms since the unix epoch.
    pub timestamp: i64,
    /// Edge-triggered change marker, consumed by the next polling tick.
    pub changed: bool,
    /// When this tag was last handed to the persistence hook.
    pub last_persisted: i64,
}

impl Tag {
    pub fn new(config: TagConfig) -> Self {
        Self {
            config,
            raw_value: None,
            value: Value::Null,
            timestamp: 0,
            changed: false,
            last_persisted: 0,
        }
    }
}

/// Tag table keyed by tag id.
pub type TagTable = BTreeMap<String, Tag>;

/// Build a tag table from configured tags.
pub fn build_table<I>(configs: I) -> TagTable
where
    I: IntoIterator<Item = TagConfig>,
{
    configs
        .into_iter()
        .map(|config| (config.id.clone(), Tag::new(config)))
        .collect()
}

/// Maps each distinct device address to the tags sharing it.
///
/// Rebuilt from the current tag table on every load and every successful
/// connect, so it can never hold stale entries.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionMap {
    by_address: BTreeMap<String, Vec<String>>,
}

impl SubscriptionMap {
    pub fn rebuild(table: &TagTable) -> Self {
        let mut by_address: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for tag in table.values() {
            by_address
                .entry(tag.config.address.clone())
                .or_default()
                .push(tag.config.id.clone());
        }
        Self { by_address }
    }

    /// Distinct addresses to subscribe, in stable order.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.by_address.keys().map(String::as_str)
    }

    pub fn tags_for(&self, address: &str) -> &[String] {
        self.by_address
            .get(address)
            .map_or(&[], |ids| ids.as_slice())
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

/// Record a notification payload into every tag mapped to `address`.
///
/// The raw value is the stringified payload; for tags with a
/// `mem_address`, the named sub-field of the structured payload. The
/// `changed` flag uses raw string comparison: a payload that round-trips
/// to an identical string is not a change even if its type differs.
pub fn apply_notification(
    table: &mut TagTable,
    map: &SubscriptionMap,
    address: &str,
    payload: &Value,
    timestamp: i64,
) {
    for id in map.tags_for(address) {
        let Some(tag) = table.get_mut(id) else {
            continue;
        };
        let raw = match &tag.config.mem_address {
            Some(key) => match structured_field(payload, key) {
                Some(sub) => stringify(&sub),
                // Missing sub-field: keep the previous state untouched.
                None => continue,
            },
            None => stringify(payload),
        };
        let old = tag.raw_value.take();
        tag.changed = old.as_deref() != Some(raw.as_str());
        tag.raw_value = Some(raw);
        tag.timestamp = timestamp;
    }
}

/// Stringify a payload the way the wire delivered it: string payloads
/// verbatim, everything else in JSON text form.
fn stringify(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Look up `key` in a structured payload, accepting either a JSON object
/// or a string that itself holds serialized JSON.
fn structured_field(payload: &Value, key: &str) -> Option<Value> {
    match payload {
        Value::Object(fields) => fields.get(key).cloned(),
        Value::String(text) => serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|parsed| parsed.get(key).cloned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TagType;
    use serde_json::json;

    fn tag_config(id: &str, address: &str) -> TagConfig {
        TagConfig {
            id: id.into(),
            name: id.into(),
            address: address.into(),
            mem_address: None,
            tag_type: TagType::Number,
            format: None,
            daq: Default::default(),
        }
    }

    #[test]
    fn two_tags_sharing_an_address_both_update() {
        let mut table = build_table([tag_config("T1", "MAIN.s"), tag_config("T2", "MAIN.s")]);
        let map = SubscriptionMap::rebuild(&table);
        assert_eq!(map.len(), 1);

        apply_notification(&mut table, &map, "MAIN.s", &json!(7), 1000);
        for id in ["T1", "T2"] {
            let tag = &table[id];
            assert_eq!(tag.raw_value.as_deref(), Some("7"));
            assert_eq!(tag.timestamp, 1000);
            assert!(tag.changed);
        }
    }

    #[test]
    fn identical_payload_is_not_a_change() {
        let mut table = build_table([tag_config("T1", "MAIN.s")]);
        let map = SubscriptionMap::rebuild(&table);

        apply_notification(&mut table, &map, "MAIN.s", &json!(7), 1000);
        assert!(table["T1"].changed);

        apply_notification(&mut table, &map, "MAIN.s", &json!(7), 2000);
        let tag = &table["T1"];
        assert!(!tag.changed);
        assert_eq!(tag.timestamp, 2000);
    }

    #[test]
    fn notification_for_unmapped_address_is_ignored() {
        let mut table = build_table([tag_config("T1", "MAIN.s")]);
        let map = SubscriptionMap::rebuild(&table);

        apply_notification(&mut table, &map, "MAIN.other", &json!(1), 1000);
        assert_eq!(table["T1"].raw_value, None);
    }

    #[test]
    fn mem_address_extracts_sub_field() {
        let mut config = tag_config("T1", "MAIN.stats");
        config.mem_address = Some("temp".into());
        let mut table = build_table([config]);
        let map = SubscriptionMap::rebuild(&table);

        apply_notification(
            &mut table,
            &map,
            "MAIN.stats",
            &json!({ "temp": 21.5, "rpm": 900 }),
            1000,
        );
        assert_eq!(table["T1"].raw_value.as_deref(), Some("21.5"));
    }

    #[test]
    fn mem_address_reads_serialized_json_payloads() {
        let mut config = tag_config("T1", "MAIN.stats");
        config.mem_address = Some("rpm".into());
        let mut table = build_table([config]);
        let map = SubscriptionMap::rebuild(&table);

        apply_notification(
            &mut table,
            &map,
            "MAIN.stats",
            &json!(r#"{"temp":21.5,"rpm":900}"#),
            1000,
        );
        assert_eq!(table["T1"].raw_value.as_deref(), Some("900"));
    }

    #[test]
    fn missing_sub_field_keeps_previous_raw_value() {
        let mut config = tag_config("T1", "MAIN.stats");
        config.mem_address = Some("temp".into());
        let mut table = build_table([config]);
        let map = SubscriptionMap::rebuild(&table);

        apply_notification(&mut table, &map, "MAIN.stats", &json!({ "temp": 20 }), 1000);
        apply_notification(&mut table, &map, "MAIN.stats", &json!({ "rpm": 900 }), 2000);
        let tag = &table["T1"];
        assert_eq!(tag.raw_value.as_deref(), Some("20"));
        // Nothing was recorded, so the first notification's state stands.
        assert_eq!(tag.timestamp, 1000);
    }
}
