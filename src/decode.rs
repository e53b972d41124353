use crate::models::{
    DataValue, EntitySnapshot, GlobeCoordinate, Rank, SiteLink, Snak, Statement, TimeValue,
};
use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Result of parsing one payload. Statements that could not be decoded are
/// dropped and reported in `skipped`.
pub struct ParsedSnapshot {
    pub snapshot: EntitySnapshot,
    pub skipped: Vec<anyhow::Error>,
}

/// Decodes revision payloads, caching the most recent one by revision id.
#[derive(Default)]
pub struct RevisionDecoder {
    cached: Option<(u64, EntitySnapshot)>,
    parse_count: u64,
    failures: u64,
}

impl RevisionDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unparseable payloads decode to an empty snapshot; `title` is only
    /// used for diagnostics.
    pub fn decode(&mut self, rev_id: u64, raw: &str, title: &str) -> &EntitySnapshot {
        let hit = matches!(&self.cached, Some((id, _)) if *id == rev_id);
        if !hit {
            self.parse_count += 1;
            let snapshot = match parse_snapshot(raw) {
                Ok(parsed) => {
                    for error in &parsed.skipped {
                        warn!(title, rev = rev_id, error = %error, "Skipping undecodable statement");
                    }
                    parsed.snapshot
                }
                Err(e) => {
                    self.failures += 1;
                    warn!(title, rev = rev_id, error = %e, "Unparseable revision payload, using empty entity data");
                    EntitySnapshot::default()
                }
            };
            self.cached = Some((rev_id, snapshot));
        }
        let (_, snapshot) = self
            .cached
            .get_or_insert_with(|| (rev_id, EntitySnapshot::default()));
        snapshot
    }

    /// Number of payloads actually parsed (cache misses).
    pub fn parse_count(&self) -> u64 {
        self.parse_count
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }
}

pub fn parse_snapshot(raw: &str) -> Result<ParsedSnapshot> {
    let value: Value = serde_json::from_str(raw).context("Revision payload is not valid JSON")?;
    let obj = value
        .as_object()
        .context("Revision payload is not a JSON object")?;

    let mut skipped = Vec::new();
    let mut claims = Vec::new();
    match obj.get("claims") {
        None | Some(Value::Null) => {}
        Some(Value::Array(list)) => {
            for (pos, claim) in list.iter().enumerate() {
                match parse_statement(claim) {
                    Ok(statement) => claims.push(statement),
                    Err(e) => skipped.push(e.context(format!("claim #{}", pos))),
                }
            }
        }
        Some(other) => bail!("Unexpected claims value: {}", other),
    }

    let datatype = match obj.get("datatype") {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };

    Ok(ParsedSnapshot {
        snapshot: EntitySnapshot {
            claims,
            label: parse_term_map(obj.get("label")).context("Invalid labels")?,
            description: parse_term_map(obj.get("description"))
                .context("Invalid descriptions")?,
            aliases: parse_alias_map(obj.get("aliases")).context("Invalid aliases")?,
            links: parse_links(obj.get("links")).context("Invalid site links")?,
            datatype,
        },
        skipped,
    })
}

/// Keyed containers may be missing, `null`, or an empty list (how PHP
/// serializes an empty map); all of those mean "empty".
fn as_keyed(value: Option<&Value>) -> Result<Option<&Map<String, Value>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(list)) if list.is_empty() => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(other) => bail!("Expected an object, found {}", other),
    }
}

fn term_text(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get("value").and_then(Value::as_str),
        _ => None,
    }
}

fn parse_term_map(value: Option<&Value>) -> Result<BTreeMap<String, String>> {
    let mut terms = BTreeMap::new();
    if let Some(map) = as_keyed(value)? {
        for (lang, text) in map {
            if text.is_null() {
                continue;
            }
            let text = term_text(text)
                .with_context(|| format!("Term for {:?} is not a string", lang))?;
            terms.insert(lang.clone(), text.to_string());
        }
    }
    Ok(terms)
}

fn parse_alias_map(value: Option<&Value>) -> Result<BTreeMap<String, Vec<String>>> {
    let mut aliases = BTreeMap::new();
    if let Some(map) = as_keyed(value)? {
        for (lang, list) in map {
            let texts: Vec<&Value> = match list {
                Value::Null => continue,
                Value::Array(items) => items.iter().collect(),
                Value::Object(items) => items.values().collect(),
                other => bail!("Aliases for {:?} are not a list: {}", lang, other),
            };
            let mut names = Vec::with_capacity(texts.len());
            for text in texts {
                let text = term_text(text)
                    .with_context(|| format!("Alias for {:?} is not a string", lang))?;
                names.push(text.to_string());
            }
            aliases.insert(lang.clone(), names);
        }
    }
    Ok(aliases)
}

fn parse_links(value: Option<&Value>) -> Result<BTreeMap<String, SiteLink>> {
    let mut links = BTreeMap::new();
    if let Some(map) = as_keyed(value)? {
        for (site, link) in map {
            let link = match link {
                Value::Null => continue,
                Value::String(name) => SiteLink {
                    name: name.clone(),
                    badges: Vec::new(),
                },
                Value::Object(fields) => SiteLink {
                    name: fields
                        .get("name")
                        .and_then(Value::as_str)
                        .with_context(|| format!("Site link {:?} has no name", site))?
                        .to_string(),
                    badges: fields
                        .get("badges")
                        .and_then(Value::as_array)
                        .map(|badges| {
                            badges
                                .iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                },
                other => bail!("Unexpected site link for {:?}: {}", site, other),
            };
            links.insert(site.clone(), link);
        }
    }
    Ok(links)
}

fn parse_statement(value: &Value) -> Result<Statement> {
    let obj = value.as_object().context("Statement is not an object")?;
    let main = parse_snak(obj.get("m").context("Statement has no main snak")?)?;

    let qualifiers = match obj.get("q") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(snaks)) => snaks.iter().map(parse_snak).collect::<Result<_>>()?,
        Some(other) => bail!("Unexpected qualifiers: {}", other),
    };

    let references = match obj.get("refs") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(refs)) => refs
            .iter()
            .map(|reference| match reference {
                Value::Array(snaks) => snaks.iter().map(parse_snak).collect::<Result<Vec<_>>>(),
                other => bail!("Unexpected reference: {}", other),
            })
            .collect::<Result<_>>()?,
        Some(other) => bail!("Unexpected references: {}", other),
    };

    Ok(Statement {
        main,
        qualifiers,
        references,
        rank: parse_rank(obj.get("rank"))?,
        id: obj
            .get("g")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn parse_rank(value: Option<&Value>) -> Result<Rank> {
    let rank = match value {
        None | Some(Value::Null) => Rank::Normal,
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => Rank::Deprecated,
            Some(1) => Rank::Normal,
            Some(2) => Rank::Preferred,
            _ => bail!("Unknown rank {}", n),
        },
        Some(Value::String(s)) => match s.as_str() {
            "deprecated" => Rank::Deprecated,
            "normal" => Rank::Normal,
            "preferred" => Rank::Preferred,
            _ => bail!("Unknown rank {:?}", s),
        },
        Some(other) => bail!("Unknown rank {}", other),
    };
    Ok(rank)
}

fn as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_i64(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
        Some(Value::String(s)) => s.parse().unwrap_or_default(),
        _ => 0,
    }
}

fn as_f64(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// Snaks are positional tuples: `[kind, property, value type?, value?]`.
/// Snaks with a readable property id but an unknown kind or a malformed
/// value become [`Snak::Unsupported`]; only snaks without a property id
/// are errors.
pub fn parse_snak(value: &Value) -> Result<Snak> {
    let parts = value.as_array().context("Snak is not a list")?;
    let property = parts
        .get(1)
        .and_then(as_u32)
        .with_context(|| format!("Snak has no property id: {}", value))?;

    match parse_snak_parts(parts, property) {
        Ok(snak) => Ok(snak),
        Err(e) => {
            debug!(property, error = %format!("{:#}", e), "Keeping unsupported snak");
            Ok(Snak::Unsupported {
                property,
                raw: value.clone(),
            })
        }
    }
}

fn parse_snak_parts(parts: &[Value], property: u32) -> Result<Snak> {
    let kind = parts
        .first()
        .and_then(Value::as_str)
        .context("Snak has no kind")?;
    match kind {
        "value" => {
            let value_type = parts
                .get(2)
                .and_then(Value::as_str)
                .context("Value snak has no value type")?;
            let raw = parts.get(3).context("Value snak has no value")?;
            Ok(Snak::Value {
                property,
                value: parse_data_value(value_type, raw)?,
            })
        }
        "somevalue" => Ok(Snak::SomeValue { property }),
        "novalue" => Ok(Snak::NoValue { property }),
        other => bail!("Unknown snak kind {:?}", other),
    }
}

fn parse_data_value(value_type: &str, raw: &Value) -> Result<DataValue> {
    let value = match value_type {
        "wikibase-entityid" => {
            let obj = raw.as_object().context("Entity id value is not an object")?;
            DataValue::EntityId {
                entity_type: obj
                    .get("entity-type")
                    .and_then(Value::as_str)
                    .unwrap_or("item")
                    .to_string(),
                numeric_id: obj
                    .get("numeric-id")
                    .and_then(|n| match n {
                        Value::Number(n) => n.as_u64(),
                        Value::String(s) => s.parse().ok(),
                        _ => None,
                    })
                    .context("Entity id value has no numeric id")?,
            }
        }
        "string" => DataValue::String(
            raw.as_str()
                .context("String value is not a string")?
                .to_string(),
        ),
        "time" => {
            let obj = raw.as_object().context("Time value is not an object")?;
            DataValue::Time(TimeValue {
                time: obj
                    .get("time")
                    .and_then(Value::as_str)
                    .context("Time value has no time")?
                    .to_string(),
                timezone: as_i64(obj.get("timezone")),
                before: as_i64(obj.get("before")),
                after: as_i64(obj.get("after")),
                precision: u8::try_from(as_i64(obj.get("precision")))
                    .context("Time precision out of range")?,
                calendar_model: obj
                    .get("calendarmodel")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        }
        "globecoordinate" => {
            let obj = raw
                .as_object()
                .context("Coordinate value is not an object")?;
            DataValue::GlobeCoordinate(GlobeCoordinate {
                latitude: as_f64(obj.get("latitude")).context("Coordinate has no latitude")?,
                longitude: as_f64(obj.get("longitude")).context("Coordinate has no longitude")?,
                altitude: as_f64(obj.get("altitude")),
                precision: as_f64(obj.get("precision")),
                globe: obj.get("globe").and_then(Value::as_str).map(str::to_string),
            })
        }
        other => DataValue::Other {
            value_type: other.to_string(),
            value: raw.clone(),
        },
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOUGLAS: &str = r#"{"label":{"en":"Douglas Adams","de":"Douglas Adams"},"description":{"en":"English writer"},"aliases":{"en":["DNA","Douglas Noel Adams"]},"links":{"enwiki":{"name":"Douglas Adams","badges":[]},"dewiki":"Douglas Adams"},"entity":["item",42],"claims":[{"m":["value",31,"wikibase-entityid",{"entity-type":"item","numeric-id":5}],"q":[],"g":"q42$F078E5B3-F9A8-480E-B7AC-D97778CBBEF9","rank":1,"refs":[[["value",143,"wikibase-entityid",{"entity-type":"item","numeric-id":328}]]]},{"m":["value",569,"time",{"time":"+00000001952-03-11T00:00:00Z","timezone":0,"before":0,"after":0,"precision":11,"calendarmodel":"http://www.wikidata.org/entity/Q1985727"}],"q":[["somevalue",580]],"g":"q42$2","rank":2,"refs":[]}]}"#;

    #[test]
    fn parses_terms_and_links() {
        let snapshot = parse_snapshot(DOUGLAS).unwrap().snapshot;
        assert_eq!(snapshot.label["en"], "Douglas Adams");
        assert_eq!(snapshot.description["en"], "English writer");
        assert_eq!(snapshot.aliases["en"], vec!["DNA", "Douglas Noel Adams"]);
        assert_eq!(snapshot.links["enwiki"].name, "Douglas Adams");
        assert_eq!(snapshot.links["dewiki"].name, "Douglas Adams");
        assert!(snapshot.datatype.is_none());
    }

    #[test]
    fn parses_statements() {
        let snapshot = parse_snapshot(DOUGLAS).unwrap().snapshot;
        assert_eq!(snapshot.claims.len(), 2);

        let first = &snapshot.claims[0];
        assert_eq!(
            first.main,
            Snak::Value {
                property: 31,
                value: DataValue::EntityId {
                    entity_type: "item".to_string(),
                    numeric_id: 5
                }
            }
        );
        assert_eq!(first.rank, Rank::Normal);
        assert_eq!(first.references.len(), 1);
        assert_eq!(first.references[0][0].property(), 143);
        assert!(first.id.starts_with("q42$"));

        let second = &snapshot.claims[1];
        assert_eq!(second.rank, Rank::Preferred);
        assert_eq!(second.qualifiers, vec![Snak::SomeValue { property: 580 }]);
        match &second.main {
            Snak::Value {
                value: DataValue::Time(time),
                ..
            } => {
                assert_eq!(time.precision, 11);
                assert_eq!(time.time, "+00000001952-03-11T00:00:00Z");
            }
            other => panic!("unexpected main snak {:?}", other),
        }
    }

    #[test]
    fn missing_containers_default_to_empty() {
        let snapshot = parse_snapshot(r#"{"label":{"en":"x"}}"#).unwrap().snapshot;
        assert!(snapshot.claims.is_empty());
        assert!(snapshot.aliases.is_empty());
        assert!(snapshot.description.is_empty());
        assert!(snapshot.links.is_empty());
    }

    #[test]
    fn null_and_empty_list_containers() {
        let raw = r#"{"label":[],"description":null,"aliases":[],"links":null,"claims":null}"#;
        let snapshot = parse_snapshot(raw).unwrap().snapshot;
        assert_eq!(snapshot, EntitySnapshot::default());
    }

    #[test]
    fn property_datatype() {
        let raw = r#"{"label":{"en":"instance of"},"datatype":"wikibase-item"}"#;
        let snapshot = parse_snapshot(raw).unwrap().snapshot;
        assert_eq!(snapshot.datatype.as_deref(), Some("wikibase-item"));
    }

    #[test]
    fn snak_without_property_skips_statement() {
        let raw = r#"{"claims":[{"m":["bogus"],"g":"a"},{"m":["novalue",17],"g":"b"}]}"#;
        let parsed = parse_snapshot(raw).unwrap();
        assert_eq!(parsed.skipped.len(), 1);
        assert_eq!(parsed.snapshot.claims.len(), 1);
        assert_eq!(parsed.snapshot.claims[0].main, Snak::NoValue { property: 17 });
    }

    #[test]
    fn unknown_snak_kind_keeps_statement() {
        let raw = r#"{"claims":[{"m":["value",31,"wikibase-entityid",{"entity-type":"item","numeric-id":5}],"q":[["weird",17]],"refs":[[["value",143,"time","not a time"]]],"g":"q1$a","rank":1}]}"#;
        let parsed = parse_snapshot(raw).unwrap();
        assert!(parsed.skipped.is_empty());
        assert_eq!(parsed.snapshot.claims.len(), 1);

        let statement = &parsed.snapshot.claims[0];
        assert_eq!(statement.main.property(), 31);
        assert_eq!(
            statement.qualifiers,
            vec![Snak::Unsupported {
                property: 17,
                raw: serde_json::json!(["weird", 17]),
            }]
        );
        assert!(matches!(
            statement.references[0][0],
            Snak::Unsupported { property: 143, .. }
        ));
    }

    #[test]
    fn unknown_value_type_is_kept() {
        let snak = parse_snak(&serde_json::json!(["value", 856, "url", "http://x"])).unwrap();
        match snak {
            Snak::Value {
                value: DataValue::Other { value_type, .. },
                ..
            } => assert_eq!(value_type, "url"),
            other => panic!("unexpected snak {:?}", other),
        }
    }

    #[test]
    fn invalid_payload_is_error() {
        assert!(parse_snapshot("{not json").is_err());
        assert!(parse_snapshot("[1,2]").is_err());
        assert!(parse_snapshot(r#"{"label":"en"}"#).is_err());
    }

    #[test]
    fn decoder_caches_by_revision() {
        let mut decoder = RevisionDecoder::new();
        let first = decoder.decode(100, DOUGLAS, "Q42").clone();
        let second = decoder.decode(100, DOUGLAS, "Q42").clone();
        assert_eq!(first, second);
        assert_eq!(decoder.parse_count(), 1);

        decoder.decode(101, r#"{"label":{"en":"other"}}"#, "Q42");
        assert_eq!(decoder.parse_count(), 2);
        decoder.decode(100, DOUGLAS, "Q42");
        assert_eq!(decoder.parse_count(), 3);
    }

    #[test]
    fn decoder_falls_back_to_empty() {
        let mut decoder = RevisionDecoder::new();
        let snapshot = decoder.decode(7, "garbage", "Q1");
        assert_eq!(*snapshot, EntitySnapshot::default());
        assert_eq!(decoder.failures(), 1);
    }
}
