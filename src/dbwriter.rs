use crate::config::DB_PRESERVED_LANGUAGE;
use crate::consumer::EntityProcessor;
use crate::models::{DataValue, EntityId, EntitySnapshot, Rank, SiteLink, Snak, Statement};
use crate::store::{EntityRecord, EntityStore};
use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::info;

/// Raw JSON form of a data value, as found in the dumps.
pub fn data_value_json(value: &DataValue) -> Value {
    match value {
        DataValue::EntityId {
            entity_type,
            numeric_id,
        } => json!({ "entity-type": entity_type, "numeric-id": numeric_id }),
        DataValue::String(s) => Value::String(s.clone()),
        DataValue::Time(time) => json!({
            "time": time.time,
            "timezone": time.timezone,
            "before": time.before,
            "after": time.after,
            "precision": time.precision,
            "calendarmodel": time.calendar_model,
        }),
        DataValue::GlobeCoordinate(coord) => json!({
            "latitude": coord.latitude,
            "longitude": coord.longitude,
            "altitude": coord.altitude,
            "precision": coord.precision,
            "globe": coord.globe,
        }),
        DataValue::Other { value, .. } => value.clone(),
    }
}

/// Compact tuple form of a snak: `R` for item references, `S` for strings,
/// `T` for times; anything else keeps the dump's positional form.
pub fn compact_snak(snak: &Snak) -> Value {
    match snak {
        Snak::Value { property, value } => match value {
            DataValue::EntityId {
                entity_type,
                numeric_id,
            } if entity_type == "item" => json!(["R", property, numeric_id]),
            DataValue::String(s) => json!(["S", property, s]),
            DataValue::Time(time) => {
                let calendar = time
                    .calendar_model
                    .rsplit('/')
                    .next()
                    .unwrap_or_default();
                json!([
                    "T",
                    property,
                    time.precision,
                    time.time,
                    time.timezone,
                    calendar,
                    time.after,
                    time.before
                ])
            }
            other => json!(["value", property, other.value_type(), data_value_json(other)]),
        },
        Snak::SomeValue { property } => json!(["somevalue", property]),
        Snak::NoValue { property } => json!(["novalue", property]),
        Snak::Unsupported { raw, .. } => raw.clone(),
    }
}

/// Drops statement ids and default (normal) ranks, and omits empty
/// qualifier and reference lists.
pub fn compact_claims(claims: &[Statement]) -> Value {
    let compact = claims
        .iter()
        .map(|statement| {
            let mut claim = Map::new();
            claim.insert("m".to_string(), compact_snak(&statement.main));
            if !statement.qualifiers.is_empty() {
                let qualifiers = statement.qualifiers.iter().map(compact_snak).collect();
                claim.insert("q".to_string(), Value::Array(qualifiers));
            }
            if !statement.references.is_empty() {
                let references = statement
                    .references
                    .iter()
                    .map(|reference| Value::Array(reference.iter().map(compact_snak).collect()))
                    .collect();
                claim.insert("refs".to_string(), Value::Array(references));
            }
            if statement.rank != Rank::Normal {
                claim.insert("rank".to_string(), json!(statement.rank.code()));
            }
            Value::Object(claim)
        })
        .collect();
    Value::Array(compact)
}

/// Keeps the value of `keep` and replaces all other languages with `1`.
pub fn reduce_languages<T: serde::Serialize>(map: &BTreeMap<String, T>, keep: &str) -> Value {
    let reduced: Map<String, Value> = map
        .iter()
        .map(|(lang, value)| {
            let value = if lang == keep {
                serde_json::to_value(value).unwrap_or(Value::Null)
            } else {
                json!(1)
            };
            (lang.clone(), value)
        })
        .collect();
    Value::Object(reduced)
}

fn links_json(links: &BTreeMap<String, SiteLink>) -> Value {
    let links: Map<String, Value> = links
        .iter()
        .map(|(site, link)| {
            let value = if link.badges.is_empty() {
                Value::String(link.name.clone())
            } else {
                json!({ "name": link.name, "badges": link.badges })
            };
            (site.clone(), value)
        })
        .collect();
    Value::Object(links)
}

#[derive(Default)]
struct SizeCounts {
    claims: usize,
    links: usize,
    labels: usize,
    aliases: usize,
    descriptions: usize,
}

/// Stores a reduced form of every entity in the relational store.
pub struct DatabaseWriter<'s> {
    store: &'s mut dyn EntityStore,
    language: String,
    entities: u64,
    sizes: SizeCounts,
}

impl<'s> DatabaseWriter<'s> {
    pub fn new(store: &'s mut dyn EntityStore) -> Self {
        Self {
            store,
            language: DB_PRESERVED_LANGUAGE.to_string(),
            entities: 0,
            sizes: SizeCounts::default(),
        }
    }

    pub fn entities(&self) -> u64 {
        self.entities
    }

    pub fn reduce(&self, entity: EntityId, revision: u64, snapshot: &EntitySnapshot) -> EntityRecord {
        EntityRecord {
            entity,
            revision,
            claims: compact_claims(&snapshot.claims).to_string(),
            links: entity
                .kind
                .is_item()
                .then(|| links_json(&snapshot.links).to_string()),
            datatype: if entity.kind.is_item() {
                None
            } else {
                snapshot.datatype.clone()
            },
            label: reduce_languages(&snapshot.label, &self.language).to_string(),
            aliases: reduce_languages(&snapshot.aliases, &self.language).to_string(),
            description: reduce_languages(&snapshot.description, &self.language).to_string(),
        }
    }
}

impl EntityProcessor for DatabaseWriter<'_> {
    fn process_entity(
        &mut self,
        title: &str,
        revision: u64,
        _is_item: bool,
        snapshot: &EntitySnapshot,
    ) -> Result<()> {
        let entity = EntityId::from_title(title)
            .with_context(|| format!("Not an entity title: {:?}", title))?;
        let record = self.reduce(entity, revision, snapshot);

        self.sizes.claims += record.claims.len();
        self.sizes.links += record.links.as_ref().map_or(0, String::len);
        self.sizes.labels += record.label.len();
        self.sizes.aliases += record.aliases.len();
        self.sizes.descriptions += record.description.len();

        self.store.upsert_entity(&record)?;
        self.entities += 1;
        Ok(())
    }

    fn log_report(&self) {
        info!(
            entities = self.entities,
            claims = self.sizes.claims,
            aliases = self.sizes.aliases,
            labels = self.sizes.labels,
            links = self.sizes.links,
            descriptions = self.sizes.descriptions,
            "Database writer sizes (chars)"
        );
    }

    fn close(&mut self) -> Result<()> {
        self.store.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::parse_snapshot;
    use crate::store::SqliteStore;

    const DOUGLAS: &str = r#"{"label":{"en":"Douglas Adams","de":"Douglas Adams"},"aliases":{"en":["DNA"],"fr":["D. Adams"]},"links":{"enwiki":"Douglas Adams","frwiki":{"name":"Douglas Adams","badges":["Q17437796"]}},"claims":[{"m":["value",31,"wikibase-entityid",{"entity-type":"item","numeric-id":5}],"q":[],"refs":[[["value",143,"wikibase-entityid",{"entity-type":"item","numeric-id":328}]]],"g":"q42$1","rank":1},{"m":["value",569,"time",{"time":"+00000001952-03-11T00:00:00Z","timezone":0,"before":0,"after":0,"precision":11,"calendarmodel":"http://www.wikidata.org/entity/Q1985727"}],"q":[["value",1480,"string","circa"]],"refs":[],"g":"q42$2","rank":2},{"m":["novalue",40],"q":[],"refs":[],"g":"q42$3","rank":0}]}"#;

    #[test]
    fn compacts_claims() {
        let snapshot = parse_snapshot(DOUGLAS).unwrap().snapshot;
        assert_eq!(
            compact_claims(&snapshot.claims).to_string(),
            concat!(
                r#"[{"m":["R",31,5],"refs":[[["R",143,328]]]},"#,
                r#"{"m":["T",569,11,"+00000001952-03-11T00:00:00Z",0,"Q1985727",0,0],"q":[["S",1480,"circa"]],"rank":2},"#,
                r#"{"m":["novalue",40],"rank":0}]"#
            )
        );
    }

    #[test]
    fn property_references_keep_positional_form() {
        let snak = Snak::Value {
            property: 1659,
            value: DataValue::EntityId {
                entity_type: "property".to_string(),
                numeric_id: 31,
            },
        };
        assert_eq!(
            compact_snak(&snak).to_string(),
            r#"["value",1659,"wikibase-entityid",{"entity-type":"property","numeric-id":31}]"#
        );
    }

    #[test]
    fn reduces_languages() {
        let snapshot = parse_snapshot(DOUGLAS).unwrap().snapshot;
        assert_eq!(
            reduce_languages(&snapshot.label, "en").to_string(),
            r#"{"de":1,"en":"Douglas Adams"}"#
        );
        assert_eq!(
            reduce_languages(&snapshot.aliases, "en").to_string(),
            r#"{"en":["DNA"],"fr":1}"#
        );
    }

    #[test]
    fn stores_items_and_properties() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        {
            let mut writer = DatabaseWriter::new(&mut store);
            let item = parse_snapshot(DOUGLAS).unwrap().snapshot;
            writer.process_entity("Q42", 100, true, &item).unwrap();

            let property = parse_snapshot(r#"{"label":{"en":"instance of"},"datatype":"wikibase-item"}"#)
                .unwrap()
                .snapshot;
            let record = writer.reduce(EntityId::property(31), 7, &property);
            assert_eq!(record.datatype.as_deref(), Some("wikibase-item"));
            assert!(record.links.is_none());
            writer.process_entity("P31", 7, false, &property).unwrap();

            assert!(writer.process_entity("Wikidata:Sandbox", 1, true, &item).is_err());
            writer.close().unwrap();
            assert_eq!(writer.entities(), 2);
        }
        assert_eq!(store.current_revision(EntityId::item(42)).unwrap(), Some(100));
        assert_eq!(store.current_revision(EntityId::property(31)).unwrap(), Some(7));
    }

    #[test]
    fn links_keep_badges() {
        let snapshot = parse_snapshot(DOUGLAS).unwrap().snapshot;
        assert_eq!(
            links_json(&snapshot.links).to_string(),
            r#"{"enwiki":"Douglas Adams","frwiki":{"badges":["Q17437796"],"name":"Douglas Adams"}}"#
        );
    }
}
