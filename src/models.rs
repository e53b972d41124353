use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntityKind {
    Item,
    Property,
}

impl EntityKind {
    pub fn prefix(self) -> char {
        match self {
            EntityKind::Item => 'Q',
            EntityKind::Property => 'P',
        }
    }

    pub fn is_item(self) -> bool {
        matches!(self, EntityKind::Item)
    }
}

/// Items and properties are numbered independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EntityId {
    pub kind: EntityKind,
    pub number: u32,
}

impl EntityId {
    pub fn item(number: u32) -> Self {
        Self {
            kind: EntityKind::Item,
            number,
        }
    }

    pub fn property(number: u32) -> Self {
        Self {
            kind: EntityKind::Property,
            number,
        }
    }

    /// Parses a short title such as `Q42` or `P31`.
    pub fn from_title(title: &str) -> Option<Self> {
        let kind = match title.as_bytes().first()? {
            b'Q' => EntityKind::Item,
            b'P' => EntityKind::Property,
            _ => return None,
        };
        let digits = &title[1..];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            kind,
            number: digits.parse().ok()?,
        })
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.number)
    }
}

/// Header of a page block as announced to revision consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBlock {
    /// Short title (`Q42`, `P31`); the `Property:` namespace is stripped.
    pub title: String,
    pub entity: EntityId,
    /// True if no block of this entity was seen before in this run
    pub is_new: bool,
}

impl PageBlock {
    pub fn is_item(&self) -> bool {
        self.entity.kind.is_item()
    }
}

/// One revision as delivered by the scanner. Borrowed from the scanner's
/// buffers and only valid for the duration of the callback.
#[derive(Debug, Clone, Copy)]
pub struct Revision<'a> {
    pub id: u64,
    /// MediaWiki timestamp, e.g. `2013-05-01T12:34:56Z`
    pub timestamp: &'a str,
    pub user: &'a str,
    pub is_anonymous: bool,
    /// Entity-unescaped JSON payload
    pub content: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Rank {
    Deprecated,
    Normal,
    Preferred,
}

impl Rank {
    pub fn code(self) -> u8 {
        match self {
            Rank::Deprecated => 0,
            Rank::Normal => 1,
            Rank::Preferred => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeValue {
    pub time: String,
    pub timezone: i64,
    pub before: i64,
    pub after: i64,
    /// 11: day, 10: month, 9: year, 8: decade, ..., 0: 10^9 years
    pub precision: u8,
    pub calendar_model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobeCoordinate {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub precision: Option<f64>,
    pub globe: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DataValue {
    EntityId {
        entity_type: String,
        numeric_id: u64,
    },
    String(String),
    Time(TimeValue),
    GlobeCoordinate(GlobeCoordinate),
    /// Value types without a dedicated representation
    Other {
        value_type: String,
        value: serde_json::Value,
    },
}

impl DataValue {
    pub fn value_type(&self) -> &str {
        match self {
            DataValue::EntityId { .. } => "wikibase-entityid",
            DataValue::String(_) => "string",
            DataValue::Time(_) => "time",
            DataValue::GlobeCoordinate(_) => "globecoordinate",
            DataValue::Other { value_type, .. } => value_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Snak {
    Value { property: u32, value: DataValue },
    SomeValue { property: u32 },
    NoValue { property: u32 },
    /// A snak of unknown kind or shape, kept as found so the fact can be
    /// reported as incompletely exported.
    Unsupported { property: u32, raw: serde_json::Value },
}

impl Snak {
    pub fn property(&self) -> u32 {
        match self {
            Snak::Value { property, .. }
            | Snak::SomeValue { property }
            | Snak::NoValue { property }
            | Snak::Unsupported { property, .. } => *property,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub main: Snak,
    pub qualifiers: Vec<Snak>,
    pub references: Vec<Vec<Snak>>,
    pub rank: Rank,
    /// Globally unique statement id (`q42$5a8f...`)
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteLink {
    pub name: String,
    pub badges: Vec<String>,
}

/// Decoded content of one entity revision. All containers are present even
/// when the payload omits them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntitySnapshot {
    pub claims: Vec<Statement>,
    pub label: BTreeMap<String, String>,
    pub description: BTreeMap<String, String>,
    pub aliases: BTreeMap<String, Vec<String>>,
    pub links: BTreeMap<String, SiteLink>,
    pub datatype: Option<String>,
}

impl EntitySnapshot {
    pub fn alias_count(&self) -> usize {
        self.aliases.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_from_title() {
        assert_eq!(EntityId::from_title("Q42"), Some(EntityId::item(42)));
        assert_eq!(EntityId::from_title("P31"), Some(EntityId::property(31)));
        assert_eq!(EntityId::from_title("Qu123"), None);
        assert_eq!(EntityId::from_title("Q"), None);
        assert_eq!(EntityId::from_title("L1"), None);
    }

    #[test]
    fn entity_id_display() {
        assert_eq!(EntityId::item(64).to_string(), "Q64");
        assert_eq!(EntityId::property(18).to_string(), "P18");
    }

    #[test]
    fn snak_property() {
        let snak = Snak::Value {
            property: 31,
            value: DataValue::String("x".to_string()),
        };
        assert_eq!(snak.property(), 31);
        assert_eq!(Snak::NoValue { property: 7 }.property(), 7);
    }

    #[test]
    fn default_snapshot_is_empty() {
        let snapshot = EntitySnapshot::default();
        assert!(snapshot.claims.is_empty());
        assert!(snapshot.aliases.is_empty());
        assert_eq!(snapshot.alias_count(), 0);
        assert!(snapshot.datatype.is_none());
    }
}
