//! OWL/RDF Turtle serialization of entities.
//!
//! Every entity becomes a subject `w:Q42` typed `wo:Item` or `wo:Property`.
//! Statements hang off `w:P31s` edges and are typed `wo:Statement`; their
//! main snak uses `w:P31v`, qualifiers `w:P31q`, and references are shared
//! `wo:Reference` nodes reached through `pv:wasDerivedFrom`. Time and
//! coordinate values get their own nodes (`VT...`, `VC...`) named by a hash
//! of the value.

use crate::consumer::EntityProcessor;
use crate::filter::EntityFilter;
use crate::models::{DataValue, EntityId, EntitySnapshot, GlobeCoordinate, Snak, Statement, TimeValue};
use crate::output::OutputSink;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use std::fmt::{Debug, Write as _};
use std::hash::Hasher;
use tracing::{debug, info, warn};

const PREFIXES: &str = "\
@prefix w: <http://www.wikidata.org/entity/> .
@prefix wo: <http://www.wikidata.org/ontology#> .
@prefix r: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .
@prefix rs: <http://www.w3.org/2000/01/rdf-schema#> .
@prefix o: <http://www.w3.org/2002/07/owl#> .
@prefix x: <http://www.w3.org/2001/XMLSchema#> .
@prefix so: <http://schema.org/> .
@prefix sk: <http://www.w3.org/2004/02/skos/core#> .
@prefix pv: <http://www.w3.org/ns/prov#> .
";

// Inlined so the output can be processed without resolving imports.
const ONTOLOGY_DECLARATIONS: &str = "
wo:propertyType\ta\to:ObjectProperty .
wo:globe\ta\to:ObjectProperty .
wo:latitude\ta\to:DatatypeProperty .
wo:longitude\ta\to:DatatypeProperty .
wo:altitude\ta\to:DatatypeProperty .
wo:gcPrecision\ta\to:DatatypeProperty .
wo:time\ta\to:DatatypeProperty .
wo:timePrecision\ta\to:DatatypeProperty .
wo:preferredCalendar\ta\to:ObjectProperty .
pv:wasDerivedFrom\ta\to:ObjectProperty .
so:about\ta\to:ObjectProperty .
so:inLanguage\ta\to:DatatypeProperty .
";

const FOOTER: &str = "\n\n ### Export completed successfully. The End. ###";

static TIME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([+-]?\d+)-(\d{2})-(\d{2})T").unwrap());

static PLAIN_LANGUAGE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]{2,3}$").unwrap());

/// Wikimedia language codes whose BCP 47 tag differs from the code itself.
const LANGUAGE_TAGS: &[(&str, &str)] = &[
    ("als", "gsw"),
    ("bat-smg", "sgs"),
    ("be-tarask", "be-tarask"),
    ("be-x-old", "be-tarask"),
    ("cbk-zam", "cbk-x-zam"),
    ("crh", "crh-Latn"),
    ("crh-latn", "crh-Latn"),
    ("de-at", "de-AT"),
    ("de-ch", "de-CH"),
    ("de-formal", "de-x-formal"),
    ("en-ca", "en-CA"),
    ("en-gb", "en-GB"),
    ("fiu-vro", "vro"),
    ("gan-hans", "gan-Hans"),
    ("gan-hant", "gan-Hant"),
    ("ike-cans", "ike-Cans"),
    ("ike-latn", "ike-Latn"),
    ("kk-arab", "kk-Arab"),
    ("kk-cn", "kk-CN"),
    ("kk-cyrl", "kk-Cyrl"),
    ("kk-kz", "kk-KZ"),
    ("kk-latn", "kk-Latn"),
    ("kk-tr", "kk-TR"),
    ("ksh", "mis-x-rip"),
    ("ku-arab", "ku-Arab"),
    ("ku-latn", "ku-Latn"),
    ("map-bms", "jv-x-bms"),
    ("nds-nl", "nds-NL"),
    ("nl-informal", "nl-x-informal"),
    ("nrm", "fr-x-nrm"),
    ("pt-br", "pt-BR"),
    ("roa-rup", "rup"),
    ("roa-tara", "it-x-tara"),
    ("simple", "en-x-simple"),
    ("sr-ec", "sr-Cyrl"),
    ("sr-el", "sr-Latn"),
    ("tg-latn", "tg-Latn"),
    ("tokipona", "mis-x-tokipona"),
    ("zh-classical", "lzh"),
    ("zh-cn", "zh-CN"),
    ("zh-hans", "zh-Hans"),
    ("zh-hant", "zh-Hant"),
    ("zh-hk", "zh-HK"),
    ("zh-min-nan", "nan"),
    ("zh-mo", "zh-MO"),
    ("zh-my", "zh-MY"),
    ("zh-sg", "zh-SG"),
    ("zh-tw", "zh-TW"),
    ("zh-yue", "yue"),
];

/// BCP 47 tag for a Wikimedia language code. Plain two and three letter
/// codes map to themselves; anything else must be listed.
pub fn language_tag(code: &str) -> Option<&str> {
    if let Some((_, tag)) = LANGUAGE_TAGS.iter().find(|(wm, _)| *wm == code) {
        return Some(*tag);
    }
    PLAIN_LANGUAGE_REGEX.is_match(code).then_some(code)
}

/// Property types that cannot always be told from a value, mostly
/// `commonsMedia` properties whose values look like plain strings.
const KNOWN_PROPERTY_TYPES: &[(u32, &str)] = &[
    (10, "commonsMedia"),
    (14, "commonsMedia"),
    (15, "commonsMedia"),
    (17, "wikibase-item"),
    (18, "commonsMedia"),
    (21, "wikibase-item"),
    (27, "wikibase-item"),
    (31, "wikibase-item"),
    (41, "commonsMedia"),
    (51, "commonsMedia"),
    (94, "commonsMedia"),
    (106, "wikibase-item"),
    (109, "commonsMedia"),
    (117, "commonsMedia"),
    (131, "wikibase-item"),
    (143, "wikibase-item"),
    (154, "commonsMedia"),
    (158, "commonsMedia"),
    (181, "commonsMedia"),
    (207, "commonsMedia"),
    (213, "string"),
    (214, "string"),
    (227, "string"),
    (242, "commonsMedia"),
    (244, "string"),
    (279, "wikibase-item"),
    (345, "string"),
    (367, "commonsMedia"),
    (368, "commonsMedia"),
    (373, "string"),
    (443, "commonsMedia"),
    (491, "commonsMedia"),
    (569, "time"),
    (570, "time"),
    (571, "time"),
    (574, "time"),
    (575, "time"),
    (576, "time"),
    (577, "time"),
    (578, "time"),
    (580, "time"),
    (582, "time"),
    (585, "time"),
    (606, "time"),
    (619, "time"),
    (620, "time"),
    (621, "time"),
    (622, "time"),
    (623, "commonsMedia"),
    (625, "globe-coordinate"),
    (626, "globe-coordinate"),
    (692, "commonsMedia"),
    (729, "time"),
    (730, "time"),
];

/// Default property type for a data value type.
fn datatype_for_value_type(value_type: &str) -> Option<&'static str> {
    match value_type {
        "wikibase-entityid" => Some("wikibase-item"),
        "string" => Some("string"),
        "time" => Some("time"),
        "globecoordinate" => Some("globe-coordinate"),
        _ => None,
    }
}

/// OWL range of the value property of a type. Only strings are literals.
fn owl_range(datatype: Option<&str>) -> &'static str {
    match datatype {
        Some("string") => "x:string",
        _ => "o:Thing",
    }
}

/// Property types learned while exporting, backed by a static table.
#[derive(Debug, Default)]
pub struct PropertyTypeCache {
    types: FxHashMap<u32, String>,
    /// Properties typed since the last declaration flush
    undeclared: Vec<u32>,
    static_hits: u64,
}

impl PropertyTypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, property: u32) -> Option<&str> {
        self.types
            .get(&property)
            .map(String::as_str)
            .or_else(|| Self::known(property))
    }

    fn known(property: u32) -> Option<&'static str> {
        KNOWN_PROPERTY_TYPES
            .iter()
            .find(|(p, _)| *p == property)
            .map(|(_, datatype)| *datatype)
    }

    /// Records the type of a property and returns the type in effect. The
    /// first type recorded wins. A `definite` type comes from the property
    /// entity itself; otherwise it was inferred from a value, and a string
    /// value defers to the static table since it may be a media file.
    pub fn record(&mut self, property: u32, datatype: &str, definite: bool) -> &str {
        let undeclared = &mut self.undeclared;
        let static_hits = &mut self.static_hits;
        self.types.entry(property).or_insert_with(|| {
            undeclared.push(property);
            if !definite && datatype == "string" {
                if let Some(known) = Self::known(property) {
                    *static_hits += 1;
                    return known.to_string();
                }
            }
            datatype.to_string()
        })
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn take_undeclared(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.undeclared)
    }
}

fn hash_name<T: Debug + ?Sized>(value: &T) -> String {
    let mut hasher = FxHasher::default();
    hasher.write(format!("{:?}", value).as_bytes());
    format!("{:x}", hasher.finish())
}

fn string_literal(value: &str) -> String {
    let mut literal = String::with_capacity(value.len() + 2);
    literal.push('"');
    for c in value.chars() {
        match c {
            '\\' => literal.push_str("\\\\"),
            '"' => literal.push_str("\\\""),
            '\n' => literal.push_str("\\n"),
            '\r' => literal.push_str("\\r"),
            c => literal.push(c),
        }
    }
    literal.push('"');
    literal
}

fn float_literal(value: f64) -> String {
    format!("\"{}\"^^x:float", value)
}

/// XSD literal for a Wikidata time, typed by precision: 11 is a day,
/// 10 a month, 9 and coarser a year.
pub fn time_literal(time: &str, precision: u8) -> String {
    let parsed = TIME_REGEX.captures(time).and_then(|caps| {
        let year: i64 = caps[1].parse().ok()?;
        Some((year, caps[2].to_string(), caps[3].to_string()))
    });
    let Some((mut year, month, day)) = parsed else {
        warn!(time, "Unexpected date format");
        return format!("\"{}\"^^x:dateTime", time);
    };

    // XSD has no year 0000 and reads -0001 as 1 BCE.
    if year == 0 {
        year = -1;
    } else if year < 0 && precision >= 9 {
        year -= 1;
    }
    let year = if year >= 0 {
        format!("{:04}", year)
    } else {
        format!("-{:04}", -year)
    };

    match precision {
        11 => format!("\"{}-{}-{}\"^^x:date", year, month, day),
        10 => format!("\"{}-{}\"^^x:gYearMonth", year, month),
        p if p <= 9 => format!("\"{}\"^^x:gYear", year),
        _ => {
            warn!(time, precision, "Unexpected time precision");
            format!("\"{}\"^^x:dateTime", time)
        }
    }
}

fn entity_local_name(value: &str) -> &str {
    value.rsplit('/').next().unwrap_or(value)
}

/// Local name of a statement node: the entity title, `S`, and the part of
/// the statement id after `$`.
fn statement_local_name(title: &str, statement: &Statement) -> String {
    let id = statement.id.as_str();
    let suffix = match memchr::memchr(b'$', id.as_bytes()) {
        Some(pos) => &id[pos + 1..],
        None => id,
    };
    format!("{}S{}", title, suffix)
}

/// Article URL prefix for a site key, if the site is a Wikipedia or
/// Wikivoyage.
fn article_url_prefix(site: &str) -> Option<(String, String)> {
    let (language, host) = if let Some(language) = site.strip_suffix("wikivoyage") {
        (language, "wikivoyage.org")
    } else if let Some(language) = site.strip_suffix("wiki") {
        (language, "wikipedia.org")
    } else {
        return None;
    };
    if language.is_empty() {
        return None;
    }
    let language = language.replace('_', "-");
    let prefix = format!("http://{}.{}/wiki/", language, host);
    Some((prefix, language))
}

/// Value nodes collected while writing one statement.
#[derive(Default)]
struct ValueNodes<'e> {
    times: Vec<(String, &'e TimeValue)>,
    coordinates: Vec<(String, &'e GlobeCoordinate)>,
}

/// Writes entities as OWL/RDF Turtle, honoring an [`EntityFilter`].
pub struct TurtleWriter<W: OutputSink> {
    out: W,
    filter: EntityFilter,
    filter_name: String,
    types: PropertyTypeCache,
    entities: u64,
    declared_properties: u64,
    incomplete_snaks: u64,
    closed: bool,
}

impl<W: OutputSink> TurtleWriter<W> {
    /// Creates the writer and writes the file header.
    pub fn new(mut out: W, filter: EntityFilter) -> Result<Self> {
        let filter_name = filter.hash_code();
        let mut header = String::from("### Wikidata OWL/RDF Turtle dump\n");
        let _ = writeln!(header, "# Filter settings ({})", filter_name);
        for line in filter.settings_info() {
            let _ = writeln!(header, "# - {}", line);
        }
        let _ = writeln!(header, "# Generated by wdkb {}\n###\n", env!("CARGO_PKG_VERSION"));
        header.push_str(PREFIXES);
        header.push_str(ONTOLOGY_DECLARATIONS);
        out.write_all(header.as_bytes())
            .context("Failed to write Turtle header")?;

        Ok(Self {
            out,
            filter,
            filter_name,
            types: PropertyTypeCache::new(),
            entities: 0,
            declared_properties: 0,
            incomplete_snaks: 0,
            closed: false,
        })
    }

    pub fn entities(&self) -> u64 {
        self.entities
    }

    pub fn property_types(&self) -> &PropertyTypeCache {
        &self.types
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_entity(&mut self, title: &str, is_item: bool, snapshot: &EntitySnapshot) -> String {
        let mut buf = String::with_capacity(1024);
        let class = if is_item { "wo:Item" } else { "wo:Property" };
        let _ = write!(buf, "\nw:{}\n\ta\t{}", title, class);

        if let Some(datatype) = &snapshot.datatype {
            if let Some(entity) = EntityId::from_title(title) {
                self.types.record(entity.number, datatype, true);
            }
            let type_node = match datatype.as_str() {
                "wikibase-item" => Some("wo:propertyTypeItem"),
                "string" => Some("wo:propertyTypeString"),
                "commonsMedia" => Some("wo:propertyTypeCommonsMedia"),
                "time" => Some("wo:propertyTypeTime"),
                "globe-coordinate" => Some("wo:propertyTypeGlobeCoordinates"),
                _ => None,
            };
            match type_node {
                Some(node) => {
                    let _ = write!(buf, " ;\n\two:propertyType\t{}", node);
                }
                None => warn!(title, datatype = datatype.as_str(), "Unknown property type"),
            }
        }

        self.write_language_literals(&mut buf, "rs:label", &snapshot.label);
        self.write_language_literals(&mut buf, "so:description", &snapshot.description);
        self.write_alias_literals(&mut buf, &snapshot.aliases);

        let mut statements = Vec::new();
        if self.filter.include_statements() {
            let mut current_property = None;
            for statement in &snapshot.claims {
                let datatype = self.statement_datatype(statement);
                if !self.filter.include_property_type(datatype.as_deref()) {
                    continue;
                }
                let local_name = statement_local_name(title, statement);
                let property = statement.main.property();
                if current_property == Some(property) {
                    let _ = write!(buf, ",w:{}", local_name);
                } else {
                    current_property = Some(property);
                    let _ = write!(buf, " ;\n\tw:P{}s\tw:{}", property, local_name);
                }
                statements.push((statement, local_name));
            }
        }
        buf.push_str(" .\n");

        let mut references: Vec<(String, &Vec<Snak>)> = Vec::new();
        let mut seen_references = FxHashSet::default();
        for (statement, local_name) in &statements {
            self.write_statement(&mut buf, local_name, *statement, &mut |key, reference| {
                if seen_references.insert(key.clone()) {
                    references.push((key, reference));
                }
            });
        }

        if self.filter.include_references() {
            for (key, reference) in references {
                let _ = write!(buf, "\nw:{}\n\ta\two:Reference", key);
                let mut values = ValueNodes::default();
                for snak in reference {
                    let prop = format!("w:P{}r", snak.property());
                    self.write_snak(&mut buf, &prop, snak, &mut values);
                }
                buf.push_str(" .\n");
                write_value_nodes(&mut buf, &values);
            }
        }

        for (site, link) in &snapshot.links {
            if !self.filter.include_site(site) {
                continue;
            }
            let Some((prefix, language)) = article_url_prefix(site) else {
                debug!(site = site.as_str(), "Site key not understood");
                continue;
            };
            let _ = write!(
                buf,
                "\n<{}{}>\n\ta\tso:Article ;\n\tso:about\tw:{}",
                prefix,
                urlencoding::encode(&link.name.replace(' ', "_")),
                title
            );
            match language_tag(&language) {
                Some(tag) => {
                    let _ = write!(buf, " ;\n\tso:inLanguage\t\"{}\"", tag);
                }
                None => debug!(site = site.as_str(), "Language unknown for site"),
            }
            buf.push_str(" .\n");
        }

        self.write_property_declarations(&mut buf);
        buf
    }

    fn write_language_literals(
        &self,
        buf: &mut String,
        prop: &str,
        literals: &std::collections::BTreeMap<String, String>,
    ) {
        let mut first = true;
        for (lang, value) in literals {
            let Some(tag) = self.accepted_language(lang) else {
                continue;
            };
            if first {
                let _ = write!(buf, " ;\n\t{}\t", prop);
                first = false;
            } else {
                buf.push(',');
            }
            let _ = write!(buf, "{}@{}", string_literal(value), tag);
        }
    }

    fn write_alias_literals(
        &self,
        buf: &mut String,
        aliases: &std::collections::BTreeMap<String, Vec<String>>,
    ) {
        let mut first = true;
        for (lang, values) in aliases {
            if values.is_empty() {
                continue;
            }
            let Some(tag) = self.accepted_language(lang) else {
                continue;
            };
            for value in values {
                if first {
                    buf.push_str(" ;\n\tsk:altLabel\t");
                    first = false;
                } else {
                    buf.push(',');
                }
                let _ = write!(buf, "{}@{}", string_literal(value), tag);
            }
        }
    }

    fn accepted_language<'l>(&self, lang: &'l str) -> Option<&'l str> {
        if !self.filter.include_language(lang) {
            return None;
        }
        language_tag(lang)
    }

    /// Type of the main snak's property, recording it on the way.
    fn statement_datatype(&mut self, statement: &Statement) -> Option<String> {
        match &statement.main {
            Snak::Value { property, value } => datatype_for_value_type(value.value_type())
                .map(|datatype| self.types.record(*property, datatype, false).to_string()),
            other => self.types.get(other.property()).map(str::to_string),
        }
    }

    fn write_statement<'e>(
        &mut self,
        buf: &mut String,
        local_name: &str,
        statement: &'e Statement,
        collect_reference: &mut dyn FnMut(String, &'e Vec<Snak>),
    ) {
        let mut values = ValueNodes::default();
        let _ = write!(buf, "\nw:{}\n\ta\two:Statement", local_name);
        let main = format!("w:P{}v", statement.main.property());
        self.write_snak(buf, &main, &statement.main, &mut values);
        for qualifier in &statement.qualifiers {
            let prop = format!("w:P{}q", qualifier.property());
            self.write_snak(buf, &prop, qualifier, &mut values);
        }

        if self.filter.include_references() {
            for reference in &statement.references {
                let key = format!("R{}", hash_name(reference));
                let _ = write!(buf, " ;\n\tpv:wasDerivedFrom\tw:{}", key);
                collect_reference(key, reference);
            }
        }
        buf.push_str(" .\n");
        write_value_nodes(buf, &values);
    }

    /// Writes one snak under the given property name. Snaks that cannot be
    /// expressed, or whose type is filtered out, mark the subject as
    /// `wo:IncompletelyExported`.
    fn write_snak<'e>(
        &mut self,
        buf: &mut String,
        prop: &str,
        snak: &'e Snak,
        values: &mut ValueNodes<'e>,
    ) {
        let property = snak.property();
        let included = match snak {
            Snak::Value { value, .. } => {
                let datatype = datatype_for_value_type(value.value_type())
                    .map(|datatype| self.types.record(property, datatype, false).to_string());
                if self.filter.include_property_type(datatype.as_deref()) {
                    write_value(buf, prop, datatype.as_deref(), value, values)
                } else {
                    false
                }
            }
            Snak::SomeValue { .. } => {
                let datatype = self.types.get(property);
                if self.filter.include_property_type(datatype) {
                    let _ = write!(
                        buf,
                        " ;\n\ta\t[ a o:Restriction; o:onProperty {}; o:someValuesFrom {} ]",
                        prop,
                        owl_range(datatype)
                    );
                    true
                } else {
                    false
                }
            }
            Snak::NoValue { .. } => {
                let datatype = self.types.get(property);
                if self.filter.include_property_type(datatype) {
                    let range = match owl_range(datatype) {
                        "o:Thing" => "o:Thing",
                        _ => "rs:Literal",
                    };
                    let _ = write!(
                        buf,
                        " ;\n\ta\t[ a o:Class; o:complementOf [ a o:Restriction; o:onProperty {}; o:someValuesFrom {} ] ]",
                        prop, range
                    );
                    true
                } else {
                    false
                }
            }
            Snak::Unsupported { .. } => false,
        };

        if !included {
            self.incomplete_snaks += 1;
            buf.push_str(" ;\n\ta\two:IncompletelyExported");
        }
    }

    fn write_property_declarations(&mut self, buf: &mut String) {
        for property in self.types.take_undeclared() {
            let kind = match owl_range(self.types.get(property)) {
                "o:Thing" => "o:ObjectProperty",
                _ => "o:DatatypeProperty",
            };
            let _ = write!(buf, "\nw:P{}s\ta\to:ObjectProperty .", property);
            for suffix in ['v', 'r', 'q'] {
                let _ = write!(buf, "\nw:P{}{}\ta\t{} .", property, suffix, kind);
            }
            buf.push('\n');
            self.declared_properties += 1;
        }
    }
}

/// Writes a value snak and returns whether its value could be expressed.
fn write_value<'e>(
    buf: &mut String,
    prop: &str,
    datatype: Option<&str>,
    value: &'e DataValue,
    values: &mut ValueNodes<'e>,
) -> bool {
    match (datatype, value) {
        (
            Some("wikibase-item"),
            DataValue::EntityId {
                entity_type,
                numeric_id,
            },
        ) => {
            let prefix = if entity_type == "property" { 'P' } else { 'Q' };
            let _ = write!(buf, " ;\n\t{}\tw:{}{}", prop, prefix, numeric_id);
        }
        (Some("commonsMedia"), DataValue::String(file)) => {
            let _ = write!(
                buf,
                " ;\n\t{}\t<http://commons.wikimedia.org/wiki/File:{}>",
                prop,
                urlencoding::encode(&file.replace(' ', "_"))
            );
        }
        (Some("string"), DataValue::String(s)) => {
            let _ = write!(buf, " ;\n\t{}\t{}", prop, string_literal(s));
        }
        (Some("time"), DataValue::Time(time)) => {
            let key = format!("VT{}", hash_name(time));
            let _ = write!(buf, " ;\n\t{}\tw:{}", prop, key);
            if !values.times.iter().any(|(k, _)| *k == key) {
                values.times.push((key, time));
            }
        }
        (Some("globe-coordinate"), DataValue::GlobeCoordinate(coord)) => {
            let key = format!("VC{}", hash_name(coord));
            let _ = write!(buf, " ;\n\t{}\tw:{}", prop, key);
            if !values.coordinates.iter().any(|(k, _)| *k == key) {
                values.coordinates.push((key, coord));
            }
        }
        _ => {
            debug!(
                prop,
                value_type = value.value_type(),
                "Unsupported value snak"
            );
            return false;
        }
    }
    true
}

fn write_value_nodes(buf: &mut String, values: &ValueNodes<'_>) {
    for (key, time) in &values.times {
        let _ = write!(
            buf,
            "\nw:{}\n\ta\two:TimeValue ;\n\two:time\t{} ;\n\two:timePrecision\t\"{}\"^^x:int ;\n\two:preferredCalendar\tw:{} .\n",
            key,
            time_literal(&time.time, time.precision),
            time.precision,
            entity_local_name(&time.calendar_model)
        );
    }
    for (key, coord) in &values.coordinates {
        let _ = write!(
            buf,
            "\nw:{}\n\ta\two:GlobeCoordinatesValue ;\n\two:latitude\t{} ;\n\two:longitude\t{}",
            key,
            float_literal(coord.latitude),
            float_literal(coord.longitude)
        );
        if let Some(altitude) = coord.altitude {
            let _ = write!(buf, " ;\n\two:altitude\t{}", float_literal(altitude));
        }
        if let Some(precision) = coord.precision {
            let _ = write!(buf, " ;\n\two:gcPrecision\t{}", float_literal(precision));
        }
        if let Some(globe) = &coord.globe {
            let _ = write!(buf, " ;\n\two:globe\tw:{}", entity_local_name(globe));
        }
        buf.push_str(" .\n");
    }
}

impl<W: OutputSink> EntityProcessor for TurtleWriter<W> {
    fn process_entity(
        &mut self,
        title: &str,
        _revision: u64,
        is_item: bool,
        snapshot: &EntitySnapshot,
    ) -> Result<()> {
        let turtle = self.write_entity(title, is_item, snapshot);
        self.out
            .write_all(turtle.as_bytes())
            .with_context(|| format!("Failed to write Turtle data of {}", title))?;
        self.entities += 1;
        Ok(())
    }

    fn log_report(&self) {
        info!(
            filter = self.filter_name.as_str(),
            entities = self.entities,
            properties = self.declared_properties,
            incomplete_snaks = self.incomplete_snaks,
            static_type_hits = self.types.static_hits,
            "Serialized entities in Turtle"
        );
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.out
                .write_all(FOOTER.as_bytes())
                .context("Failed to write Turtle footer")?;
            self.out.finish().context("Failed to finish Turtle output")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::parse_snapshot;

    fn export(filter: EntityFilter, entities: &[(&str, bool, &str)]) -> String {
        let mut writer = TurtleWriter::new(Vec::new(), filter).unwrap();
        for (title, is_item, content) in entities {
            let snapshot = parse_snapshot(content).unwrap().snapshot;
            writer.process_entity(title, 1, *is_item, &snapshot).unwrap();
        }
        writer.close().unwrap();
        String::from_utf8(writer.into_inner()).unwrap()
    }

    #[test]
    fn language_tags() {
        assert_eq!(language_tag("en"), Some("en"));
        assert_eq!(language_tag("zh-hans"), Some("zh-Hans"));
        assert_eq!(language_tag("simple"), Some("en-x-simple"));
        assert_eq!(language_tag("xx-unknown"), None);
    }

    #[test]
    fn time_literals() {
        assert_eq!(
            time_literal("+00000001952-03-11T00:00:00Z", 11),
            "\"1952-03-11\"^^x:date"
        );
        assert_eq!(
            time_literal("+00000001952-03-00T00:00:00Z", 10),
            "\"1952-03\"^^x:gYearMonth"
        );
        assert_eq!(time_literal("+00000000000-01-01T00:00:00Z", 9), "\"-0001\"^^x:gYear");
        assert_eq!(time_literal("-00000000044-03-15T00:00:00Z", 11), "\"-0045-03-15\"^^x:date");
        assert_eq!(time_literal("-00000010000-00-00T00:00:00Z", 6), "\"-10000\"^^x:gYear");
        assert_eq!(time_literal("garbage", 11), "\"garbage\"^^x:dateTime");
    }

    #[test]
    fn statement_local_names() {
        let snapshot = parse_snapshot(
            r#"{"claims":[{"m":["novalue",40],"q":[],"refs":[],"g":"q42$ABC-1","rank":1}]}"#,
        )
        .unwrap()
        .snapshot;
        assert_eq!(statement_local_name("Q42", &snapshot.claims[0]), "Q42SABC-1");
    }

    #[test]
    fn header_and_footer() {
        let text = export(EntityFilter::new(), &[]);
        assert!(text.starts_with("### Wikidata OWL/RDF Turtle dump\n# Filter settings ("));
        assert!(text.contains("# - Languages: *\n"));
        assert!(text.contains("@prefix w: <http://www.wikidata.org/entity/> .\n"));
        assert!(text.contains("\nso:inLanguage\ta\to:DatatypeProperty .\n"));
        assert!(text.ends_with(FOOTER));
    }

    #[test]
    fn writes_item_with_statements() {
        let content = r#"{"label":{"en":"Douglas \"DNA\" Adams","xx-bogus":"?"},"aliases":{"en":["DNA"],"de":[]},"links":{"enwiki":{"name":"Douglas Adams","badges":[]}},"claims":[{"m":["value",31,"wikibase-entityid",{"entity-type":"item","numeric-id":5}],"q":[],"refs":[[["value",143,"wikibase-entityid",{"entity-type":"item","numeric-id":328}]]],"g":"q42$a","rank":1},{"m":["value",31,"wikibase-entityid",{"entity-type":"item","numeric-id":6}],"q":[],"refs":[[["value",143,"wikibase-entityid",{"entity-type":"item","numeric-id":328}]]],"g":"q42$b","rank":1},{"m":["value",569,"time",{"time":"+00000001952-03-11T00:00:00Z","timezone":0,"before":0,"after":0,"precision":11,"calendarmodel":"http://www.wikidata.org/entity/Q1985727"}],"q":[],"refs":[],"g":"q42$c","rank":1}]}"#;
        let text = export(EntityFilter::new(), &[("Q42", true, content)]);

        assert!(text.contains(
            "\nw:Q42\n\ta\two:Item ;\n\trs:label\t\"Douglas \\\"DNA\\\" Adams\"@en ;\n\tsk:altLabel\t\"DNA\"@en ;\n\tw:P31s\tw:Q42Sa,w:Q42Sb ;\n\tw:P569s\tw:Q42Sc .\n"
        ));
        assert!(text.contains("\nw:Q42Sa\n\ta\two:Statement ;\n\tw:P31v\tw:Q5 ;\n\tpv:wasDerivedFrom\tw:R"));
        assert_eq!(text.matches("\ta\two:Reference ;\n\tw:P143r\tw:Q328 .\n").count(), 1);
        assert!(text.contains("\two:time\t\"1952-03-11\"^^x:date ;\n\two:timePrecision\t\"11\"^^x:int ;\n\two:preferredCalendar\tw:Q1985727 .\n"));
        assert!(text.contains(
            "\n<http://en.wikipedia.org/wiki/Douglas_Adams>\n\ta\tso:Article ;\n\tso:about\tw:Q42 ;\n\tso:inLanguage\t\"en\" .\n"
        ));
        assert!(text.contains("\nw:P31s\ta\to:ObjectProperty .\nw:P31v\ta\to:ObjectProperty ."));
        assert!(!text.contains("xx-bogus"));
    }

    #[test]
    fn writes_property_and_uses_its_type() {
        let property = r#"{"label":{"en":"image"},"datatype":"commonsMedia"}"#;
        let item = r#"{"claims":[{"m":["value",999,"string","Douglas adams portrait.jpg"],"q":[],"refs":[],"g":"q42$x","rank":1},{"m":["somevalue",999],"q":[],"refs":[],"g":"q42$y","rank":1}]}"#;
        let text = export(
            EntityFilter::new(),
            &[("P999", false, property), ("Q42", true, item)],
        );

        assert!(text.contains("\nw:P999\n\ta\two:Property ;\n\two:propertyType\two:propertyTypeCommonsMedia ;\n\trs:label\t\"image\"@en .\n"));
        assert!(text.contains(
            "\tw:P999v\t<http://commons.wikimedia.org/wiki/File:Douglas_adams_portrait.jpg>"
        ));
        assert!(text.contains("[ a o:Restriction; o:onProperty w:P999v; o:someValuesFrom o:Thing ]"));
        assert_eq!(text.matches("\nw:P999s\ta\to:ObjectProperty .").count(), 1);
    }

    #[test]
    fn string_values_and_novalue() {
        let item = r#"{"claims":[{"m":["value",214,"string","113230702"],"q":[],"refs":[],"g":"q42$v","rank":1},{"m":["novalue",214],"q":[],"refs":[],"g":"q42$w","rank":1}]}"#;
        let text = export(EntityFilter::new(), &[("Q42", true, item)]);
        assert!(text.contains("\tw:P214v\t\"113230702\""));
        assert!(text.contains("o:complementOf [ a o:Restriction; o:onProperty w:P214v; o:someValuesFrom rs:Literal ] ]"));
        assert!(text.contains("\nw:P214v\ta\to:DatatypeProperty ."));
    }

    #[test]
    fn unsupported_values_are_marked_incomplete() {
        let item = r#"{"claims":[{"m":["value",1082,"quantity",{"amount":"+5"}],"q":[],"refs":[],"g":"q1$q","rank":1}]}"#;
        let text = export(EntityFilter::new(), &[("Q1", true, item)]);
        assert!(text.contains("\nw:Q1Sq\n\ta\two:Statement ;\n\ta\two:IncompletelyExported .\n"));
    }

    #[test]
    fn unknown_qualifier_keeps_main_snak() {
        let item = r#"{"claims":[{"m":["value",31,"wikibase-entityid",{"entity-type":"item","numeric-id":5}],"q":[["weird",17]],"refs":[],"g":"q1$w","rank":1}]}"#;
        let text = export(EntityFilter::new(), &[("Q1", true, item)]);
        assert!(text.contains(
            "\nw:Q1Sw\n\ta\two:Statement ;\n\tw:P31v\tw:Q5 ;\n\ta\two:IncompletelyExported .\n"
        ));
    }

    #[test]
    fn filter_restricts_output() {
        let item = r#"{"label":{"en":"Berlin","de":"Berlin"},"links":{"dewiki":{"name":"Berlin","badges":[]},"enwiki":{"name":"Berlin","badges":[]}},"claims":[{"m":["value",625,"globecoordinate",{"latitude":52.5,"longitude":13.4,"altitude":null,"precision":0.1,"globe":"http://www.wikidata.org/entity/Q2"}],"q":[],"refs":[[["value",143,"wikibase-entityid",{"entity-type":"item","numeric-id":328}]]],"g":"q64$g","rank":1}]}"#;

        let filter = EntityFilter::new()
            .with_languages(Some(["de"]))
            .with_sites(Some(["dewiki"]))
            .with_references(false);
        let text = export(filter, &[("Q64", true, item)]);
        assert!(text.contains("\trs:label\t\"Berlin\"@de ;"));
        assert!(!text.contains("@en"));
        assert!(text.contains("<http://de.wikipedia.org/wiki/Berlin>"));
        assert!(!text.contains("en.wikipedia.org"));
        assert!(!text.contains("wo:Reference"));
        assert!(text.contains("\two:latitude\t\"52.5\"^^x:float ;\n\two:longitude\t\"13.4\"^^x:float ;\n\two:gcPrecision\t\"0.1\"^^x:float ;\n\two:globe\tw:Q2 .\n"));

        let no_statements = export(
            EntityFilter::new().with_statements(false),
            &[("Q64", true, item)],
        );
        assert!(!no_statements.contains("wo:Statement"));
    }

    #[test]
    fn property_type_cache() {
        let mut types = PropertyTypeCache::new();
        assert_eq!(types.get(18), Some("commonsMedia"));
        assert_eq!(types.get(123456), None);
        assert_eq!(types.record(18, "string", false), "commonsMedia");
        assert_eq!(types.record(5000, "string", false), "string");
        assert_eq!(types.record(5000, "time", true), "string");
        assert_eq!(types.len(), 2);
        assert_eq!(types.take_undeclared(), vec![18, 5000]);
        assert!(types.take_undeclared().is_empty());
    }
}
