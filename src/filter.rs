use rustc_hash::FxHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

/// Selects which parts of an entity an exporter writes. `None` for a set
/// means everything is included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityFilter {
    languages: Option<BTreeSet<String>>,
    sites: Option<BTreeSet<String>>,
    property_types: Option<BTreeSet<String>>,
    statements: bool,
    references: bool,
}

impl Default for EntityFilter {
    fn default() -> Self {
        Self {
            languages: None,
            sites: None,
            property_types: None,
            statements: true,
            references: true,
        }
    }
}

fn to_set<I, S>(values: Option<I>) -> Option<BTreeSet<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    values.map(|values| values.into_iter().map(Into::into).collect())
}

fn describe(set: &Option<BTreeSet<String>>) -> String {
    match set {
        None => "*".to_string(),
        Some(values) => format!("[{}]", values.iter().cloned().collect::<Vec<_>>().join(", ")),
    }
}

impl EntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_languages<I, S>(mut self, languages: Option<I>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = to_set(languages);
        self
    }

    pub fn with_sites<I, S>(mut self, sites: Option<I>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sites = to_set(sites);
        self
    }

    pub fn with_property_types<I, S>(mut self, types: Option<I>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.property_types = to_set(types);
        self
    }

    pub fn with_statements(mut self, include: bool) -> Self {
        self.statements = include;
        self
    }

    pub fn with_references(mut self, include: bool) -> Self {
        self.references = include;
        self
    }

    pub fn include_language(&self, lang: &str) -> bool {
        self.languages.as_ref().is_none_or(|set| set.contains(lang))
    }

    pub fn include_site(&self, site: &str) -> bool {
        self.sites.as_ref().is_none_or(|set| set.contains(site))
    }

    /// An unknown type (`None`) only passes an unrestricted filter.
    pub fn include_property_type(&self, datatype: Option<&str>) -> bool {
        match &self.property_types {
            None => true,
            Some(set) => datatype.is_some_and(|datatype| set.contains(datatype)),
        }
    }

    pub fn include_statements(&self) -> bool {
        self.statements
    }

    pub fn include_references(&self) -> bool {
        self.references
    }

    /// Human readable description of the settings, one line per setting.
    pub fn settings_info(&self) -> Vec<String> {
        vec![
            format!("Languages: {}", describe(&self.languages)),
            format!("Sites: {}", describe(&self.sites)),
            format!("Property types: {}", describe(&self.property_types)),
            format!("Statements: {}", self.statements),
            format!("References: {}", self.references),
        ]
    }

    /// Short hex code identifying the settings, stable across runs.
    pub fn hash_code(&self) -> String {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        format!("{:x}", hasher.finish())
    }
}
