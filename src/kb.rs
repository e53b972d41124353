//! Writer for the compact KB text format.
//!
//! One fact per line, terminated by ` .`:
//!
//! ```text
//! P31 type wikibase-item .
//! Q42 label {en:Douglas Adams} .
//! Q42 link {enwiki:Douglas Adams} .
//! Q42 P69 Q691283 (
//!   P582 time(+00000001974-01-01T00:00:00Z,9,Q1985727) ,
//!   reference {
//!     P143 Q328 ,
//!   },
//!  ) .
//! ```

use crate::consumer::EntityProcessor;
use crate::models::{DataValue, EntitySnapshot, Snak};
use crate::output::OutputSink;
use anyhow::{Context, Result};
use std::io::Write;
use tracing::info;

fn push_property(out: &mut String, property: u32) {
    out.push('P');
    out.push_str(itoa::Buffer::new().format(property));
}

/// Text form of a snak. Somevalue is `+`, novalue `-`, and values of
/// unsupported types `*`.
pub fn snak_to_text(snak: &Snak) -> String {
    let mut out = String::with_capacity(24);
    push_property(&mut out, snak.property());
    out.push(' ');
    match snak {
        Snak::Value { value, .. } => match value {
            DataValue::EntityId {
                entity_type,
                numeric_id,
            } => {
                out.push(if entity_type == "property" { 'P' } else { 'Q' });
                out.push_str(itoa::Buffer::new().format(*numeric_id));
            }
            DataValue::String(s) => {
                out.push('{');
                out.push_str(s);
                out.push('}');
            }
            DataValue::Time(time) => {
                let calendar = time.calendar_model.rsplit('/').next().unwrap_or_default();
                out.push_str(&format!(
                    "time({},{},{})",
                    time.time, time.precision, calendar
                ));
            }
            DataValue::GlobeCoordinate(coord) => {
                out.push_str(&format!("coord({},{}", coord.latitude, coord.longitude));
                if let Some(precision) = coord.precision {
                    out.push_str(&format!(",{}", precision));
                }
                out.push(')');
            }
            DataValue::Other { .. } => out.push('*'),
        },
        Snak::SomeValue { .. } => out.push('+'),
        Snak::NoValue { .. } => out.push('-'),
        Snak::Unsupported { .. } => out.push('*'),
    }
    out
}

/// Writes every entity in KB syntax.
pub struct KbWriter<W: OutputSink> {
    out: W,
    entities: u64,
    closed: bool,
}

impl<W: OutputSink> KbWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            entities: 0,
            closed: false,
        }
    }

    pub fn entities(&self) -> u64 {
        self.entities
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_entity(&mut self, title: &str, snapshot: &EntitySnapshot) -> std::io::Result<()> {
        let out = &mut self.out;
        if let Some(datatype) = &snapshot.datatype {
            writeln!(out, "{} type {} .", title, datatype)?;
        }
        for (lang, label) in &snapshot.label {
            writeln!(out, "{} label {{{}:{}}} .", title, lang, label)?;
        }
        for (lang, description) in &snapshot.description {
            writeln!(out, "{} description {{{}:{}}} .", title, lang, description)?;
        }
        for (site, link) in &snapshot.links {
            writeln!(out, "{} link {{{}:{}}} .", title, site, link.name)?;
        }
        for (lang, aliases) in &snapshot.aliases {
            for alias in aliases {
                writeln!(out, "{} alias {{{}:{}}} .", title, lang, alias)?;
            }
        }

        for statement in &snapshot.claims {
            let mut extra = String::new();
            if !statement.qualifiers.is_empty() || !statement.references.is_empty() {
                extra.push_str(" (\n");
                for qualifier in &statement.qualifiers {
                    extra.push_str("  ");
                    extra.push_str(&snak_to_text(qualifier));
                    extra.push_str(" ,\n");
                }
                for reference in &statement.references {
                    extra.push_str("  reference {\n");
                    for snak in reference {
                        extra.push_str("    ");
                        extra.push_str(&snak_to_text(snak));
                        extra.push_str(" ,\n");
                    }
                    extra.push_str("  },\n");
                }
                extra.push_str(" )");
            }
            writeln!(out, "{} {}{} .", title, snak_to_text(&statement.main), extra)?;
        }
        Ok(())
    }
}

impl<W: OutputSink> EntityProcessor for KbWriter<W> {
    fn process_entity(
        &mut self,
        title: &str,
        _revision: u64,
        _is_item: bool,
        snapshot: &EntitySnapshot,
    ) -> Result<()> {
        self.write_entity(title, snapshot)
            .with_context(|| format!("Failed to write KB data of {}", title))?;
        self.entities += 1;
        Ok(())
    }

    fn log_report(&self) {
        info!(entities = self.entities, "Serialized entities in KB format");
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.out.finish().context("Failed to finish KB output")?;
        }
        Ok(())
    }
}
