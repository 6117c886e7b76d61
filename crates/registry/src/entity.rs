//! RDAP document model and organization selection.
//!
//! An IP network document carries a tree of entities. Each entity has a
//! jCard (`vcardArray`) with `fn` and `kind` properties and a list of events.
//! We want the registrant organization, not the admin/abuse/NOC contacts
//! that sit next to it.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use circuitmap_recon::config::{RegistryConfig, RemapMatch};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RdapNetwork {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub entities: Vec<RdapEntity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RdapEntity {
    #[serde(default, rename = "vcardArray")]
    pub vcard_array: Option<serde_json::Value>,
    #[serde(default)]
    pub events: Vec<RdapEvent>,
    #[serde(default)]
    pub entities: Vec<RdapEntity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RdapEvent {
    #[serde(default, rename = "eventAction")]
    pub action: String,
    #[serde(default, rename = "eventDate")]
    pub date: Option<String>,
}

const ROLE_WORDS: [&str; 3] = ["admin", "technical", "abuse"];
const SALUTATIONS: [&str; 5] = ["Mr.", "Ms.", "Dr.", "Mrs.", "Miss"];

impl RdapEntity {
    /// Value of a jCard property, e.g. `fn` or `kind`.
    ///
    /// jCard: `["vcard", [[name, params, type, value], ...]]`.
    fn vcard_property(&self, property: &str) -> Option<&str> {
        let props = self.vcard_array.as_ref()?.get(1)?.as_array()?;
        props.iter().find_map(|p| {
            let p = p.as_array()?;
            if p.first()?.as_str()? == property {
                p.get(3)?.as_str()
            } else {
                None
            }
        })
    }

    fn organization_name(&self) -> Option<&str> {
        let kind = self.vcard_property("kind")?;
        if !kind.eq_ignore_ascii_case("org") {
            return None;
        }
        let name = self.vcard_property("fn")?.trim();
        if name.is_empty() || is_contact_name(name) {
            return None;
        }
        Some(name)
    }

    /// Latest `registration` / `last changed` date, if any parses.
    fn latest_change(&self) -> Option<DateTime<Utc>> {
        self.events
            .iter()
            .filter(|e| {
                let action = e.action.to_ascii_lowercase();
                action == "registration" || action == "last changed"
            })
            .filter_map(|e| DateTime::parse_from_rfc3339(e.date.as_deref()?).ok())
            .map(|d| d.with_timezone(&Utc))
            .max()
    }
}

fn is_contact_name(name: &str) -> bool {
    if SALUTATIONS.iter().any(|s| name.contains(s)) {
        return true;
    }
    let lower = name.to_lowercase();
    if ROLE_WORDS.iter().any(|w| lower.contains(w)) {
        return true;
    }
    // "noc" only as a whole word.
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| token == "noc")
}

#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    name: String,
    changed: Option<DateTime<Utc>>,
}

fn collect_organizations(entities: &[RdapEntity], out: &mut Vec<Candidate>) {
    for entity in entities {
        if let Some(name) = entity.organization_name() {
            out.push(Candidate { name: name.to_string(), changed: entity.latest_change() });
        }
        collect_organizations(&entity.entities, out);
    }
}

/// Registrant organization for a network document, cleaned and remapped.
///
/// Order: prefix remaps on the network name, then the most recently
/// changed organization entity (undated entities rank lowest, document
/// order breaks ties), then the network name. The result has configured
/// prefixes stripped and `contains` remaps applied.
pub fn select_organization(network: &RdapNetwork, config: &RegistryConfig) -> Option<String> {
    let network_name = network.name.as_deref().map(str::trim).filter(|n| !n.is_empty());

    if let Some(name) = network_name {
        let prefix_hit = config
            .remaps
            .iter()
            .filter(|r| r.match_kind == RemapMatch::Prefix)
            .find(|r| name.starts_with(r.pattern.as_str()));
        if let Some(rule) = prefix_hit {
            return Some(rule.display.clone());
        }
    }

    let mut candidates = Vec::new();
    collect_organizations(&network.entities, &mut candidates);
    // Stable sort: equal dates keep document order. `None` sorts below any date.
    candidates.sort_by(|a, b| b.changed.cmp(&a.changed));

    let chosen = candidates
        .into_iter()
        .next()
        .map(|c| c.name)
        .or_else(|| network_name.map(str::to_string))?;

    let cleaned = strip_prefixes(&chosen, &config.strip_prefixes);
    if cleaned.is_empty() {
        return None;
    }

    let lower = cleaned.to_lowercase();
    let remapped = config
        .remaps
        .iter()
        .filter(|r| r.match_kind == RemapMatch::Contains)
        .find(|r| lower.contains(&r.pattern.to_lowercase()));
    Some(match remapped {
        Some(rule) => rule.display.clone(),
        None => cleaned,
    })
}

fn strip_prefixes(name: &str, prefixes: &[String]) -> String {
    let mut out = name.trim();
    for prefix in prefixes {
        if let Some(rest) = out.strip_prefix(prefix.as_str()) {
            out = rest.trim();
        }
    }
    out.to_string()
}
