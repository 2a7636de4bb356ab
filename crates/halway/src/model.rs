//! # HAL Documents
//!
//! The wire-level types exchanged between the engines: [`Link`], [`HalResource`]
//! (a JSON object with optional `_links` and `_embedded`) and [`HalResponse`].

use crate::error::HalError;
use crate::template::{self, TemplateVariables};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const HAL_JSON: &str = "application/hal+json";
pub const VND_ERROR_JSON: &str = "application/vnd.error+json";

pub const LINKS: &str = "_links";
pub const EMBEDDED: &str = "_embedded";
pub const SELF: &str = "self";

fn is_false(value: &bool) -> bool {
    !*value
}

/// A HAL link object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub templated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl Link {
    /// Creates a link; hrefs containing a `{` are flagged as templated.
    pub fn new(href: impl Into<String>) -> Self {
        let href = href.into();
        Self {
            templated: href.contains('{'),
            href,
            ..Self::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Expands a templated link; non-templated links are returned unchanged.
    pub fn expand(&self, variables: &TemplateVariables) -> Link {
        if !self.templated {
            return self.clone();
        }
        Link {
            href: template::expand(&self.href, variables),
            templated: false,
            ..self.clone()
        }
    }

    fn from_json(value: &Value) -> Option<Link> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// A HAL+JSON resource: state properties plus `_links` and `_embedded`.
///
/// Property order is preserved, so relations appear in the order they were added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HalResource {
    json: Map<String, Value>,
}

impl HalResource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Result<Self, HalError> {
        match value {
            Value::Object(json) => Ok(Self { json }),
            other => Err(HalError::developer(format!(
                "a HAL resource must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.json.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.json)
    }

    /// Adds all properties of `state` (which must be an object) to this resource.
    pub fn set_state(&mut self, state: Value) -> Result<(), HalError> {
        match state {
            Value::Object(properties) => {
                for (key, value) in properties {
                    if key != LINKS && key != EMBEDDED {
                        self.json.insert(key, value);
                    }
                }
                Ok(())
            }
            Value::Null => Ok(()),
            other => Err(HalError::developer(format!(
                "resource state must serialize to a JSON object, got {other}"
            ))),
        }
    }

    /// The state properties, without `_links` and `_embedded`.
    pub fn state_json(&self) -> Value {
        let state = self
            .json
            .iter()
            .filter(|(k, _)| *k != LINKS && *k != EMBEDDED)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(state)
    }

    pub fn state<S: DeserializeOwned>(&self) -> Result<S, HalError> {
        Ok(serde_json::from_value(self.state_json())?)
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.json.get(name)
    }

    /// All links for `relation`, in document order. Malformed entries are skipped.
    pub fn links(&self, relation: &str) -> Vec<Link> {
        match self.section(LINKS).and_then(|links| links.get(relation)) {
            Some(Value::Array(items)) => items.iter().filter_map(Link::from_json).collect(),
            Some(single) => Link::from_json(single).into_iter().collect(),
            None => Vec::new(),
        }
    }

    pub fn link(&self, relation: &str) -> Option<Link> {
        self.links(relation).into_iter().next()
    }

    pub fn self_link(&self) -> Option<Link> {
        self.link(SELF)
    }

    /// All embedded resources for `relation`, in document order.
    pub fn embedded(&self, relation: &str) -> Vec<HalResource> {
        let to_resource = |value: &Value| match value {
            Value::Object(json) => Some(HalResource { json: json.clone() }),
            _ => None,
        };
        match self.section(EMBEDDED).and_then(|embedded| embedded.get(relation)) {
            Some(Value::Array(items)) => items.iter().filter_map(to_resource).collect(),
            Some(single) => to_resource(single).into_iter().collect(),
            None => Vec::new(),
        }
    }

    pub fn link_relations(&self) -> Vec<String> {
        self.section(LINKS)
            .map(|links| links.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn embedded_relations(&self) -> Vec<String> {
        self.section(EMBEDDED)
            .map(|embedded| embedded.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Sets `relation` to a single link object, replacing any existing links.
    pub fn set_link(&mut self, relation: &str, link: Link) {
        let value = serde_json::to_value(link).unwrap_or(Value::Null);
        self.section_mut(LINKS).insert(relation.to_string(), value);
    }

    /// Appends links to `relation`, which is rendered as an array.
    pub fn add_links(&mut self, relation: &str, links: Vec<Link>) {
        let new = links
            .into_iter()
            .filter_map(|link| serde_json::to_value(link).ok());
        append(self.section_mut(LINKS), relation, new);
    }

    pub fn set_embedded(&mut self, relation: &str, resource: HalResource) {
        self.section_mut(EMBEDDED)
            .insert(relation.to_string(), resource.into_value());
    }

    /// Appends embedded resources to `relation`, which is rendered as an array.
    pub fn add_embedded(&mut self, relation: &str, resources: Vec<HalResource>) {
        let new = resources.into_iter().map(HalResource::into_value);
        append(self.section_mut(EMBEDDED), relation, new);
    }

    fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.json.get(name).and_then(Value::as_object)
    }

    fn section_mut(&mut self, name: &str) -> &mut Map<String, Value> {
        let entry = self
            .json
            .entry(name.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry {
            Value::Object(map) => map,
            _ => unreachable!("section was just replaced by an object"),
        }
    }
}

fn append(section: &mut Map<String, Value>, relation: &str, new: impl Iterator<Item = Value>) {
    let slot = section
        .entry(relation.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        let existing = slot.take();
        *slot = Value::Array(vec![existing]);
    }
    if let Value::Array(items) = slot {
        items.extend(new);
    }
}

impl Serialize for HalResource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.json.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HalResource {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self {
            json: Map::deserialize(deserializer)?,
        })
    }
}

/// A loaded (client side) or rendered (server side) response.
#[derive(Debug, Clone, PartialEq)]
pub struct HalResponse {
    pub uri: String,
    pub status: u16,
    pub content_type: String,
    pub body: HalResource,
    /// Seconds the response may be reused; `None` if the origin did not say.
    pub max_age: Option<u64>,
}

impl HalResponse {
    pub fn ok(uri: impl Into<String>, body: HalResource) -> Self {
        Self {
            uri: uri.into(),
            status: 200,
            content_type: HAL_JSON.to_string(),
            body,
            max_age: None,
        }
    }

    pub fn with_max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The `Cache-Control` header value announcing [`HalResponse::max_age`].
    pub fn cache_control(&self) -> Option<String> {
        self.max_age.map(|seconds| format!("max-age={seconds}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> HalResource {
        HalResource::from_value(json!({
            "title": "Catalog",
            "_links": {
                "self": { "href": "/catalog" },
                "item": [ { "href": "/items/1" }, { "href": "/items/2", "title": "Two" } ],
                "search": { "href": "/items{?q}", "templated": true }
            },
            "_embedded": {
                "item": { "_links": { "self": { "href": "/items/1" } }, "name": "One" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn links_accept_single_objects_and_arrays() {
        let doc = document();
        assert_eq!(doc.self_link().unwrap().href, "/catalog");
        let items = doc.links("item");
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].title.as_deref(), Some("Two"));
        assert!(doc.links("missing").is_empty());
        assert!(doc.link("search").unwrap().templated);
    }

    #[test]
    fn embedded_single_object_is_a_list_of_one() {
        let embedded = document().embedded("item");
        assert_eq!(embedded.len(), 1);
        assert_eq!(embedded[0].property("name"), Some(&json!("One")));
    }

    #[test]
    fn state_excludes_links_and_embedded() {
        assert_eq!(document().state_json(), json!({ "title": "Catalog" }));
    }

    #[test]
    fn add_links_renders_arrays_in_insertion_order() {
        let mut doc = HalResource::new();
        doc.set_link(SELF, Link::new("/a"));
        doc.add_links("item", vec![Link::new("/b")]);
        doc.add_links("item", vec![Link::new("/c")]);
        assert_eq!(
            doc.into_value(),
            json!({ "_links": {
                "self": { "href": "/a" },
                "item": [ { "href": "/b" }, { "href": "/c" } ]
            }})
        );
    }

    #[test]
    fn templated_links_expand() {
        let link = Link::new("/items/{id}");
        assert!(link.templated);
        let expanded = link.expand(&TemplateVariables::new().with("id", 3));
        assert_eq!(expanded, Link::new("/items/3"));
    }

    #[test]
    fn non_object_documents_are_rejected() {
        assert!(HalResource::from_value(json!([1, 2])).is_err());
    }
}
