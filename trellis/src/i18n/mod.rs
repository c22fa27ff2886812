//! Locale resolver: key → localized string with recursive and embedded
//! templates.
//!
//! Messages are stored per assistant (or `__global__`) and locale as flat
//! dotted-key maps; nested maps are flattened at load. Lookup tries the
//! assistant's exact locale, region short code, and language short code, then
//! the same three against the global scope, and finally returns the input
//! unchanged. The resolver never errors.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Scope name for messages shared by every assistant.
pub const GLOBAL_ASSISTANT: &str = "__global__";

/// Bound on recursive template expansion; each step either substitutes a
/// constant or leaves the string unchanged, so expansion terminates anyway.
const MAX_EXPANSION_ROUNDS: usize = 10;

static TEMPLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").unwrap());

/// Message catalog and resolver.
#[derive(Debug, Default)]
pub struct I18n {
    /// assistant → locale → dotted key → string.
    messages: HashMap<String, HashMap<String, HashMap<String, String>>>,
}

impl I18n {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a message map for one assistant and locale. Nested maps are
    /// flattened to dotted keys; later loads merge over earlier ones.
    pub fn load(&mut self, assistant: &str, locale: &str, messages: &Value) {
        let mut flat = HashMap::new();
        flatten_into("", messages, &mut flat);
        let entry = self
            .messages
            .entry(assistant.to_string())
            .or_default()
            .entry(locale.to_ascii_lowercase())
            .or_default();
        entry.extend(flat);
    }

    /// Loads a global message map (merged under every assistant at lookup;
    /// local messages override global on key collision).
    pub fn load_global(&mut self, locale: &str, messages: &Value) {
        self.load(GLOBAL_ASSISTANT, locale, messages);
    }

    /// Resolves a dotted key through the six-step lookup order. `None` when
    /// no scope carries the key.
    fn resolve(&self, assistant: &str, locale: &str, key: &str) -> Option<&str> {
        let locale = locale.to_ascii_lowercase();
        let mut candidates = vec![locale.clone()];
        if let Some((lang, region)) = locale.split_once('-') {
            candidates.push(region.to_string());
            candidates.push(lang.to_string());
        }
        for scope in [assistant, GLOBAL_ASSISTANT] {
            let Some(locales) = self.messages.get(scope) else {
                continue;
            };
            for candidate in &candidates {
                if let Some(value) = Self::locale_map(locales, candidate).and_then(|m| m.get(key))
                {
                    return Some(value);
                }
            }
        }
        None
    }

    /// Exact locale map, or the long-form map a short code aliases to when
    /// the short code is not explicitly present.
    fn locale_map<'a>(
        locales: &'a HashMap<String, HashMap<String, String>>,
        locale: &str,
    ) -> Option<&'a HashMap<String, String>> {
        if let Some(map) = locales.get(locale) {
            return Some(map);
        }
        if locale.contains('-') {
            return None;
        }
        let lang_prefix = format!("{}-", locale);
        let region_suffix = format!("-{}", locale);
        let mut keys: Vec<&String> = locales.keys().collect();
        keys.sort();
        keys.into_iter()
            .find(|k| k.starts_with(&lang_prefix) || k.ends_with(&region_suffix))
            .and_then(|k| locales.get(k))
    }

    /// Translates one string per the template grammar.
    pub fn translate_text(&self, assistant: &str, locale: &str, input: &str) -> String {
        let trimmed = input.trim();

        let mut current = if !input.contains("{{") {
            // Direct key: looked up verbatim; unresolved passes through.
            match self.resolve(assistant, locale, trimmed) {
                Some(v) => v.to_string(),
                None => return input.to_string(),
            }
        } else if let Some(key) = single_template_key(trimmed) {
            // The entire input is one template.
            match self.resolve(assistant, locale, &key) {
                Some(v) => v.to_string(),
                None => return input.to_string(),
            }
        } else {
            // Embedded templates: substitute each resolvable occurrence.
            self.substitute(assistant, locale, input)
        };

        // Recursive expansion until no substitution changes the string.
        for _ in 0..MAX_EXPANSION_ROUNDS {
            if !current.contains("{{") {
                break;
            }
            let next = self.substitute(assistant, locale, &current);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn substitute(&self, assistant: &str, locale: &str, input: &str) -> String {
        TEMPLATE
            .replace_all(input, |caps: &regex::Captures<'_>| {
                let key = caps[1].trim();
                match self.resolve(assistant, locale, key) {
                    Some(v) => v.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Walks a structured input and translates every string leaf.
    pub fn translate(&self, assistant: &str, locale: &str, input: &Value) -> Value {
        match input {
            Value::String(s) => Value::String(self.translate_text(assistant, locale, s)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.translate(assistant, locale, v))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.translate(assistant, locale, v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// When the whole trimmed input is exactly one `{{key}}`, returns the key.
fn single_template_key(trimmed: &str) -> Option<String> {
    let caps = TEMPLATE.captures(trimmed)?;
    let whole = caps.get(0)?;
    if whole.start() == 0 && whole.end() == trimmed.len() {
        Some(caps[1].trim().to_string())
    } else {
        None
    }
}

/// Flattens nested maps into dotted keys; non-string scalar leaves are
/// rendered with their JSON form.
fn flatten_into(prefix: &str, value: &Value, out: &mut HashMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", prefix, k)
                };
                flatten_into(&key, v, out);
            }
        }
        Value::String(s) => {
            if !prefix.is_empty() {
                out.insert(prefix.to_string(), s.clone());
            }
        }
        Value::Null => {}
        other => {
            if !prefix.is_empty() {
                out.insert(prefix.to_string(), other.to_string());
            }
        }
    }
}
