//! Reversible compression of volatile substrings.
//!
//! Every distinct value seen in a category gets a dense id, assigned in
//! first-seen order starting at 1. The mapping is append-only: ids are never
//! reused or reassigned within a run, so a placeholder like `@3` always
//! resolves back to the exact substring it replaced.

use log::debug;
use rustc_hash::FxHashMap;

use crate::error::{ClusterError, Result};
use crate::normalize::{Category, NormalizedLine};

/// Receives dictionary entries the moment they are created. Implementations
/// must be idempotent per value (insert-if-absent).
pub trait DictionarySink {
    fn record(&mut self, category: Category, id: u32, value: &str) -> Result<()>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InternDictionary {
    ids: FxHashMap<String, u32>,
    // values[id - 1]
    values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interned {
    pub id: u32,
    pub is_new: bool,
}

impl InternDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a dictionary from persisted `(id, value)` pairs. The ids must
    /// form the dense range `1..=n` and values must be unique.
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u32, String)>,
    {
        let mut entries: Vec<(u32, String)> = entries.into_iter().collect();
        entries.sort_by_key(|(id, _)| *id);
        let mut dict = InternDictionary::new();
        for (expected, (id, value)) in (1u32..).zip(entries) {
            if id != expected {
                return Err(ClusterError::Validation(format!(
                    "dictionary ids are not dense: expected {expected}, found {id}"
                )));
            }
            if dict.ids.contains_key(&value) {
                return Err(ClusterError::Validation(format!(
                    "duplicate dictionary value {value:?}"
                )));
            }
            dict.ids.insert(value.clone(), id);
            dict.values.push(value);
        }
        Ok(dict)
    }

    pub fn get_or_insert(&mut self, value: &str) -> Interned {
        if let Some(&id) = self.ids.get(value) {
            return Interned { id, is_new: false };
        }
        let id = self.values.len() as u32 + 1;
        self.values.push(value.to_string());
        self.ids.insert(value.to_string(), id);
        Interned { id, is_new: true }
    }

    pub fn get(&self, value: &str) -> Option<u32> {
        self.ids.get(value).copied()
    }

    pub fn resolve(&self, id: u32) -> Option<&str> {
        let slot = id.checked_sub(1)? as usize;
        self.values.get(slot).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        (1u32..).zip(self.values.iter().map(String::as_str))
    }
}

/// The four per-category dictionaries owned by one pipeline run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InternTables {
    pub ip: InternDictionary,
    pub block: InternDictionary,
    pub path: InternDictionary,
    pub timestamp: InternDictionary,
}

impl InternTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` for categories that are never interned.
    pub fn dictionary(&self, category: Category) -> Option<&InternDictionary> {
        match category {
            Category::IpPort => Some(&self.ip),
            Category::BlockId => Some(&self.block),
            Category::Path => Some(&self.path),
            Category::Timestamp => Some(&self.timestamp),
            Category::Number => None,
        }
    }

    pub fn dictionary_mut(&mut self, category: Category) -> Option<&mut InternDictionary> {
        match category {
            Category::IpPort => Some(&mut self.ip),
            Category::BlockId => Some(&mut self.block),
            Category::Path => Some(&mut self.path),
            Category::Timestamp => Some(&mut self.timestamp),
            Category::Number => None,
        }
    }

    /// Get-or-create the id for `value`, forwarding new entries to `sink`.
    pub fn intern(
        &mut self,
        category: Category,
        value: &str,
        sink: Option<&mut (dyn DictionarySink + '_)>,
    ) -> Result<u32> {
        let dict = self.dictionary_mut(category).ok_or_else(|| {
            ClusterError::Validation(format!("category {category} cannot be interned"))
        })?;
        let interned = dict.get_or_insert(value);
        if interned.is_new {
            debug!("interned {:?} as {} #{}", value, category, interned.id);
            if let Some(sink) = sink {
                sink.record(category, interned.id, value)?;
            }
        }
        Ok(interned.id)
    }

    pub fn resolve(&self, category: Category, id: u32) -> Option<&str> {
        self.dictionary(category)?.resolve(id)
    }

    /// Rebuilds the raw line from an interned line. Returns `None` if a
    /// placeholder does not resolve in these tables.
    pub fn expand(&self, line: &NormalizedLine) -> Option<String> {
        let mut out = String::with_capacity(line.text.len());
        let mut last = 0;
        for token in &line.interned {
            out.push_str(line.text.get(last..token.span.start)?);
            out.push_str(self.resolve(token.category, token.id)?);
            last = token.span.end;
        }
        out.push_str(line.text.get(last..)?);
        Some(out)
    }

    pub fn entry_count(&self) -> usize {
        self.ip.len() + self.block.len() + self.path.len() + self.timestamp.len()
    }
}
