//! Command database: definitions, masked-byte lookup, description loading.
pub mod command;
pub mod load;
pub mod mask;
pub mod param;
pub mod trie;

use anyhow::Result;
use command::CommandDefinition;
use std::collections::HashMap;
use std::sync::Arc;
use trie::{LookupTrie, TrieWalker};

/// A database of command definitions for one game.
///
/// Definitions are immutable once registered; the database is read-only
/// after construction and safe to share across threads.
#[derive(Debug)]
pub struct CommandDatabase {
    name: String,
    defs: Vec<Arc<CommandDefinition>>,
    trie: LookupTrie,
    // Lowercased name -> definition indices, in registration order.
    by_name: HashMap<String, Vec<usize>>,
    // Per definition: later definitions with an identical base pattern.
    alternatives: Vec<Vec<usize>>,
    text_box_split_snippet: Option<crate::script::Script>,
}

impl CommandDatabase {
    /// Creates an empty database with the given name.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            defs: Vec::new(),
            trie: LookupTrie::new(),
            by_name: HashMap::new(),
            alternatives: Vec::new(),
            text_box_split_snippet: None,
        }
    }

    /// Returns the database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a command definition.
    ///
    /// A definition whose base pattern is identical to an already-registered
    /// one becomes an alternative of it: the matcher returns the first and
    /// the command reader retries alternatives when element parsing fails.
    pub fn add(&mut self, def: CommandDefinition) -> Result<()> {
        def.validate()?;
        let index = self.defs.len();
        self.by_name
            .entry(def.name.to_lowercase())
            .or_default()
            .push(index);
        match self.trie.insert(&def.base, index) {
            Some(primary) => self.alternatives[primary].push(index),
            None => {}
        }
        self.alternatives.push(Vec::new());
        self.defs.push(Arc::new(def));
        Ok(())
    }

    /// Returns the definition at the given index.
    pub fn get(&self, index: usize) -> &Arc<CommandDefinition> {
        &self.defs[index]
    }

    /// Returns all definitions registered under a name (case-insensitive),
    /// in registration order.
    pub fn find_by_name(&self, name: &str) -> Vec<&Arc<CommandDefinition>> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|indices| indices.iter().map(|&i| &self.defs[i]).collect())
            .unwrap_or_default()
    }

    /// Returns the alternatives of the definition at `index`, in
    /// registration order.
    pub fn alternatives(&self, index: usize) -> &[usize] {
        &self.alternatives[index]
    }

    /// Returns the number of registered definitions.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Returns true if no definitions are registered.
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Creates a path walker over the byte lookup trie.
    pub fn walker(&self) -> TrieWalker<'_> {
        self.trie.walker()
    }

    /// Returns the snippet inserted when splitting overlong text boxes,
    /// if the database defines one.
    pub fn text_box_split_snippet(&self) -> Option<&crate::script::Script> {
        self.text_box_split_snippet.as_ref()
    }

    /// Sets the text box split snippet.
    pub fn set_text_box_split_snippet(&mut self, snippet: crate::script::Script) {
        self.text_box_split_snippet = Some(snippet);
    }
}

#[cfg(test)]
fn simple_def(name: &str, base: &[(u8, u8)]) -> CommandDefinition {
    CommandDefinition::builder(name)
        .base(base.iter().map(|&(v, m)| mask::MaskedByte::new(v, m)).collect())
        .build()
        .unwrap()
}

#[test]
fn test_name_lookup_is_case_insensitive() {
    let mut db = CommandDatabase::new("test");
    db.add(simple_def("PrintMsg", &[(0xE5, 0xFF)])).unwrap();
    db.add(simple_def("End", &[(0xE6, 0xFF)])).unwrap();
    assert_eq!(db.find_by_name("printmsg").len(), 1);
    assert_eq!(db.find_by_name("PRINTMSG").len(), 1);
    assert_eq!(db.find_by_name("end")[0].name, "End");
    assert!(db.find_by_name("nothing").is_empty());
}

#[test]
fn test_identical_base_registers_alternative() {
    let mut db = CommandDatabase::new("test");
    db.add(simple_def("first", &[(0xE5, 0xFF), (0x01, 0x0F)]))
        .unwrap();
    db.add(simple_def("second", &[(0xE5, 0xFF), (0x01, 0x0F)]))
        .unwrap();
    db.add(simple_def("other", &[(0xE5, 0xFF), (0x02, 0x0F)]))
        .unwrap();
    assert_eq!(db.alternatives(0), &[1]);
    assert!(db.alternatives(1).is_empty());
    assert!(db.alternatives(2).is_empty());
}
