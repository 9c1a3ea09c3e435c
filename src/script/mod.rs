//! Scripts and text archives.
pub mod element;

use anyhow::Result;
pub use element::{Command, CommandElement, DataEntry, DirectiveElement, DirectiveKind, Parameter};

/// One element of a script.
#[derive(Clone, Debug)]
pub enum ScriptElement {
    /// A decoded command.
    Command(Command),
    /// A raw byte no database could explain.
    Byte(u8),
    /// A run of decoded text.
    Text(String),
    /// A directive for external tooling.
    Directive(DirectiveElement),
}

impl ScriptElement {
    /// Whether script execution ends after this element.
    pub fn ends_script(&self) -> bool {
        match self {
            ScriptElement::Command(cmd) => cmd.ends_script(),
            _ => false,
        }
    }
}

/// An ordered sequence of script elements.
#[derive(Clone, Debug, Default)]
pub struct Script {
    /// Name of the command database the script was decoded with.
    pub database_name: String,
    elements: Vec<ScriptElement>,
}

impl Script {
    /// Creates an empty script tagged with a database name.
    pub fn new<S: Into<String>>(database_name: S) -> Self {
        Self {
            database_name: database_name.into(),
            elements: Vec::new(),
        }
    }

    /// Appends an element.
    pub fn push(&mut self, element: ScriptElement) {
        self.elements.push(element);
    }

    /// The script elements in order.
    pub fn elements(&self) -> &[ScriptElement] {
        &self.elements
    }

    /// The number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the script has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The number of raw byte elements; nonzero means some input could not
    /// be explained by the database.
    pub fn byte_element_count(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| matches!(e, ScriptElement::Byte(_)))
            .count()
    }
}

/// An ordered collection of scripts with a stable identifier.
#[derive(Clone, Debug)]
pub struct TextArchive {
    identifier: String,
    /// The scripts, in pointer-table order.
    pub scripts: Vec<Script>,
}

impl TextArchive {
    /// Creates an empty archive with the given identifier.
    ///
    /// Identifiers must be non-empty and free of whitespace.
    pub fn new<S: Into<String>>(identifier: S) -> Result<Self> {
        let identifier = identifier.into();
        Self::check_identifier(&identifier)?;
        Ok(Self {
            identifier,
            scripts: Vec::new(),
        })
    }

    /// Creates an empty archive with a random 128-bit hex identifier.
    pub fn with_random_identifier() -> Self {
        Self {
            identifier: format!("{:032X}", rand::random::<u128>()),
            scripts: Vec::new(),
        }
    }

    fn check_identifier(identifier: &str) -> Result<()> {
        if identifier.is_empty() || identifier.chars().any(|c| c.is_whitespace()) {
            return Err(anyhow::anyhow!(
                "Archive identifier must be non-empty and free of whitespace: {:?}",
                identifier
            ));
        }
        Ok(())
    }

    /// The archive identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Replaces the archive identifier.
    pub fn set_identifier<S: Into<String>>(&mut self, identifier: S) -> Result<()> {
        let identifier = identifier.into();
        Self::check_identifier(&identifier)?;
        self.identifier = identifier;
        Ok(())
    }

    /// Pads with empty scripts or truncates to exactly `count` scripts.
    pub fn resize(&mut self, count: usize) {
        self.scripts.resize_with(count, Script::default);
    }

    /// Drops trailing empty scripts, keeping at least `min` scripts.
    pub fn trim(&mut self, min: usize) {
        while self.scripts.len() > min {
            match self.scripts.last() {
                Some(script) if script.is_empty() => {
                    self.scripts.pop();
                }
                _ => break,
            }
        }
    }
}

#[test]
fn test_identifier_rules() {
    assert!(TextArchive::new("0E0000").is_ok());
    assert!(TextArchive::new("").is_err());
    assert!(TextArchive::new("has space").is_err());
    let archive = TextArchive::with_random_identifier();
    assert_eq!(archive.identifier().len(), 32);
    assert!(archive.identifier().chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_resize_and_trim() {
    let mut archive = TextArchive::new("A").unwrap();
    archive.resize(3);
    assert_eq!(archive.scripts.len(), 3);
    archive.scripts[0].push(ScriptElement::Byte(1));
    archive.trim(0);
    assert_eq!(archive.scripts.len(), 1);
    archive.resize(4);
    archive.trim(2);
    assert_eq!(archive.scripts.len(), 2);
    archive.resize(1);
    assert_eq!(archive.scripts.len(), 1);
}
