//! Command definitions.
use super::mask::MaskedByte;
use super::param::{OffsetType, ParameterDefinition};
use anyhow::Result;

/// Whether a command ends the script it appears in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndType {
    /// Ends the script iff every jump parameter points away from it.
    Default,
    /// Always ends the script.
    Always,
    /// Never ends the script.
    Never,
}

/// One element of a command: either a single parameter, or a length
/// parameter followed by repeated data entries.
#[derive(Clone, Debug)]
pub struct CommandElementDefinition {
    /// The length parameter; present iff this element repeats.
    pub length: Option<ParameterDefinition>,
    /// The data parameter definitions, in storage order.
    pub data_params: Vec<ParameterDefinition>,
    /// Partition of `data_params` into contiguously stored data groups.
    /// Empty means a single group holding every data parameter.
    pub data_group_sizes: Vec<u32>,
}

impl CommandElementDefinition {
    /// Creates an element holding a single parameter.
    pub fn single(param: ParameterDefinition) -> Self {
        Self {
            length: None,
            data_params: vec![param],
            data_group_sizes: Vec::new(),
        }
    }

    /// Creates an element with a length parameter and repeated data
    /// parameters.
    pub fn multi(
        length: ParameterDefinition,
        data_params: Vec<ParameterDefinition>,
        data_group_sizes: Vec<u32>,
    ) -> Self {
        Self {
            length: Some(length),
            data_params,
            data_group_sizes,
        }
    }

    /// The element name: the length parameter's name when repeating,
    /// otherwise the single parameter's name.
    pub fn name(&self) -> &str {
        match &self.length {
            Some(length) => &length.name,
            None => &self.data_params[0].name,
        }
    }

    /// Whether this element stores multiple data entries.
    pub fn has_multiple_data_entries(&self) -> bool {
        self.length.is_some()
    }

    /// The data parameter definitions split into data groups.
    pub fn data_groups(&self) -> Vec<&[ParameterDefinition]> {
        if self.data_group_sizes.is_empty() {
            return vec![&self.data_params[..]];
        }
        let mut groups = Vec::with_capacity(self.data_group_sizes.len());
        let mut start = 0;
        for &size in &self.data_group_sizes {
            let end = start + size as usize;
            groups.push(&self.data_params[start..end]);
            start = end;
        }
        groups
    }

    fn validate(&self) -> Result<()> {
        if self.data_params.is_empty() {
            return Err(anyhow::anyhow!("Element has no data parameters"));
        }
        if let Some(length) = &self.length {
            length.validate()?;
            if length.is_string() {
                return Err(anyhow::anyhow!(
                    "Length parameter {:?} cannot be a string",
                    length.name
                ));
            }
        } else if self.data_params.len() != 1 {
            return Err(anyhow::anyhow!(
                "Element {:?} has several parameters but no length parameter",
                self.name()
            ));
        }
        for param in &self.data_params {
            param.validate()?;
        }
        if !self.data_group_sizes.is_empty() {
            let total: u32 = self.data_group_sizes.iter().sum();
            if total as usize != self.data_params.len() {
                return Err(anyhow::anyhow!(
                    "Data group sizes of element {:?} sum to {}, but it has {} data parameters",
                    self.name(),
                    total,
                    self.data_params.len()
                ));
            }
        }
        Ok(())
    }
}

/// Definition of a command: its identifying base bytes and the layout of
/// its parameters.
#[derive(Clone, Debug)]
pub struct CommandDefinition {
    /// Command name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// The fixed leading byte pattern identifying the command.
    pub base: Vec<MaskedByte>,
    /// Script-end behavior.
    pub end_type: EndType,
    /// Whether the command prints to the active text box.
    pub prints: bool,
    /// Data parameter holding the active mugshot, if any.
    pub mugshot_parameter_name: Option<String>,
    /// Whether the command hides the active mugshot. Meaningful on its own:
    /// a command can hide the mugshot without carrying a mugshot parameter.
    pub hides_mugshot: bool,
    /// Matched depth at which this definition wins even if the lookup
    /// could keep walking; 0 disables priority.
    pub priority_length: u32,
    /// Bytes to subtract from the stream position after the command.
    pub rewind: u32,
    /// Whether this definition only matches to look ahead and is never
    /// returned as a terminal match.
    pub look_ahead: bool,
    /// The command's elements, in storage order.
    pub elements: Vec<CommandElementDefinition>,
}

impl CommandDefinition {
    /// Starts building a definition with the given name.
    pub fn builder<S: Into<String>>(name: S) -> CommandDefinitionBuilder {
        CommandDefinitionBuilder {
            def: CommandDefinition {
                name: name.into(),
                description: String::new(),
                base: Vec::new(),
                end_type: EndType::Default,
                prints: false,
                mugshot_parameter_name: None,
                hides_mugshot: false,
                priority_length: 0,
                rewind: 0,
                look_ahead: false,
                elements: Vec::new(),
            },
        }
    }

    /// Looks up an element definition by name.
    pub fn element(&self, name: &str) -> Option<&CommandElementDefinition> {
        self.elements.iter().find(|e| e.name() == name)
    }

    /// Iterates over every parameter definition, length parameters
    /// included.
    pub fn all_params(&self) -> impl Iterator<Item = &ParameterDefinition> {
        self.elements
            .iter()
            .flat_map(|e| e.length.iter().chain(e.data_params.iter()))
    }

    /// Validates the definition invariants.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow::anyhow!("Command name must not be empty"));
        }
        if self.base.is_empty() {
            return Err(anyhow::anyhow!(
                "Command {:?} must have at least one base byte",
                self.name
            ));
        }
        for element in &self.elements {
            element.validate()?;
        }
        if let Some(mugshot) = &self.mugshot_parameter_name {
            let found = self.elements.iter().any(|e| {
                !e.has_multiple_data_entries() && e.data_params.iter().any(|p| &p.name == mugshot)
            });
            if !found {
                return Err(anyhow::anyhow!(
                    "Command {:?} names mugshot parameter {:?}, but no non-repeating data parameter has that name",
                    self.name,
                    mugshot
                ));
            }
        }
        for param in self.all_params() {
            if param.offset_type == OffsetType::Label {
                let label = param.relative_label.as_deref().unwrap_or_default();
                if !self.all_params().any(|p| p.name == label) {
                    return Err(anyhow::anyhow!(
                        "Parameter {:?} of command {:?} is relative to unknown label {:?}",
                        param.name,
                        self.name,
                        label
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Builder for [CommandDefinition].
pub struct CommandDefinitionBuilder {
    def: CommandDefinition,
}

impl CommandDefinitionBuilder {
    /// Sets the base byte pattern.
    pub fn base(mut self, base: Vec<MaskedByte>) -> Self {
        self.def.base = base;
        self
    }

    /// Sets the description.
    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.def.description = description.into();
        self
    }

    /// Sets the end type.
    pub fn end_type(mut self, end_type: EndType) -> Self {
        self.def.end_type = end_type;
        self
    }

    /// Marks the command as printing to the text box.
    pub fn prints(mut self) -> Self {
        self.def.prints = true;
        self
    }

    /// Names the data parameter holding the mugshot.
    pub fn mugshot<S: Into<String>>(mut self, name: S) -> Self {
        self.def.mugshot_parameter_name = Some(name.into());
        self
    }

    /// Marks the command as hiding the mugshot.
    pub fn hides_mugshot(mut self) -> Self {
        self.def.hides_mugshot = true;
        self
    }

    /// Sets the priority length.
    pub fn priority_length(mut self, length: u32) -> Self {
        self.def.priority_length = length;
        self
    }

    /// Sets the rewind count.
    pub fn rewind(mut self, rewind: u32) -> Self {
        self.def.rewind = rewind;
        self
    }

    /// Marks the definition as look-ahead only.
    pub fn look_ahead(mut self) -> Self {
        self.def.look_ahead = true;
        self
    }

    /// Appends an element definition.
    pub fn element(mut self, element: CommandElementDefinition) -> Self {
        self.def.elements.push(element);
        self
    }

    /// Validates and returns the definition.
    pub fn build(self) -> Result<CommandDefinition> {
        self.def.validate()?;
        Ok(self.def)
    }
}

#[test]
fn test_validation_rejects_bad_definitions() {
    assert!(CommandDefinition::builder("  ")
        .base(vec![MaskedByte::exact(0x01)])
        .build()
        .is_err());
    assert!(CommandDefinition::builder("nobase").build().is_err());
    assert!(CommandDefinition::builder("mug")
        .base(vec![MaskedByte::exact(0x01)])
        .mugshot("missing")
        .build()
        .is_err());
}

#[test]
fn test_data_groups_partition() {
    use super::param::ParameterDefinition;
    let element = CommandElementDefinition::multi(
        ParameterDefinition::number("count", 1, 0, 8),
        vec![
            ParameterDefinition::number("a", 0, 0, 8),
            ParameterDefinition::number("b", 0, 0, 8),
            ParameterDefinition::number("c", 0, 0, 8),
        ],
        vec![2, 1],
    );
    let groups = element.data_groups();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].len(), 2);
    assert_eq!(groups[1].len(), 1);
    assert_eq!(element.name(), "count");
    assert!(element.has_multiple_data_entries());
}

#[test]
fn test_group_sizes_must_cover_params() {
    use super::param::ParameterDefinition;
    let element = CommandElementDefinition::multi(
        ParameterDefinition::number("count", 1, 0, 8),
        vec![ParameterDefinition::number("a", 0, 0, 8)],
        vec![2],
    );
    let def = CommandDefinition::builder("cmd")
        .base(vec![MaskedByte::exact(0x01)])
        .element(element)
        .build();
    assert!(def.is_err());
}
