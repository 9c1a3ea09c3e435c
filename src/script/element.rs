//! Runtime command values.
use crate::db::command::{CommandDefinition, CommandElementDefinition, EndType};
use crate::db::param::ParameterDefinition;
use anyhow::Result;
use std::sync::Arc;

/// The value held by a runtime parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterValue {
    /// A number.
    Number(i64),
    /// An inline string.
    String(String),
}

/// A runtime parameter: a definition plus its current value.
///
/// The value form is fixed by the definition; a string parameter can never
/// hold a number and vice versa.
#[derive(Clone, Debug)]
pub struct Parameter {
    def: ParameterDefinition,
    value: ParameterValue,
}

impl Parameter {
    /// Creates a parameter with its default value.
    pub fn new(def: &ParameterDefinition) -> Self {
        let value = if def.is_string() {
            ParameterValue::String(String::new())
        } else {
            ParameterValue::Number(def.minimum())
        };
        Self {
            def: def.clone(),
            value,
        }
    }

    /// The parameter definition.
    pub fn def(&self) -> &ParameterDefinition {
        &self.def
    }

    /// The parameter name.
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Whether this parameter holds a string.
    pub fn is_string(&self) -> bool {
        self.def.is_string()
    }

    /// The current number value.
    pub fn number(&self) -> Result<i64> {
        match &self.value {
            ParameterValue::Number(n) => Ok(*n),
            ParameterValue::String(_) => Err(anyhow::anyhow!(
                "Parameter {:?} holds a string, not a number",
                self.def.name
            )),
        }
    }

    /// Sets the number value, enforcing the definition's range.
    pub fn set_number(&mut self, value: i64) -> Result<()> {
        if self.is_string() {
            return Err(anyhow::anyhow!(
                "Parameter {:?} holds a string, not a number",
                self.def.name
            ));
        }
        if value < self.def.minimum() || value > self.def.maximum() {
            return Err(anyhow::anyhow!(
                "Value {} for parameter {:?} is outside [{}, {}]",
                value,
                self.def.name,
                self.def.minimum(),
                self.def.maximum()
            ));
        }
        self.value = ParameterValue::Number(value);
        Ok(())
    }

    /// The current string value.
    pub fn string(&self) -> Result<&str> {
        match &self.value {
            ParameterValue::String(s) => Ok(s),
            ParameterValue::Number(_) => Err(anyhow::anyhow!(
                "Parameter {:?} holds a number, not a string",
                self.def.name
            )),
        }
    }

    /// Sets the string value.
    pub fn set_string<S: Into<String>>(&mut self, value: S) -> Result<()> {
        if !self.is_string() {
            return Err(anyhow::anyhow!(
                "Parameter {:?} holds a number, not a string",
                self.def.name
            ));
        }
        self.value = ParameterValue::String(value.into());
        Ok(())
    }
}

/// One data entry of a command element: the values of its data parameters,
/// addressable by name.
#[derive(Clone, Debug)]
pub struct DataEntry {
    params: Vec<Parameter>,
}

impl DataEntry {
    fn new(def: &CommandElementDefinition) -> Self {
        Self {
            params: def.data_params.iter().map(Parameter::new).collect(),
        }
    }

    /// Looks up a parameter by name.
    pub fn param(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name() == name)
    }

    /// Looks up a parameter by name, mutably.
    pub fn param_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.iter_mut().find(|p| p.name() == name)
    }

    /// Iterates over the parameters in storage order.
    pub fn params(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }
}

/// A runtime command element: its definition plus the current data entries.
#[derive(Clone, Debug)]
pub struct CommandElement {
    def: CommandElementDefinition,
    entries: Vec<DataEntry>,
}

impl CommandElement {
    /// Creates an element; non-repeating elements get their single entry.
    pub fn new(def: &CommandElementDefinition) -> Self {
        let entries = if def.has_multiple_data_entries() {
            Vec::new()
        } else {
            vec![DataEntry::new(def)]
        };
        Self {
            def: def.clone(),
            entries,
        }
    }

    /// The element definition.
    pub fn def(&self) -> &CommandElementDefinition {
        &self.def
    }

    /// The element name.
    pub fn name(&self) -> &str {
        self.def.name()
    }

    /// The current data entries.
    pub fn entries(&self) -> &[DataEntry] {
        &self.entries
    }

    /// The data entry at `index`, mutably.
    pub fn entry_mut(&mut self, index: usize) -> Option<&mut DataEntry> {
        self.entries.get_mut(index)
    }

    /// Appends an empty data entry and returns it.
    pub fn push_entry(&mut self) -> &mut DataEntry {
        self.entries.push(DataEntry::new(&self.def));
        self.entries.last_mut().unwrap()
    }

    /// Grows the entry list to at least `count` entries.
    pub fn ensure_entries(&mut self, count: usize) {
        while self.entries.len() < count {
            self.push_entry();
        }
    }
}

/// A runtime command: a shared definition plus its element values.
#[derive(Clone, Debug)]
pub struct Command {
    def: Arc<CommandDefinition>,
    elements: Vec<CommandElement>,
}

impl Command {
    /// Creates a command with default-valued elements.
    pub fn new(def: Arc<CommandDefinition>) -> Self {
        let elements = def.elements.iter().map(CommandElement::new).collect();
        Self { def, elements }
    }

    /// The command definition.
    pub fn def(&self) -> &Arc<CommandDefinition> {
        &self.def
    }

    /// The command name.
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// The command's elements in storage order.
    pub fn elements(&self) -> &[CommandElement] {
        &self.elements
    }

    /// The command's elements, mutably.
    pub fn elements_mut(&mut self) -> &mut [CommandElement] {
        &mut self.elements
    }

    /// Looks up an element by name.
    pub fn element(&self, name: &str) -> Option<&CommandElement> {
        self.elements.iter().find(|e| e.name() == name)
    }

    /// Looks up an element by name, mutably.
    pub fn element_mut(&mut self, name: &str) -> Option<&mut CommandElement> {
        self.elements.iter_mut().find(|e| e.name() == name)
    }

    /// Iterates over every parameter of every data entry.
    pub fn all_params(&self) -> impl Iterator<Item = &Parameter> {
        self.elements
            .iter()
            .flat_map(|e| e.entries.iter())
            .flat_map(|entry| entry.params.iter())
    }

    /// The mugshot parameter, if the definition names one.
    pub fn mugshot_value(&self) -> Option<&Parameter> {
        let name = self.def.mugshot_parameter_name.as_deref()?;
        self.elements
            .iter()
            .filter(|e| !e.def.has_multiple_data_entries())
            .flat_map(|e| e.entries.iter())
            .find_map(|entry| entry.param(name))
    }

    /// Whether script execution ends after this command.
    ///
    /// With the default end type the script ends iff the command has at
    /// least one jump parameter and none of them currently holds a
    /// continue value.
    pub fn ends_script(&self) -> bool {
        match self.def.end_type {
            EndType::Always => true,
            EndType::Never => false,
            EndType::Default => {
                let mut has_jump = false;
                for param in self.all_params() {
                    if !param.def().is_jump {
                        continue;
                    }
                    has_jump = true;
                    if let Ok(value) = param.number() {
                        if param.def().jump_continue_values.contains(&value) {
                            return false;
                        }
                    }
                }
                has_jump
            }
        }
    }
}

/// The kind of a script directive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectiveKind {
    /// Active mugshot annotation.
    Mugshot,
    /// Script boundary annotation.
    Script,
    /// Archive boundary annotation.
    TextArchive,
    /// Separator between text boxes.
    TextBoxSeparator,
    /// Marker where an overlong text box was split.
    TextBoxSplit,
    /// Import of an external script.
    ImportScript,
    /// Insertion of a command by name.
    InsertCommand,
    /// Removal of a command by name.
    RemoveCommand,
}

/// A tagged directive with an optional value. Directives never appear in
/// binary form; they annotate scripts for external tooling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectiveElement {
    /// The directive kind.
    pub kind: DirectiveKind,
    /// The directive value, if any.
    pub value: Option<String>,
}

#[cfg(test)]
mod test_defs {
    use super::*;
    use crate::db::mask::MaskedByte;
    use crate::db::param::ParameterDefinition;

    pub fn jump_command(continue_values: &[i64]) -> Command {
        let mut target = ParameterDefinition::number("target", 1, 0, 8);
        target.is_jump = true;
        target.jump_continue_values = continue_values.iter().copied().collect();
        let def = CommandDefinition::builder("jump")
            .base(vec![MaskedByte::exact(0xE0)])
            .element(CommandElementDefinition::single(target))
            .build()
            .unwrap();
        Command::new(Arc::new(def))
    }
}

#[test]
fn test_parameter_type_is_fixed() {
    let def = ParameterDefinition::number("x", 0, 0, 8);
    let mut param = Parameter::new(&def);
    assert!(!param.is_string());
    param.set_number(5).unwrap();
    assert_eq!(param.number().unwrap(), 5);
    assert!(param.set_string("no").is_err());
    assert!(param.string().is_err());
    assert!(param.set_number(256).is_err());
}

#[test]
fn test_default_end_follows_jump_values() {
    let mut cmd = test_defs::jump_command(&[0]);
    // Default value 0 is a continue value.
    assert!(!cmd.ends_script());
    cmd.element_mut("target")
        .unwrap()
        .entry_mut(0)
        .unwrap()
        .param_mut("target")
        .unwrap()
        .set_number(3)
        .unwrap();
    assert!(cmd.ends_script());
}

#[test]
fn test_mugshot_lookup() {
    use crate::db::mask::MaskedByte;
    let def = CommandDefinition::builder("mugshot")
        .base(vec![MaskedByte::exact(0xE1)])
        .element(CommandElementDefinition::single(
            ParameterDefinition::number("face", 1, 0, 8),
        ))
        .mugshot("face")
        .build()
        .unwrap();
    let mut cmd = Command::new(std::sync::Arc::new(def));
    cmd.element_mut("face")
        .unwrap()
        .entry_mut(0)
        .unwrap()
        .param_mut("face")
        .unwrap()
        .set_number(7)
        .unwrap();
    assert_eq!(cmd.mugshot_value().unwrap().number().unwrap(), 7);
    // Hiding is independent of carrying a mugshot parameter.
    let hide = CommandDefinition::builder("clear")
        .base(vec![MaskedByte::exact(0xE2)])
        .hides_mugshot()
        .build()
        .unwrap();
    assert!(hide.hides_mugshot);
    assert!(Command::new(std::sync::Arc::new(hide)).mugshot_value().is_none());
}

#[test]
fn test_end_type_overrides() {
    use crate::db::mask::MaskedByte;
    let always = CommandDefinition::builder("end")
        .base(vec![MaskedByte::exact(0xE6)])
        .end_type(EndType::Always)
        .build()
        .unwrap();
    assert!(Command::new(Arc::new(always)).ends_script());
    let never = CommandDefinition::builder("nop")
        .base(vec![MaskedByte::exact(0x00)])
        .end_type(EndType::Never)
        .build()
        .unwrap();
    assert!(!Command::new(Arc::new(never)).ends_script());
    // Default with no jump parameters never ends the script.
    let plain = CommandDefinition::builder("plain")
        .base(vec![MaskedByte::exact(0x01)])
        .build()
        .unwrap();
    assert!(!Command::new(Arc::new(plain)).ends_script());
}
