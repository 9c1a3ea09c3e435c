//! Loading command databases from description files.
//!
//! Descriptions are JSON or YAML (chosen by file extension) and cover every
//! definition field; see `demos/` for a worked example.
use super::command::{CommandDefinition, CommandElementDefinition, EndType};
use super::mask::MaskedByte;
use super::param::{OffsetType, ParameterDefinition, StringSubDefinition, StringUnit};
use super::CommandDatabase;
use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseFile {
    name: String,
    commands: Vec<CommandFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandFile {
    name: String,
    #[serde(default)]
    description: String,
    base: Vec<String>,
    #[serde(default)]
    end: EndFile,
    #[serde(default)]
    prints: bool,
    #[serde(default)]
    mugshot: Option<String>,
    #[serde(default)]
    hides_mugshot: bool,
    #[serde(default)]
    priority_length: u32,
    #[serde(default)]
    rewind: u32,
    #[serde(default)]
    look_ahead: bool,
    #[serde(default)]
    elements: Vec<ElementFile>,
}

#[derive(Debug, Default, Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum EndFile {
    #[default]
    Default,
    Always,
    Never,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ElementFile {
    #[serde(default)]
    length: Option<ParamFile>,
    params: Vec<ParamFile>,
    #[serde(default)]
    groups: Vec<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ParamFile {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    offset: i64,
    #[serde(default)]
    shift: u32,
    #[serde(default)]
    bits: u32,
    #[serde(default)]
    add: i64,
    #[serde(default)]
    jump: bool,
    #[serde(default)]
    offset_type: OffsetFile,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    value_encoding: Option<String>,
    #[serde(default, rename = "continue")]
    continue_values: Vec<i64>,
    #[serde(default)]
    string: Option<StringFile>,
}

#[derive(Debug, Default, Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum OffsetFile {
    #[default]
    Start,
    End,
    Label,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StringFile {
    #[serde(default)]
    offset: i64,
    unit: UnitFile,
    #[serde(default)]
    fixed_length: usize,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum UnitFile {
    Char,
    Byte,
}

/// Parses a `"VV"` or `"VV/MM"` hex token into a masked byte.
fn parse_masked_byte(token: &str) -> Result<MaskedByte> {
    let (value, mask) = match token.split_once('/') {
        Some((value, mask)) => (value, Some(mask)),
        None => (token, None),
    };
    let value = u8::from_str_radix(value.trim(), 16)
        .map_err(|_| anyhow::anyhow!("Invalid base byte token {:?}", token))?;
    let mask = match mask {
        Some(mask) => u8::from_str_radix(mask.trim(), 16)
            .map_err(|_| anyhow::anyhow!("Invalid base byte token {:?}", token))?,
        None => 0xFF,
    };
    Ok(MaskedByte::new(value, mask))
}

fn build_param(file: ParamFile) -> ParameterDefinition {
    ParameterDefinition {
        name: file.name,
        description: file.description,
        offset: file.offset,
        shift: file.shift,
        bits: file.bits,
        add: file.add,
        is_jump: file.jump,
        offset_type: match file.offset_type {
            OffsetFile::Start => OffsetType::Start,
            OffsetFile::End => OffsetType::End,
            OffsetFile::Label => OffsetType::Label,
        },
        relative_label: file.label,
        value_encoding_name: file.value_encoding,
        jump_continue_values: file.continue_values.into_iter().collect(),
        string_def: file.string.map(|s| StringSubDefinition {
            offset: s.offset,
            unit: match s.unit {
                UnitFile::Char => StringUnit::Char,
                UnitFile::Byte => StringUnit::Byte,
            },
            fixed_length: s.fixed_length,
        }),
    }
}

fn build_command(file: CommandFile) -> Result<CommandDefinition> {
    let mut builder = CommandDefinition::builder(file.name.as_str())
        .description(file.description)
        .end_type(match file.end {
            EndFile::Default => EndType::Default,
            EndFile::Always => EndType::Always,
            EndFile::Never => EndType::Never,
        })
        .priority_length(file.priority_length)
        .rewind(file.rewind);
    let mut base = Vec::with_capacity(file.base.len());
    for token in &file.base {
        base.push(parse_masked_byte(token)?);
    }
    builder = builder.base(base);
    if file.prints {
        builder = builder.prints();
    }
    if let Some(mugshot) = file.mugshot {
        builder = builder.mugshot(mugshot);
    }
    if file.hides_mugshot {
        builder = builder.hides_mugshot();
    }
    if file.look_ahead {
        builder = builder.look_ahead();
    }
    for element in file.elements {
        let params: Vec<_> = element.params.into_iter().map(build_param).collect();
        let def = match element.length {
            Some(length) => {
                CommandElementDefinition::multi(build_param(length), params, element.groups)
            }
            None => {
                let mut params = params;
                if params.len() != 1 {
                    return Err(anyhow::anyhow!(
                        "Element of command {:?} without a length parameter must have exactly one parameter",
                        file.name
                    ));
                }
                CommandElementDefinition::single(params.pop().unwrap())
            }
        };
        builder = builder.element(def);
    }
    builder
        .build()
        .with_context(|| format!("In command {:?}", file.name))
}

fn build_database(file: DatabaseFile) -> Result<CommandDatabase> {
    let mut db = CommandDatabase::new(file.name);
    for command in file.commands {
        let def = build_command(command)?;
        db.add(def)?;
    }
    Ok(db)
}

/// Parses a database description from JSON text.
pub fn from_json(text: &str) -> Result<CommandDatabase> {
    let file: DatabaseFile =
        serde_json::from_str(text).context("Failed to parse database description")?;
    build_database(file)
}

/// Parses a database description from YAML text.
pub fn from_yaml(text: &str) -> Result<CommandDatabase> {
    let file: DatabaseFile =
        serde_yaml_ng::from_str(text).context("Failed to parse database description")?;
    build_database(file)
}

/// Loads a database description file; the format follows the extension
/// (`.json` for JSON, anything else for YAML).
pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<CommandDatabase> {
    let path = path.as_ref();
    let text = crate::utils::files::read_file_to_string(path)?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let db = if is_json {
        from_json(&text)
    } else {
        from_yaml(&text)
    };
    db.with_context(|| format!("In database {}", path.display()))
}

#[test]
fn test_parse_masked_byte_tokens() {
    assert_eq!(parse_masked_byte("E5").unwrap(), MaskedByte::exact(0xE5));
    assert_eq!(
        parse_masked_byte("E0/F0").unwrap(),
        MaskedByte::new(0xE0, 0xF0)
    );
    assert!(parse_masked_byte("XY").is_err());
}

#[test]
fn test_load_yaml_database() {
    let db = from_yaml(
        r#"
name: demo
commands:
  - name: end
    base: ["E6"]
    end: always
  - name: jump
    base: ["E4"]
    elements:
      - params:
          - name: target
            offset: 1
            bits: 16
            jump: true
            continue: [65535]
  - name: menu
    base: ["E8"]
    priority_length: 1
    elements:
      - length:
          name: count
          offset: 1
          bits: 8
        params:
          - name: option
            offset: 0
            bits: 16
            offset_type: end
        groups: [1]
"#,
    )
    .unwrap();
    assert_eq!(db.name(), "demo");
    assert_eq!(db.len(), 3);
    let jump = &db.find_by_name("jump")[0];
    let target = &jump.elements[0].data_params[0];
    assert!(target.is_jump);
    assert!(target.jump_continue_values.contains(&0xFFFF));
    let menu = &db.find_by_name("menu")[0];
    assert!(menu.elements[0].has_multiple_data_entries());
    assert_eq!(menu.priority_length, 1);
}

#[test]
fn test_load_json_database() {
    let db = from_json(
        r#"{
  "name": "demo",
  "commands": [
    {"name": "end", "base": ["E6"], "end": "always"}
  ]
}"#,
    )
    .unwrap();
    assert_eq!(db.len(), 1);
}
