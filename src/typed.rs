// Plexus - Embedded telemetry client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Typed command schemas
//!
//! A device can describe the commands it accepts together with typed
//! parameters. The dashboard renders a control per parameter: a slider for
//! a bounded number, a toggle for a boolean, a dropdown for an enum. The
//! schemas travel in every heartbeat under `"commands"`.
//!
//! # Schema format
//!
//! ```text
//! [{"name":"set_speed","description":"Set motor speed","params":[
//!   {"name":"rpm","type":"float","unit":"rpm","min":0.0,"max":10000.0,"required":true},
//!   {"name":"mode","type":"enum","required":false,"choices":["idle","run"]}
//! ]}]
//! ```

use crate::client::Client;
use crate::codec;
use crate::config::{
    MAX_COMMAND_PARAMS, MAX_ENUM_CHOICES, MAX_METADATA_LEN, MAX_STRING_VALUE_LEN,
    MAX_TYPED_COMMANDS,
};
use crate::error::{InputError, Result};
use crate::hal::Hal;
use crate::metric::validate_name;
use serde::Serialize;

/// Parameter type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Float,
    Int,
    String,
    Bool,
    Enum,
}

impl ParamType {
    fn is_numeric(self) -> bool {
        matches!(self, Self::Float | Self::Int)
    }
}

/// Default value of a parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

/// One parameter of a typed command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
    pub required: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

impl ParamDescriptor {
    /// Optional parameter of type `param_type`
    pub fn new(name: &str, param_type: ParamType) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: None,
            unit: None,
            min: None,
            max: None,
            step: None,
            default: None,
            required: false,
            choices: Vec::new(),
        }
    }

    /// Enum parameter choosing among `choices`
    pub fn choice(name: &str, choices: &[&str]) -> Self {
        Self {
            choices: choices.iter().map(|c| c.to_string()).collect(),
            ..Self::new(name, ParamType::Enum)
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    /// Inclusive bounds; numeric types only
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Slider increment; numeric types only
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_default(mut self, value: ParamValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn validate(&self) -> std::result::Result<(), InputError> {
        validate_name(&self.name)?;
        check_len(self.description.as_deref(), MAX_STRING_VALUE_LEN)?;
        check_len(self.unit.as_deref(), MAX_METADATA_LEN)?;

        let numeric = self.param_type.is_numeric();
        if !numeric && (self.min.is_some() || self.max.is_some() || self.step.is_some()) {
            return Err(self.invalid("range on a non-numeric parameter"));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if !(min <= max) {
                return Err(self.invalid("min above max"));
            }
        }
        if matches!(self.step, Some(step) if !(step > 0.0)) {
            return Err(self.invalid("step must be positive"));
        }

        if self.param_type == ParamType::Enum {
            if self.choices.is_empty() || self.choices.len() > MAX_ENUM_CHOICES {
                return Err(self.invalid(&format!("enum needs 1 to {} choices", MAX_ENUM_CHOICES)));
            }
            for choice in &self.choices {
                if choice.is_empty() {
                    return Err(self.invalid("empty choice"));
                }
                check_len(Some(choice), MAX_METADATA_LEN)?;
            }
        } else if !self.choices.is_empty() {
            return Err(self.invalid("choices on a non-enum parameter"));
        }

        let default_fits = match (&self.default, self.param_type) {
            (None, _) => true,
            (Some(ParamValue::Number(v)), ParamType::Float | ParamType::Int) => {
                self.min.map_or(true, |min| *v >= min) && self.max.map_or(true, |max| *v <= max)
            }
            (Some(ParamValue::Bool(_)), ParamType::Bool) => true,
            (Some(ParamValue::Text(_)), ParamType::String) => true,
            (Some(ParamValue::Text(v)), ParamType::Enum) => self.choices.contains(v),
            _ => false,
        };
        if !default_fits {
            return Err(self.invalid("default does not match the parameter"));
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> InputError {
        InputError::InvalidArgument(format!("parameter {}: {}", self.name, reason))
    }
}

/// A command the device accepts, with its parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypedCommand {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub params: Vec<ParamDescriptor>,
}

impl TypedCommand {
    /// Command without parameters
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            params: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_param(mut self, param: ParamDescriptor) -> Self {
        self.params.push(param);
        self
    }

    /// Check names, bounds and defaults
    pub fn validate(&self) -> std::result::Result<(), InputError> {
        validate_name(&self.name)?;
        check_len(self.description.as_deref(), MAX_STRING_VALUE_LEN)?;
        if self.params.len() > MAX_COMMAND_PARAMS {
            return Err(InputError::InvalidArgument(format!(
                "command {}: {} parameters, maximum is {}",
                self.name,
                self.params.len(),
                MAX_COMMAND_PARAMS
            )));
        }
        for (i, param) in self.params.iter().enumerate() {
            param.validate()?;
            if self.params[..i].iter().any(|p| p.name == param.name) {
                return Err(param.invalid("duplicate name"));
            }
        }
        Ok(())
    }
}

fn check_len(value: Option<&str>, max: usize) -> std::result::Result<(), InputError> {
    match value {
        Some(s) if s.len() >= max => Err(InputError::StringTooLong {
            len: s.len(),
            max: max - 1,
        }),
        _ => Ok(()),
    }
}

impl<H: Hal> Client<H> {
    /// Declare a typed command; it is advertised from the next heartbeat on
    ///
    /// Fails on an invalid descriptor, a name already registered, or a
    /// full registry.
    pub fn register_typed_command(&mut self, command: TypedCommand) -> Result<()> {
        command.validate()?;
        if self.typed_commands.iter().any(|c| c.name == command.name) {
            return Err(InputError::InvalidArgument(format!(
                "command {} already registered",
                command.name
            ))
            .into());
        }
        if self.typed_commands.len() >= MAX_TYPED_COMMANDS {
            return Err(InputError::QueueFull {
                capacity: MAX_TYPED_COMMANDS,
            }
            .into());
        }
        log::debug!(
            "Registered typed command {} ({} params)",
            command.name,
            command.params.len()
        );
        self.typed_commands.push(command);
        Ok(())
    }

    /// Registered typed commands
    pub fn typed_commands(&self) -> &[TypedCommand] {
        &self.typed_commands
    }

    /// JSON array of all typed command schemas
    pub fn typed_commands_schema(&self) -> Result<String> {
        let mut buf = Vec::new();
        codec::encode_bounded(&self.typed_commands, &mut buf, self.config.json_buffer_size)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::hal::MockHal;

    fn client() -> Client<MockHal> {
        Client::with_config(MockHal::new(), "key", "motor-001", ClientConfig::manual_flush())
            .unwrap()
    }

    fn set_speed() -> TypedCommand {
        TypedCommand::new("set_speed")
            .with_description("Set motor speed")
            .with_param(
                ParamDescriptor::new("rpm", ParamType::Float)
                    .with_unit("rpm")
                    .with_range(0.0, 10_000.0)
                    .required(),
            )
            .with_param(
                ParamDescriptor::new("ramp_time", ParamType::Float)
                    .with_range(0.1, 10.0)
                    .with_step(0.1)
                    .with_default(ParamValue::Number(1.0)),
            )
    }

    #[test]
    fn test_schema_document() {
        let mut c = client();
        c.register_typed_command(set_speed()).unwrap();
        c.register_typed_command(
            TypedCommand::new("set_mode").with_param(
                ParamDescriptor::choice("mode", &["idle", "run", "calibrate"])
                    .with_default(ParamValue::Text("idle".into())),
            ),
        )
        .unwrap();

        let schema = c.typed_commands_schema().unwrap();
        let v: serde_json::Value = serde_json::from_str(&schema).unwrap();
        assert_eq!(v.as_array().unwrap().len(), 2);

        let rpm = &v[0]["params"][0];
        assert_eq!(v[0]["name"], "set_speed");
        assert_eq!(v[0]["description"], "Set motor speed");
        assert_eq!(rpm["type"], "float");
        assert_eq!(rpm["unit"], "rpm");
        assert_eq!(rpm["max"], 10_000.0);
        assert_eq!(rpm["required"], true);
        assert!(rpm.get("default").is_none());
        assert_eq!(v[0]["params"][1]["default"], 1.0);
        assert_eq!(v[0]["params"][1]["step"], 0.1);

        let mode = &v[1]["params"][0];
        assert!(v[1].get("description").is_none());
        assert_eq!(mode["type"], "enum");
        assert_eq!(mode["choices"][2], "calibrate");
        assert_eq!(mode["default"], "idle");
        assert!(mode.get("min").is_none());
    }

    #[test]
    fn test_empty_schema() {
        assert_eq!(client().typed_commands_schema().unwrap(), "[]");
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut c = client();
        c.register_typed_command(set_speed()).unwrap();
        assert!(matches!(
            c.register_typed_command(set_speed()),
            Err(crate::PlexusError::Input(InputError::InvalidArgument(_)))
        ));
        assert_eq!(c.typed_commands().len(), 1);
    }

    #[test]
    fn test_registry_full() {
        let mut c = client();
        for i in 0..MAX_TYPED_COMMANDS {
            c.register_typed_command(TypedCommand::new(&format!("cmd{}", i)))
                .unwrap();
        }
        assert!(matches!(
            c.register_typed_command(TypedCommand::new("one_more")),
            Err(crate::PlexusError::Input(InputError::QueueFull { .. }))
        ));
    }

    #[test]
    fn test_invalid_descriptors() {
        let too_many = (0..=MAX_COMMAND_PARAMS).fold(TypedCommand::new("wide"), |cmd, i| {
            cmd.with_param(ParamDescriptor::new(&format!("p{}", i), ParamType::Int))
        });
        let cases = [
            TypedCommand::new(""),
            too_many,
            TypedCommand::new("dup")
                .with_param(ParamDescriptor::new("x", ParamType::Int))
                .with_param(ParamDescriptor::new("x", ParamType::Float)),
            TypedCommand::new("inverted")
                .with_param(ParamDescriptor::new("x", ParamType::Float).with_range(5.0, 1.0)),
            TypedCommand::new("ranged_bool")
                .with_param(ParamDescriptor::new("on", ParamType::Bool).with_range(0.0, 1.0)),
            TypedCommand::new("no_choices").with_param(ParamDescriptor::choice("mode", &[])),
            TypedCommand::new("bad_default").with_param(
                ParamDescriptor::choice("mode", &["a", "b"]).with_default(ParamValue::Text("c".into())),
            ),
            TypedCommand::new("out_of_range").with_param(
                ParamDescriptor::new("x", ParamType::Int)
                    .with_range(0.0, 10.0)
                    .with_default(ParamValue::Number(11.0)),
            ),
            TypedCommand::new("wrong_kind").with_param(
                ParamDescriptor::new("on", ParamType::Bool).with_default(ParamValue::Number(1.0)),
            ),
        ];
        let mut c = client();
        for case in cases {
            assert!(c.register_typed_command(case.clone()).is_err(), "{:?}", case.name);
        }
        assert!(c.typed_commands().is_empty());
    }

    #[test]
    fn test_schema_overflow() {
        let config = ClientConfig {
            json_buffer_size: 64,
            ..ClientConfig::manual_flush()
        };
        let mut c = Client::with_config(MockHal::new(), "key", "dev", config).unwrap();
        c.register_typed_command(set_speed()).unwrap();
        assert!(matches!(
            c.typed_commands_schema(),
            Err(crate::PlexusError::Encode(_))
        ));
    }
}
