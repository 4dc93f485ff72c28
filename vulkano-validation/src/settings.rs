//! Layer configuration.
//!
//! Settings reach the layer as key-value pairs, either from the loader's layer-settings interface
//! or from a settings file with one `key = value` per line. Keys may carry the
//! `khronos_validation.` prefix used by settings files.
//!
//! ```
//! use vulkano_validation::{GpuValidation, LayerSettings};
//!
//! let settings = LayerSettings::parse(
//!     "# layer settings\n\
//!      khronos_validation.gpu_validation = all\n\
//!      khronos_validation.gpu_validation_reserve_binding_slot = on\n\
//!      khronos_validation.disables = query_validation,object_in_use\n",
//! )
//! .unwrap();
//!
//! assert_eq!(settings.gpu_validation, GpuValidation::All);
//! assert!(settings.disabled.query_validation);
//! assert_eq!(settings.max_bound_descriptor_sets(8), 7);
//! ```

use std::{
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
};

const KEY_PREFIX: &str = "khronos_validation.";

/// Parameters that control which checks the layer performs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LayerSettings {
    /// Whether shader instrumentation is enabled. Instrumentation itself is performed by an
    /// external collaborator; the core only adjusts what it reports to the application.
    ///
    /// The default value is [`GpuValidation::Off`].
    pub gpu_validation: GpuValidation,

    /// When instrumentation is enabled, reserves the last descriptor set slot for it.
    ///
    /// The default value is `false`.
    pub gpu_validation_reserve_binding_slot: bool,

    /// Checks that are turned off.
    pub disabled: DisabledChecks,

    /// If set, a given VUID is reported at most this many times.
    ///
    /// The default value is `None`.
    pub duplicate_message_limit: Option<u32>,
}

/// Whether shader instrumentation is enabled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum GpuValidation {
    #[default]
    Off,
    All,
}

/// Groups of checks that can be turned off.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DisabledChecks {
    pub query_validation: bool,
    pub object_in_use: bool,
    pub image_layout_validation: bool,
    pub idle_descriptor_set: bool,
    pub command_buffer_state: bool,
    pub push_constant_range: bool,
}

impl DisabledChecks {
    fn toggle_mut(&mut self, name: &str) -> Option<&mut bool> {
        Some(match name {
            "query_validation" => &mut self.query_validation,
            "object_in_use" => &mut self.object_in_use,
            "image_layout_validation" => &mut self.image_layout_validation,
            "idle_descriptor_set" => &mut self.idle_descriptor_set,
            "command_buffer_state" => &mut self.command_buffer_state,
            "push_constant_range" => &mut self.push_constant_range,
            _ => return None,
        })
    }
}

impl LayerSettings {
    /// Builds settings from key-value pairs. Unknown keys are ignored with a warning.
    pub fn from_key_values<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, SettingsError> {
        let mut settings = Self::default();

        for (key, value) in pairs {
            settings.apply(key.trim(), value.trim())?;
        }

        Ok(settings)
    }

    /// Parses a settings file: one `key = value` per line, `#` starts a comment.
    pub fn parse(text: &str) -> Result<Self, SettingsError> {
        let mut pairs = Vec::new();

        for (line_index, line) in text.lines().enumerate() {
            let line = match line.split_once('#') {
                Some((before, _)) => before,
                None => line,
            }
            .trim();

            if line.is_empty() {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or(SettingsError::MalformedLine { line: line_index + 1 })?;
            pairs.push((key, value));
        }

        Self::from_key_values(pairs)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        let key = key.strip_prefix(KEY_PREFIX).unwrap_or(key);

        match key {
            "gpu_validation" => {
                self.gpu_validation = match value {
                    "off" | "false" => GpuValidation::Off,
                    "all" | "true" => GpuValidation::All,
                    _ => return Err(SettingsError::invalid_value(key, value)),
                };
            }
            "gpu_validation_reserve_binding_slot" => {
                self.gpu_validation_reserve_binding_slot = parse_switch(key, value)?;
            }
            "duplicate_message_limit" => {
                let limit = value
                    .parse::<u32>()
                    .map_err(|_| SettingsError::invalid_value(key, value))?;
                self.duplicate_message_limit = (limit != 0).then_some(limit);
            }
            "disables" | "enables" => {
                let disable = key == "disables";

                for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                    match self.disabled.toggle_mut(name) {
                        Some(toggle) => *toggle = disable,
                        None => log::warn!("unknown validation toggle `{}` in `{}`", name, key),
                    }
                }
            }
            _ => {
                if let Some(name) = key.strip_prefix("disable_") {
                    if let Some(toggle) = self.disabled.toggle_mut(name) {
                        *toggle = parse_switch(key, value)?;
                        return Ok(());
                    }
                }

                log::warn!("ignoring unknown layer setting `{}`", key);
            }
        }

        Ok(())
    }

    /// Returns the value of `maxBoundDescriptorSets` to report to the application, given the value
    /// reported by the driver.
    #[inline]
    pub fn max_bound_descriptor_sets(&self, reported: u32) -> u32 {
        if self.gpu_validation == GpuValidation::All && self.gpu_validation_reserve_binding_slot {
            reported.saturating_sub(1)
        } else {
            reported
        }
    }
}

fn parse_switch(key: &str, value: &str) -> Result<bool, SettingsError> {
    match value {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        _ => Err(SettingsError::invalid_value(key, value)),
    }
}

/// Error that can happen when parsing layer settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettingsError {
    /// A line of a settings file has no `=`.
    MalformedLine { line: usize },

    /// A recognised key has a value outside its allowed set.
    InvalidValue { key: String, value: String },
}

impl SettingsError {
    fn invalid_value(key: &str, value: &str) -> Self {
        Self::InvalidValue {
            key: key.to_owned(),
            value: value.to_owned(),
        }
    }
}

impl Error for SettingsError {}

impl Display for SettingsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::MalformedLine { line } => {
                write!(f, "line {} of the settings is not of the form `key = value`", line)
            }
            Self::InvalidValue { key, value } => {
                write!(f, "`{}` is not a valid value for `{}`", value, key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{GpuValidation, LayerSettings, SettingsError};

    #[test]
    fn defaults() {
        let settings = LayerSettings::default();

        assert_eq!(settings.gpu_validation, GpuValidation::Off);
        assert!(!settings.disabled.object_in_use);
        assert_eq!(settings.max_bound_descriptor_sets(8), 8);
    }

    #[test]
    fn reserve_binding_slot() {
        let settings = LayerSettings::from_key_values([
            ("gpu_validation", "all"),
            ("gpu_validation_reserve_binding_slot", "on"),
        ])
        .unwrap();
        assert_eq!(settings.max_bound_descriptor_sets(4), 3);

        // Reserving without instrumentation leaves the limit alone.
        let settings =
            LayerSettings::from_key_values([("gpu_validation_reserve_binding_slot", "on")])
                .unwrap();
        assert_eq!(settings.max_bound_descriptor_sets(4), 4);
    }

    #[test]
    fn toggles() {
        let settings = LayerSettings::parse(
            "khronos_validation.disables = image_layout_validation, push_constant_range\n\
             disable_idle_descriptor_set = true # trailing comment\n\
             khronos_validation.unknown_key = 3\n",
        )
        .unwrap();

        assert!(settings.disabled.image_layout_validation);
        assert!(settings.disabled.push_constant_range);
        assert!(settings.disabled.idle_descriptor_set);
        assert!(!settings.disabled.command_buffer_state);
    }

    #[test]
    fn errors() {
        assert_eq!(
            LayerSettings::parse("gpu_validation all"),
            Err(SettingsError::MalformedLine { line: 1 }),
        );
        assert!(matches!(
            LayerSettings::from_key_values([("gpu_validation", "sometimes")]),
            Err(SettingsError::InvalidValue { .. }),
        ));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserialize() {
        let settings: LayerSettings =
            serde_json::from_str(r#"{ "gpu_validation": "all", "disabled": { "object_in_use": true } }"#)
                .unwrap();

        assert_eq!(settings.gpu_validation, GpuValidation::All);
        assert!(settings.disabled.object_in_use);
    }
}
