use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::errors::ValidationError;

// ============================================================================
// Extension Models
// ============================================================================

/// Which engine runs the registered function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtensionKind {
    Transformation,
    Validation,
    Interpolation,
}

impl ExtensionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionKind::Transformation => "Transformation",
            ExtensionKind::Validation => "Validation",
            ExtensionKind::Interpolation => "Interpolation",
        }
    }
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtensionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Transformation" => Ok(ExtensionKind::Transformation),
            "Validation" => Ok(ExtensionKind::Validation),
            "Interpolation" => Ok(ExtensionKind::Interpolation),
            other => Err(format!("unknown extension kind: {}", other)),
        }
    }
}

/// When an extension fires: on change of a timeseries, or on a schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TriggerType {
    OnChange,
    OnTime,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::OnChange => "OnChange",
            TriggerType::OnTime => "OnTime",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OnChange" => Ok(TriggerType::OnChange),
            "OnTime" => Ok(TriggerType::OnTime),
            other => Err(format!("unknown trigger type: {}", other)),
        }
    }
}

/// One trigger declaration: fire `trigger_type` for each target listed in
/// `trigger_on` (timeseries ids for OnChange, schedule specs for OnTime)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDeclaration {
    pub trigger_type: TriggerType,
    pub trigger_on: Vec<String>,
}

/// Canonical trigger form: one declaration per trigger type, targets
/// deduplicated and sorted. This is exactly the shape the trigger index
/// reconstructs from stored rows, so cached and rebuilt views agree.
pub fn normalize_triggers(triggers: Vec<TriggerDeclaration>) -> Vec<TriggerDeclaration> {
    let mut by_type: std::collections::BTreeMap<TriggerType, Vec<String>> =
        std::collections::BTreeMap::new();
    for declaration in triggers {
        by_type
            .entry(declaration.trigger_type)
            .or_default()
            .extend(declaration.trigger_on);
    }
    by_type
        .into_iter()
        .map(|(trigger_type, mut trigger_on)| {
            trigger_on.sort();
            trigger_on.dedup();
            TriggerDeclaration {
                trigger_type,
                trigger_on,
            }
        })
        .collect()
}

/// An unresolved variable from the create document. Exactly one resolution
/// source is required; `timeseriesId` overrides a metadata-based resolution
/// when both are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableSpec {
    pub variable_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_ids: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeseries_id: Option<String>,
}

impl VariableSpec {
    pub fn has_source(&self) -> bool {
        self.metadata.is_some() || self.metadata_ids.is_some() || self.timeseries_id.is_some()
    }
}

/// A variable bound to its resolved timeseries document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub variable_id: String,
    pub timeseries: Value,
}

/// The opaque payload blob: variables plus the input/output id lists.
/// Serialized whole into the `data` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionData {
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub input_variables: Vec<String>,
    #[serde(default)]
    pub output_variables: Vec<String>,
}

/// Durable extension row as stored in the `extensions` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionRecord {
    pub extension_id: String,
    pub kind: ExtensionKind,
    pub function: String,
    pub data: ExtensionData,
    pub options: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl ExtensionRecord {
    /// Assemble the full view from the row and its trigger declarations
    pub fn into_extension(self, trigger: Vec<TriggerDeclaration>) -> Extension {
        Extension {
            extension_id: self.extension_id,
            kind: self.kind,
            function: self.function,
            variables: self.data.variables,
            input_variables: self.data.input_variables,
            output_variables: self.data.output_variables,
            trigger,
            options: self.options,
            created_at: self.created_at,
        }
    }
}

/// The assembled extension: store row plus trigger list. This is the HTTP
/// representation, with the payload fields hoisted to the top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub extension_id: String,
    #[serde(rename = "extension")]
    pub kind: ExtensionKind,
    pub function: String,
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub input_variables: Vec<String>,
    #[serde(default)]
    pub output_variables: Vec<String>,
    pub trigger: Vec<TriggerDeclaration>,
    #[serde(default)]
    pub options: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Extension {
    pub fn record(&self) -> ExtensionRecord {
        ExtensionRecord {
            extension_id: self.extension_id.clone(),
            kind: self.kind,
            function: self.function.clone(),
            data: ExtensionData {
                variables: self.variables.clone(),
                input_variables: self.input_variables.clone(),
                output_variables: self.output_variables.clone(),
            },
            options: self.options.clone(),
            created_at: self.created_at,
        }
    }

    pub fn summary(&self) -> ExtensionSummary {
        ExtensionSummary::from(&self.record())
    }
}

/// Compact extension body kept in the reverse index and dispatch queue.
/// Carries everything a consumer needs except the trigger list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSummary {
    pub extension_id: String,
    #[serde(rename = "extension")]
    pub kind: ExtensionKind,
    pub function: String,
    pub data: ExtensionData,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl From<&ExtensionRecord> for ExtensionSummary {
    fn from(record: &ExtensionRecord) -> Self {
        Self {
            extension_id: record.extension_id.clone(),
            kind: record.kind,
            function: record.function.clone(),
            data: record.data.clone(),
            options: record.options.clone(),
        }
    }
}

/// One OnTime schedule target with every extension registered on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerGroup {
    pub trigger_on: String,
    pub extensions: Vec<ExtensionSummary>,
}

// ============================================================================
// Create Document
// ============================================================================

/// The extension-create document accepted by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExtension {
    pub extension_id: String,
    #[serde(rename = "extension")]
    pub kind: ExtensionKind,
    pub function: String,
    #[serde(default)]
    pub variables: Vec<VariableSpec>,
    #[serde(default)]
    pub input_variables: Vec<String>,
    #[serde(default)]
    pub output_variables: Vec<String>,
    #[serde(default)]
    pub trigger: Vec<TriggerDeclaration>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl CreateExtension {
    /// Structural validation, performed before any resolution or write.
    /// Input/output lists must reference declared variables only.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.extension_id.trim().is_empty() {
            return Err(ValidationError::MissingField("extensionId".to_string()));
        }

        if self.variables.is_empty() {
            return Err(ValidationError::MissingField("variables".to_string()));
        }

        let mut declared = HashSet::new();
        for variable in &self.variables {
            if variable.variable_id.trim().is_empty() {
                return Err(ValidationError::InvalidFieldValue {
                    field: "variables".to_string(),
                    reason: "each variable should have a variableId".to_string(),
                });
            }
            if !variable.has_source() {
                return Err(ValidationError::InvalidFieldValue {
                    field: "variables".to_string(),
                    reason: format!(
                        "variable {} should have a metadata, metadataIds or timeseriesId",
                        variable.variable_id
                    ),
                });
            }
            if !declared.insert(variable.variable_id.as_str()) {
                return Err(ValidationError::DuplicateVariable(
                    variable.variable_id.clone(),
                ));
            }
        }

        for variable_id in &self.input_variables {
            if !declared.contains(variable_id.as_str()) {
                return Err(ValidationError::UndeclaredVariable {
                    list: "inputVariables".to_string(),
                    variable_id: variable_id.clone(),
                });
            }
        }
        for variable_id in &self.output_variables {
            if !declared.contains(variable_id.as_str()) {
                return Err(ValidationError::UndeclaredVariable {
                    list: "outputVariables".to_string(),
                    variable_id: variable_id.clone(),
                });
            }
        }

        if self.trigger.is_empty() {
            return Err(ValidationError::MissingTrigger);
        }
        for declaration in &self.trigger {
            if declaration.trigger_on.is_empty() {
                return Err(ValidationError::MissingTriggerTargets);
            }
        }

        Ok(())
    }
}
