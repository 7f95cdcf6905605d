use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::model::{Application, ApplicationElement, VersionOrTimestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationChangeType {
    EndpointAdded,
    EndpointRemoved,
    EndpointChanged,
    ParameterAdded,
    ParameterRemoved,
    ParameterChanged,
}

impl ApplicationChangeType {
    pub const ALL: [ApplicationChangeType; 6] = [
        ApplicationChangeType::EndpointAdded,
        ApplicationChangeType::EndpointRemoved,
        ApplicationChangeType::EndpointChanged,
        ApplicationChangeType::ParameterAdded,
        ApplicationChangeType::ParameterRemoved,
        ApplicationChangeType::ParameterChanged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationChangeType::EndpointAdded => "ENDPOINT_ADDED",
            ApplicationChangeType::EndpointRemoved => "ENDPOINT_REMOVED",
            ApplicationChangeType::EndpointChanged => "ENDPOINT_CHANGED",
            ApplicationChangeType::ParameterAdded => "PARAMETER_ADDED",
            ApplicationChangeType::ParameterRemoved => "PARAMETER_REMOVED",
            ApplicationChangeType::ParameterChanged => "PARAMETER_CHANGED",
        }
    }
}

impl fmt::Display for ApplicationChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("Unknown application change type: {}", s))
    }
}

/// One observed difference between two application snapshots
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApplicationChange {
    pub change_type: ApplicationChangeType,
    pub element: ApplicationElement,
    /// Name of the differing property for `*_CHANGED`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

impl ApplicationChange {
    pub fn new(change_type: ApplicationChangeType, element: ApplicationElement) -> Self {
        Self {
            change_type,
            element,
            property: None,
        }
    }

    pub fn changed(
        change_type: ApplicationChangeType,
        element: ApplicationElement,
        property: impl Into<String>,
    ) -> Self {
        Self {
            change_type,
            element,
            property: Some(property.into()),
        }
    }
}

impl fmt::Display for ApplicationChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.change_type, self.element)?;
        if let Some(property) = &self.property {
            write!(f, " ({})", property)?;
        }
        Ok(())
    }
}

/// Outcome of comparing a submitted application against a stored one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApplicationChangeReport {
    pub applied_changes: BTreeSet<ApplicationChange>,
    pub ignored_changes: BTreeSet<ApplicationChange>,
    /// The application as it results from the comparison
    pub updated_application: Application,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_version: Option<VersionOrTimestamp>,
    pub after_version: VersionOrTimestamp,
}

impl ApplicationChangeReport {
    /// Every endpoint of the application counts as added
    pub fn all_of(application: Application) -> Self {
        let applied_changes = application
            .endpoints
            .iter()
            .map(|e| {
                ApplicationChange::new(
                    ApplicationChangeType::EndpointAdded,
                    ApplicationElement::endpoint(e.id()),
                )
            })
            .collect();

        let after_version = application.version.clone();
        Self {
            applied_changes,
            ignored_changes: BTreeSet::new(),
            updated_application: application,
            before_version: None,
            after_version,
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.applied_changes.is_empty()
    }

    pub fn applied_of_type(
        &self,
        change_type: ApplicationChangeType,
    ) -> impl Iterator<Item = &ApplicationChange> {
        self.applied_changes
            .iter()
            .filter(move |c| c.change_type == change_type)
    }
}
