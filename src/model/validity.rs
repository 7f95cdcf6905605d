use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::IdpaError;
use crate::model::{ApplicationChange, ApplicationChangeType, ApplicationElement, Id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnnotationViolationType {
    EndpointAdded,
    EndpointRemoved,
    EndpointChanged,
    ParameterAdded,
    ParameterRemoved,
    ParameterChanged,
    IllegalEndpointReference,
    IllegalParameterReference,
    IllegalInputReference,
}

impl AnnotationViolationType {
    /// Dangling references invalidate an annotation; everything else is informational
    pub fn is_breaking(&self) -> bool {
        matches!(
            self,
            AnnotationViolationType::IllegalEndpointReference
                | AnnotationViolationType::IllegalParameterReference
                | AnnotationViolationType::IllegalInputReference
        )
    }
}

impl From<ApplicationChangeType> for AnnotationViolationType {
    fn from(change_type: ApplicationChangeType) -> Self {
        match change_type {
            ApplicationChangeType::EndpointAdded => AnnotationViolationType::EndpointAdded,
            ApplicationChangeType::EndpointRemoved => AnnotationViolationType::EndpointRemoved,
            ApplicationChangeType::EndpointChanged => AnnotationViolationType::EndpointChanged,
            ApplicationChangeType::ParameterAdded => AnnotationViolationType::ParameterAdded,
            ApplicationChangeType::ParameterRemoved => AnnotationViolationType::ParameterRemoved,
            ApplicationChangeType::ParameterChanged => AnnotationViolationType::ParameterChanged,
        }
    }
}

/// A single finding against an annotation element
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AnnotationViolation {
    pub violation_type: AnnotationViolationType,
    /// The application element (or, for input references, the missing input) concerned
    pub element: ViolatedElement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

impl AnnotationViolation {
    pub fn new(violation_type: AnnotationViolationType, element: ViolatedElement) -> Self {
        Self {
            violation_type,
            element,
            property: None,
        }
    }

    /// Informational violation mirroring an application change
    pub fn from_change(change: &ApplicationChange) -> Self {
        Self {
            violation_type: change.change_type.into(),
            element: ViolatedElement::Application(change.element.clone()),
            property: change.property.clone(),
        }
    }

    pub fn is_breaking(&self) -> bool {
        self.violation_type.is_breaking()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolatedElement {
    Application(ApplicationElement),
    Input(Id),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnnotationElementKind {
    /// The annotation as a whole, for findings no single element owns
    Annotation,
    EndpointAnnotation,
    ParameterAnnotation,
    Input,
}

impl AnnotationElementKind {
    fn as_str(&self) -> &'static str {
        match self {
            AnnotationElementKind::Annotation => "annotation",
            AnnotationElementKind::EndpointAnnotation => "endpoint-annotation",
            AnnotationElementKind::ParameterAnnotation => "parameter-annotation",
            AnnotationElementKind::Input => "input",
        }
    }
}

/// Names an element of an annotation.
///
/// Endpoint and parameter annotations are named by the id of the application
/// element they annotate, inputs by their own id. Serialized as `kind:id` so it
/// can key maps in JSON as well as YAML.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnnotationElementRef {
    pub kind: AnnotationElementKind,
    pub id: Id,
}

impl AnnotationElementRef {
    pub fn annotation(tag: impl Into<Id>) -> Self {
        Self {
            kind: AnnotationElementKind::Annotation,
            id: tag.into(),
        }
    }

    pub fn endpoint_annotation(endpoint_id: impl Into<Id>) -> Self {
        Self {
            kind: AnnotationElementKind::EndpointAnnotation,
            id: endpoint_id.into(),
        }
    }

    pub fn parameter_annotation(parameter_id: impl Into<Id>) -> Self {
        Self {
            kind: AnnotationElementKind::ParameterAnnotation,
            id: parameter_id.into(),
        }
    }

    pub fn input(input_id: impl Into<Id>) -> Self {
        Self {
            kind: AnnotationElementKind::Input,
            id: input_id.into(),
        }
    }
}

impl fmt::Display for AnnotationElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for AnnotationElementRef {
    type Err = IdpaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| IdpaError::InvalidElementReference(s.to_string()))?;
        let kind = match kind {
            "annotation" => AnnotationElementKind::Annotation,
            "endpoint-annotation" => AnnotationElementKind::EndpointAnnotation,
            "parameter-annotation" => AnnotationElementKind::ParameterAnnotation,
            "input" => AnnotationElementKind::Input,
            _ => return Err(IdpaError::InvalidElementReference(s.to_string())),
        };
        Ok(Self {
            kind,
            id: id.to_string(),
        })
    }
}

impl Serialize for AnnotationElementRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AnnotationElementRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub type ViolationMap = BTreeMap<AnnotationElementRef, BTreeSet<AnnotationViolation>>;

/// Result of checking one annotation against one application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AnnotationValidityReport {
    /// Application changes that were taken into account
    #[serde(default)]
    pub application_changes: BTreeSet<ApplicationChange>,
    #[serde(default)]
    pub violations: ViolationMap,
    /// Findings of the annotation an automatic repair was derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violations_before_fix: Option<ViolationMap>,
}

impl AnnotationValidityReport {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn add_violation(&mut self, element: AnnotationElementRef, violation: AnnotationViolation) {
        self.violations.entry(element).or_default().insert(violation);
    }

    pub fn is_ok(&self) -> bool {
        self.violations.values().all(BTreeSet::is_empty)
    }

    pub fn is_breaking(&self) -> bool {
        self.violations
            .values()
            .flatten()
            .any(AnnotationViolation::is_breaking)
    }

    /// Annotation elements carrying at least one breaking violation
    pub fn breaking_elements(&self) -> impl Iterator<Item = &AnnotationElementRef> {
        self.violations
            .iter()
            .filter(|(_, violations)| violations.iter().any(AnnotationViolation::is_breaking))
            .map(|(element, _)| element)
    }

    pub fn with_violations_before_fix(mut self, before: ViolationMap) -> Self {
        self.violations_before_fix = Some(before);
        self
    }
}
