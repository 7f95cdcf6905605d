use serde::{Deserialize, Serialize};

use crate::model::{Endpoint, Id, Parameter, VersionOrTimestamp, WeakReference};

/// Manual test-generation overrides for one application.
///
/// Every element points into the paired [`Application`](crate::model::Application)
/// by [`WeakReference`]; nothing here owns application elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApplicationAnnotation {
    pub tag: String,
    /// Must be set before the annotation can be stored
    #[serde(
        rename = "version-or-timestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub version: Option<VersionOrTimestamp>,
    #[serde(default)]
    pub overrides: Vec<PropertyOverride<EndpointOverrideKey>>,
    #[serde(default)]
    pub inputs: Vec<Input>,
    #[serde(default)]
    pub endpoint_annotations: Vec<EndpointAnnotation>,
}

impl ApplicationAnnotation {
    pub fn new(tag: impl Into<String>, version: VersionOrTimestamp) -> Self {
        Self {
            tag: tag.into(),
            version: Some(version),
            overrides: Vec::new(),
            inputs: Vec::new(),
            endpoint_annotations: Vec::new(),
        }
    }

    pub fn with_input(mut self, input: Input) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_endpoint_annotation(mut self, annotation: EndpointAnnotation) -> Self {
        self.endpoint_annotations.push(annotation);
        self
    }

    pub fn input(&self, id: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.id() == id)
    }

    pub fn endpoint_annotation(&self, endpoint_id: &str) -> Option<&EndpointAnnotation> {
        self.endpoint_annotations
            .iter()
            .find(|a| a.endpoint.id() == endpoint_id)
    }

    /// Same content relabeled to another version
    pub fn relabeled(mut self, version: VersionOrTimestamp) -> Self {
        self.version = Some(version);
        self
    }
}

/// Overrides for one endpoint plus annotations of its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EndpointAnnotation {
    pub endpoint: WeakReference<Endpoint>,
    #[serde(default)]
    pub overrides: Vec<PropertyOverride<EndpointOverrideKey>>,
    #[serde(default)]
    pub parameter_annotations: Vec<ParameterAnnotation>,
}

impl EndpointAnnotation {
    pub fn new(endpoint_id: impl Into<Id>) -> Self {
        Self {
            endpoint: WeakReference::new(endpoint_id),
            overrides: Vec::new(),
            parameter_annotations: Vec::new(),
        }
    }

    pub fn with_override(mut self, key: EndpointOverrideKey, value: impl Into<String>) -> Self {
        self.overrides.push(PropertyOverride::new(key, value));
        self
    }

    pub fn with_parameter_annotation(mut self, annotation: ParameterAnnotation) -> Self {
        self.parameter_annotations.push(annotation);
        self
    }
}

/// Binds one parameter to the input that feeds it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ParameterAnnotation {
    pub parameter: WeakReference<Parameter>,
    /// Id of an entry of [`ApplicationAnnotation::inputs`]
    pub input: Id,
    #[serde(default)]
    pub overrides: Vec<PropertyOverride<ParameterOverrideKey>>,
}

impl ParameterAnnotation {
    pub fn new(parameter_id: impl Into<Id>, input_id: impl Into<Id>) -> Self {
        Self {
            parameter: WeakReference::new(parameter_id),
            input: input_id.into(),
            overrides: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyOverride<K> {
    pub key: K,
    pub value: String,
}

impl<K> PropertyOverride<K> {
    pub fn new(key: K, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointOverrideKey {
    HttpDomain,
    HttpPort,
    HttpProtocol,
    HttpEncoding,
    HttpHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterOverrideKey {
    HttpEncoded,
}

/// Source of values for annotated parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Input {
    Direct(DirectListInput),
    Csv(CsvInput),
    Extracted(ExtractedInput),
    Counter(CounterInput),
    Json(JsonInput),
}

impl Input {
    pub fn id(&self) -> &str {
        match self {
            Input::Direct(input) => &input.id,
            Input::Csv(input) => &input.id,
            Input::Extracted(input) => &input.id,
            Input::Counter(input) => &input.id,
            Input::Json(input) => &input.id,
        }
    }

    /// Ids of other inputs this one depends on
    pub fn input_references(&self) -> Vec<&str> {
        match self {
            Input::Csv(csv) => csv.associated.iter().map(String::as_str).collect(),
            Input::Json(json) => json.items.iter().filter_map(|i| i.input.as_deref()).collect(),
            Input::Direct(_) | Input::Extracted(_) | Input::Counter(_) => Vec::new(),
        }
    }

    /// Endpoints whose responses this input is extracted from
    pub fn endpoint_references(&self) -> Vec<&WeakReference<Endpoint>> {
        match self {
            Input::Extracted(extracted) => extracted.extractions.iter().map(|e| &e.from).collect(),
            Input::Direct(_) | Input::Csv(_) | Input::Counter(_) | Input::Json(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DirectListInput {
    pub id: Id,
    pub data: Vec<String>,
}

/// One column of a CSV file; columns of the same file list each other as associated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CsvInput {
    pub id: Id,
    pub filename: String,
    pub column: usize,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default)]
    pub header: bool,
    #[serde(default)]
    pub associated: Vec<Id>,
}

fn default_separator() -> String {
    ";".to_string()
}

/// Value extracted from the response of a previously called endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExtractedInput {
    pub id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_value: Option<String>,
    pub extractions: Vec<ValueExtraction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ValueExtraction {
    pub from: WeakReference<Endpoint>,
    pub pattern: ExtractionPattern,
    #[serde(default)]
    pub match_number: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExtractionPattern {
    Regex {
        pattern: String,
        #[serde(default = "default_template")]
        template: String,
    },
    JsonPath {
        path: String,
    },
}

fn default_template() -> String {
    "(1)".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CounterInput {
    pub id: Id,
    #[serde(default)]
    pub start: i64,
    #[serde(default = "default_increment")]
    pub increment: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub scope: CounterScope,
}

fn default_increment() -> i64 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CounterScope {
    #[default]
    Global,
    User,
    UserIteration,
}

/// JSON document assembled from fixed values and other inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JsonInput {
    pub id: Id,
    pub items: Vec<JsonItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JsonItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_references() {
        let json = Input::Json(JsonInput {
            id: "credentials".to_string(),
            items: vec![
                JsonItem {
                    name: "user".to_string(),
                    input: Some("users".to_string()),
                    value: None,
                },
                JsonItem {
                    name: "remember".to_string(),
                    input: None,
                    value: Some(serde_json::json!(true)),
                },
            ],
        });
        assert_eq!(json.input_references(), vec!["users"]);

        let extracted = Input::Extracted(ExtractedInput {
            id: "token".to_string(),
            initial_value: None,
            extractions: vec![ValueExtraction {
                from: WeakReference::new("login"),
                pattern: ExtractionPattern::JsonPath {
                    path: "$.token".to_string(),
                },
                match_number: 1,
            }],
        });
        assert_eq!(extracted.endpoint_references()[0].id(), "login");
        assert!(extracted.input_references().is_empty());
    }

    #[test]
    fn test_yaml_shape() {
        let yaml = r#"
tag: shop
version-or-timestamp: 1.0.0
inputs:
  - type: direct
    id: users
    data: [alice, bob]
  - type: csv
    id: passwords
    filename: users.csv
    column: 1
    associated: [users]
endpoint-annotations:
  - endpoint: login
    overrides:
      - key: HTTP_PORT
        value: "8443"
    parameter-annotations:
      - parameter: user
        input: users
"#;
        let annotation: ApplicationAnnotation = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(annotation.version, Some(VersionOrTimestamp::version(1, 0, 0)));
        assert_eq!(annotation.inputs.len(), 2);
        let Input::Csv(csv) = &annotation.inputs[1] else {
            panic!("expected csv input");
        };
        assert_eq!(csv.separator, ";");

        let login = annotation.endpoint_annotation("login").unwrap();
        assert_eq!(login.overrides[0].key, EndpointOverrideKey::HttpPort);
        assert_eq!(login.parameter_annotations[0].parameter.id(), "user");
    }
}
