use serde::{Deserialize, Serialize};

use crate::model::{Id, VersionOrTimestamp};

/// Snapshot of an application's interface at one version.
///
/// Endpoint and parameter ids are unique within one application and are the
/// unit of equality for diffing and of cross-document references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Application {
    /// Logical application id all versions are grouped under
    pub tag: String,
    #[serde(rename = "version-or-timestamp")]
    pub version: VersionOrTimestamp,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl Application {
    pub fn new(tag: impl Into<String>, version: VersionOrTimestamp) -> Self {
        Self {
            tag: tag.into(),
            version,
            endpoints: Vec::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<Endpoint>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    pub fn endpoint(&self, id: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.id() == id)
    }

    pub fn endpoint_mut(&mut self, id: &str) -> Option<&mut Endpoint> {
        self.endpoints.iter_mut().find(|e| e.id() == id)
    }

    /// Find a parameter by id in any endpoint, together with its owner
    pub fn parameter(&self, id: &str) -> Option<(&Endpoint, &Parameter)> {
        self.endpoints
            .iter()
            .find_map(|e| e.parameter(id).map(|p| (e, p)))
    }
}

/// An interface element of an application, polymorphic over the protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Endpoint {
    Http(HttpEndpoint),
}

impl Endpoint {
    pub fn id(&self) -> &str {
        match self {
            Endpoint::Http(http) => &http.id,
        }
    }

    pub fn parameters(&self) -> &[Parameter] {
        match self {
            Endpoint::Http(http) => &http.parameters,
        }
    }

    pub fn parameters_mut(&mut self) -> &mut Vec<Parameter> {
        match self {
            Endpoint::Http(http) => &mut http.parameters,
        }
    }

    pub fn parameter(&self, id: &str) -> Option<&Parameter> {
        self.parameters().iter().find(|p| p.id() == id)
    }
}

impl From<HttpEndpoint> for Endpoint {
    fn from(http: HttpEndpoint) -> Self {
        Endpoint::Http(http)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpEndpoint {
    pub id: Id,
    pub domain: String,
    pub port: String,
    pub protocol: String,
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

impl HttpEndpoint {
    /// Endpoint on `localhost:8080` over plain HTTP
    pub fn new(id: impl Into<Id>, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            domain: "localhost".to_string(),
            port: "8080".to_string(),
            protocol: "http".to_string(),
            method: method.into(),
            path: path.into(),
            encoding: None,
            headers: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: impl Into<Parameter>) -> Self {
        self.parameters.push(parameter.into());
        self
    }
}

/// An input slot of an endpoint, polymorphic over the protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Parameter {
    Http(HttpParameter),
}

impl Parameter {
    pub fn id(&self) -> &str {
        match self {
            Parameter::Http(http) => &http.id,
        }
    }
}

impl From<HttpParameter> for Parameter {
    fn from(http: HttpParameter) -> Self {
        Parameter::Http(http)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpParameter {
    pub id: Id,
    pub name: String,
    pub parameter_type: HttpParameterType,
}

impl HttpParameter {
    pub fn new(id: impl Into<Id>, name: impl Into<String>, parameter_type: HttpParameterType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parameter_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HttpParameterType {
    Query,
    UrlPart,
    Header,
    Form,
    Body,
}
