use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::model::{Application, Endpoint, Id, Parameter};

/// Kind of application element a reference can point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElementType {
    Endpoint,
    Parameter,
}

/// Application elements that can be the target of a [`WeakReference`]
pub trait Referable: Sized {
    const ELEMENT_TYPE: ElementType;

    /// Look the id up anywhere in the application
    fn resolve_in<'a>(application: &'a Application, id: &str) -> Option<&'a Self>;
}

impl Referable for Endpoint {
    const ELEMENT_TYPE: ElementType = ElementType::Endpoint;

    fn resolve_in<'a>(application: &'a Application, id: &str) -> Option<&'a Self> {
        application.endpoint(id)
    }
}

impl Referable for Parameter {
    const ELEMENT_TYPE: ElementType = ElementType::Parameter;

    fn resolve_in<'a>(application: &'a Application, id: &str) -> Option<&'a Self> {
        application.parameter(id).map(|(_, parameter)| parameter)
    }
}

/// By-id relation from an annotation into an application.
///
/// Holds no handle to the target: the application is versioned and swapped
/// independently, so the id is looked up again on every [`resolve`](Self::resolve).
/// Serialized as the bare id string.
pub struct WeakReference<T> {
    id: Id,
    target: PhantomData<fn() -> T>,
}

impl<T: Referable> WeakReference<T> {
    pub fn new(id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            target: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn element_type(&self) -> ElementType {
        T::ELEMENT_TYPE
    }

    pub fn resolve<'a>(&self, application: &'a Application) -> Option<&'a T> {
        T::resolve_in(application, &self.id)
    }
}

impl WeakReference<Parameter> {
    /// Parameters are resolved within the endpoint their annotation is nested in
    pub fn resolve_within<'a>(&self, endpoint: &'a Endpoint) -> Option<&'a Parameter> {
        endpoint.parameter(&self.id)
    }
}

impl<T> Clone for WeakReference<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            target: PhantomData,
        }
    }
}

impl<T> PartialEq for WeakReference<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for WeakReference<T> {}

impl<T> PartialOrd for WeakReference<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for WeakReference<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl<T> Hash for WeakReference<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: Referable> fmt::Debug for WeakReference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakReference<{:?}>({})", T::ELEMENT_TYPE, self.id)
    }
}

impl<T> Serialize for WeakReference<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.id)
    }
}

impl<'de, T> Deserialize<'de> for WeakReference<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = Id::deserialize(deserializer)?;
        Ok(Self {
            id,
            target: PhantomData,
        })
    }
}

/// A concrete element of an application model, named by id.
/// Parameters carry the id of the endpoint owning them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ApplicationElement {
    Endpoint { id: Id },
    Parameter { endpoint: Id, id: Id },
}

impl ApplicationElement {
    pub fn endpoint(id: impl Into<Id>) -> Self {
        ApplicationElement::Endpoint { id: id.into() }
    }

    pub fn parameter(endpoint: impl Into<Id>, id: impl Into<Id>) -> Self {
        ApplicationElement::Parameter {
            endpoint: endpoint.into(),
            id: id.into(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ApplicationElement::Endpoint { id } | ApplicationElement::Parameter { id, .. } => id,
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            ApplicationElement::Endpoint { .. } => ElementType::Endpoint,
            ApplicationElement::Parameter { .. } => ElementType::Parameter,
        }
    }

    /// Id of the endpoint this element is or belongs to
    pub fn endpoint_id(&self) -> &str {
        match self {
            ApplicationElement::Endpoint { id } => id,
            ApplicationElement::Parameter { endpoint, .. } => endpoint,
        }
    }
}

impl fmt::Display for ApplicationElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationElement::Endpoint { id } => write!(f, "endpoint '{}'", id),
            ApplicationElement::Parameter { endpoint, id } => {
                write!(f, "parameter '{}' of endpoint '{}'", id, endpoint)
            }
        }
    }
}
