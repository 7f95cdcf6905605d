use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::model::{
    Application, ApplicationChange, ApplicationChangeReport, ApplicationChangeType,
    ApplicationElement, Endpoint, Parameter,
};

/// Property of an endpoint that is diffed separately, parameter by parameter
const PARAMETERS_PROPERTY: &str = "parameters";

/// Compares a new application snapshot against older ones.
///
/// Elements are matched by id. Changes whose type is in the ignore set end up
/// in the report's ignored bucket instead of the applied one.
pub struct ApplicationChangeDetector<'a> {
    application: &'a Application,
    ignored_change_types: BTreeSet<ApplicationChangeType>,
}

impl<'a> ApplicationChangeDetector<'a> {
    pub fn new(application: &'a Application) -> Self {
        Self {
            application,
            ignored_change_types: BTreeSet::new(),
        }
    }

    pub fn ignoring(
        application: &'a Application,
        ignored_change_types: impl IntoIterator<Item = ApplicationChangeType>,
    ) -> Self {
        Self {
            application,
            ignored_change_types: ignored_change_types.into_iter().collect(),
        }
    }

    /// Diff the new application against `old`
    pub fn compare_to(&self, old: &Application) -> Result<ApplicationChangeReport> {
        let mut changes = Vec::new();

        let old_endpoints: HashMap<&str, &Endpoint> =
            old.endpoints.iter().map(|e| (e.id(), e)).collect();
        let mut visited: HashSet<&str> = HashSet::new();

        for new_endpoint in &self.application.endpoints {
            let id = new_endpoint.id();
            visited.insert(id);

            match old_endpoints.get(id) {
                None => changes.push(ApplicationChange::new(
                    ApplicationChangeType::EndpointAdded,
                    ApplicationElement::endpoint(id),
                )),
                Some(old_endpoint) => {
                    changes.extend(Self::diff_endpoint(old_endpoint, new_endpoint)?);
                }
            }
        }

        for old_endpoint in &old.endpoints {
            if !visited.contains(old_endpoint.id()) {
                changes.push(ApplicationChange::new(
                    ApplicationChangeType::EndpointRemoved,
                    ApplicationElement::endpoint(old_endpoint.id()),
                ));
            }
        }

        let (ignored_changes, applied_changes): (BTreeSet<_>, BTreeSet<_>) = changes
            .into_iter()
            .partition(|c| self.ignored_change_types.contains(&c.change_type));

        Ok(ApplicationChangeReport {
            applied_changes,
            ignored_changes,
            updated_application: self.application.clone(),
            before_version: Some(old.version.clone()),
            after_version: self.application.version.clone(),
        })
    }

    fn diff_endpoint(old: &Endpoint, new: &Endpoint) -> Result<Vec<ApplicationChange>> {
        let element = ApplicationElement::endpoint(new.id());
        let mut changes: Vec<ApplicationChange> =
            changed_properties(old, new, &[PARAMETERS_PROPERTY])?
                .into_iter()
                .map(|property| {
                    ApplicationChange::changed(
                        ApplicationChangeType::EndpointChanged,
                        element.clone(),
                        property,
                    )
                })
                .collect();

        if !same_parameters(old.parameters(), new.parameters()) {
            changes.extend(Self::diff_parameters(new.id(), old.parameters(), new.parameters())?);
        }

        Ok(changes)
    }

    fn diff_parameters(
        endpoint_id: &str,
        old: &[Parameter],
        new: &[Parameter],
    ) -> Result<Vec<ApplicationChange>> {
        let mut changes = Vec::new();

        let old_parameters: HashMap<&str, &Parameter> = old.iter().map(|p| (p.id(), p)).collect();
        let new_ids: HashSet<&str> = new.iter().map(Parameter::id).collect();

        for new_parameter in new {
            let element = ApplicationElement::parameter(endpoint_id, new_parameter.id());
            match old_parameters.get(new_parameter.id()) {
                None => changes.push(ApplicationChange::new(
                    ApplicationChangeType::ParameterAdded,
                    element,
                )),
                Some(old_parameter) => {
                    for property in changed_properties(*old_parameter, new_parameter, &[])? {
                        changes.push(ApplicationChange::changed(
                            ApplicationChangeType::ParameterChanged,
                            element.clone(),
                            property,
                        ));
                    }
                }
            }
        }

        for old_parameter in old {
            if !new_ids.contains(old_parameter.id()) {
                changes.push(ApplicationChange::new(
                    ApplicationChangeType::ParameterRemoved,
                    ApplicationElement::parameter(endpoint_id, old_parameter.id()),
                ));
            }
        }

        Ok(changes)
    }
}

/// Parameter lists are sets: order does not matter
fn same_parameters(old: &[Parameter], new: &[Parameter]) -> bool {
    old.len() == new.len() && old.iter().all(|p| new.contains(p))
}

/// Names of the top-level properties whose serialized values differ, except `skip`
pub(crate) fn changed_properties<T: Serialize>(
    old: &T,
    new: &T,
    skip: &[&str],
) -> Result<Vec<String>> {
    let old = serde_json::to_value(old)?;
    let new = serde_json::to_value(new)?;

    let (Value::Object(old), Value::Object(new)) = (old, new) else {
        return Ok(Vec::new());
    };

    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();

    Ok(keys
        .into_iter()
        .filter(|key| !skip.contains(&key.as_str()))
        .filter(|key| old.get(*key) != new.get(*key))
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HttpEndpoint, HttpParameter, HttpParameterType, VersionOrTimestamp};

    fn login() -> HttpEndpoint {
        HttpEndpoint::new("login", "POST", "/login")
            .with_parameter(HttpParameter::new("user", "user", HttpParameterType::Form))
            .with_parameter(HttpParameter::new("password", "password", HttpParameterType::Form))
    }

    fn application(version: u64, endpoints: Vec<HttpEndpoint>) -> Application {
        let mut app = Application::new("shop", VersionOrTimestamp::version(version, 0, 0));
        app.endpoints = endpoints.into_iter().map(Endpoint::from).collect();
        app
    }

    #[test]
    fn test_identical_applications_have_no_changes() {
        let app = application(1, vec![login(), HttpEndpoint::new("home", "GET", "/")]);

        let report = ApplicationChangeDetector::new(&app).compare_to(&app).unwrap();

        assert!(!report.has_changes());
        assert!(report.ignored_changes.is_empty());
    }

    #[test]
    fn test_parameter_order_is_irrelevant() {
        let old = application(1, vec![login()]);
        let mut reordered = login();
        reordered.parameters.reverse();
        let new = application(2, vec![reordered]);

        let report = ApplicationChangeDetector::new(&new).compare_to(&old).unwrap();
        assert!(!report.has_changes());
    }

    #[test]
    fn test_added_and_removed_endpoints() {
        let old = application(1, vec![login(), HttpEndpoint::new("home", "GET", "/")]);
        let new = application(2, vec![login(), HttpEndpoint::new("cart", "GET", "/cart")]);

        let report = ApplicationChangeDetector::new(&new).compare_to(&old).unwrap();

        let expected: BTreeSet<ApplicationChange> = [
            ApplicationChange::new(
                ApplicationChangeType::EndpointAdded,
                ApplicationElement::endpoint("cart"),
            ),
            ApplicationChange::new(
                ApplicationChangeType::EndpointRemoved,
                ApplicationElement::endpoint("home"),
            ),
        ]
        .into_iter()
        .collect();
        assert_eq!(report.applied_changes, expected);
        assert_eq!(report.before_version, Some(VersionOrTimestamp::version(1, 0, 0)));
        assert_eq!(report.after_version, VersionOrTimestamp::version(2, 0, 0));
    }

    #[test]
    fn test_endpoint_property_and_parameter_changes() {
        let old = application(1, vec![login()]);

        let mut changed = login();
        changed.path = "/signin".to_string();
        changed.parameters.remove(1);
        changed.parameters.push(HttpParameter::new("otp", "otp", HttpParameterType::Query).into());
        if let Parameter::Http(user) = &mut changed.parameters[0] {
            user.parameter_type = HttpParameterType::Body;
        }
        let new = application(2, vec![changed]);

        let report = ApplicationChangeDetector::new(&new).compare_to(&old).unwrap();

        let expected: BTreeSet<ApplicationChange> = [
            ApplicationChange::changed(
                ApplicationChangeType::EndpointChanged,
                ApplicationElement::endpoint("login"),
                "path",
            ),
            ApplicationChange::new(
                ApplicationChangeType::ParameterAdded,
                ApplicationElement::parameter("login", "otp"),
            ),
            ApplicationChange::new(
                ApplicationChangeType::ParameterRemoved,
                ApplicationElement::parameter("login", "password"),
            ),
            ApplicationChange::changed(
                ApplicationChangeType::ParameterChanged,
                ApplicationElement::parameter("login", "user"),
                "parameter-type",
            ),
        ]
        .into_iter()
        .collect();
        assert_eq!(report.applied_changes, expected);
    }

    #[test]
    fn test_ignored_change_types_are_set_aside() {
        let old = application(1, vec![login(), HttpEndpoint::new("home", "GET", "/")]);
        let new = application(2, vec![login(), HttpEndpoint::new("cart", "GET", "/cart")]);

        let report =
            ApplicationChangeDetector::ignoring(&new, [ApplicationChangeType::EndpointRemoved])
                .compare_to(&old)
                .unwrap();

        assert_eq!(report.applied_changes.len(), 1);
        assert_eq!(
            report.ignored_changes.iter().next().map(|c| c.change_type),
            Some(ApplicationChangeType::EndpointRemoved)
        );
    }
}
