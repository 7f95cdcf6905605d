use anyhow::{anyhow, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::model::{
    Application, ApplicationChange, ApplicationChangeReport, ApplicationChangeType,
    ApplicationElement,
};

/// Forward-merges a submitted application into the stored one it was diffed against.
///
/// Only the applied changes of a report are carried over; ignored changes keep
/// the stored state, so a caller ignoring e.g. `ENDPOINT_REMOVED` does not lose
/// endpoints it simply did not submit.
pub struct ApplicationUpdater;

impl ApplicationUpdater {
    /// `base` is the stored application the report was computed against and
    /// `submitted` the application the report was computed from
    pub fn update(
        base: &Application,
        submitted: &Application,
        report: &ApplicationChangeReport,
    ) -> Result<Application> {
        let mut result = base.clone();
        result.tag = submitted.tag.clone();
        result.version = submitted.version.clone();

        // Structural changes first so property patches find their targets
        for change in report.applied_of_type(ApplicationChangeType::EndpointRemoved) {
            result.endpoints.retain(|e| e.id() != change.element.id());
        }
        for change in report.applied_of_type(ApplicationChangeType::EndpointAdded) {
            let endpoint = submitted
                .endpoint(change.element.id())
                .ok_or_else(|| anyhow!("Added endpoint not in submitted application: {}", change.element))?;
            result.endpoints.push(endpoint.clone());
        }
        for change in report.applied_of_type(ApplicationChangeType::EndpointChanged) {
            Self::apply_endpoint_change(&mut result, submitted, change)?;
        }
        for change in report.applied_of_type(ApplicationChangeType::ParameterRemoved) {
            if let ApplicationElement::Parameter { endpoint, id } = &change.element {
                if let Some(target) = result.endpoint_mut(endpoint) {
                    target.parameters_mut().retain(|p| p.id() != id);
                }
            }
        }
        for change in report.applied_of_type(ApplicationChangeType::ParameterAdded) {
            Self::apply_parameter_added(&mut result, submitted, change)?;
        }
        for change in report.applied_of_type(ApplicationChangeType::ParameterChanged) {
            Self::apply_parameter_change(&mut result, submitted, change)?;
        }

        Ok(result)
    }

    fn apply_endpoint_change(
        result: &mut Application,
        submitted: &Application,
        change: &ApplicationChange,
    ) -> Result<()> {
        let id = change.element.id();
        let (Some(property), Some(source), Some(target)) = (
            change.property.as_deref(),
            submitted.endpoint(id),
            result.endpoint_mut(id),
        ) else {
            return Ok(());
        };

        *target = copy_property(target, source, property)?;
        Ok(())
    }

    fn apply_parameter_added(
        result: &mut Application,
        submitted: &Application,
        change: &ApplicationChange,
    ) -> Result<()> {
        let ApplicationElement::Parameter { endpoint, id } = &change.element else {
            return Ok(());
        };

        let parameter = submitted
            .endpoint(endpoint)
            .and_then(|e| e.parameter(id))
            .ok_or_else(|| anyhow!("Added parameter not in submitted application: {}", change.element))?;

        // The owning endpoint may be missing when its own addition was ignored
        if let Some(target) = result.endpoint_mut(endpoint) {
            target.parameters_mut().push(parameter.clone());
        }
        Ok(())
    }

    fn apply_parameter_change(
        result: &mut Application,
        submitted: &Application,
        change: &ApplicationChange,
    ) -> Result<()> {
        let ApplicationElement::Parameter { endpoint, id } = &change.element else {
            return Ok(());
        };
        let Some(property) = change.property.as_deref() else {
            return Ok(());
        };
        let Some(source) = submitted.endpoint(endpoint).and_then(|e| e.parameter(id)) else {
            return Ok(());
        };

        if let Some(target) = result
            .endpoint_mut(endpoint)
            .and_then(|e| e.parameters_mut().iter_mut().find(|p| p.id() == id))
        {
            *target = copy_property(target, source, property)?;
        }
        Ok(())
    }
}

/// Copy one serialized top-level property from `source` onto `target`
fn copy_property<T: Serialize + DeserializeOwned>(target: &T, source: &T, property: &str) -> Result<T> {
    let mut target_value = serde_json::to_value(target)?;
    let source_value = serde_json::to_value(source)?;

    let (Some(target_map), Value::Object(source_map)) = (target_value.as_object_mut(), &source_value) else {
        return Err(anyhow!("Cannot patch property '{}' of a non-object value", property));
    };

    match source_map.get(property) {
        Some(value) => {
            target_map.insert(property.to_string(), value.clone());
        }
        None => {
            target_map.remove(property);
        }
    }

    Ok(serde_json::from_value(target_value)?)
}
