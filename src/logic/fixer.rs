use std::collections::BTreeSet;

use crate::model::{
    AnnotationElementKind, AnnotationElementRef, AnnotationValidityReport, ApplicationAnnotation,
};

/// Repairs an annotation by dropping the elements a report marks as breaking.
///
/// Removal is the only strategy: a dangling reference is never re-pointed to a
/// guessed replacement. Inputs are left alone even when nothing refers to them
/// anymore, and breaking findings on inputs cannot be repaired here, so the
/// result has to be checked again.
pub struct AnnotationFixer;

impl AnnotationFixer {
    pub fn fix(annotation: &ApplicationAnnotation, report: &AnnotationValidityReport) -> ApplicationAnnotation {
        let breaking: BTreeSet<&AnnotationElementRef> = report.breaking_elements().collect();

        let mut fixed = annotation.clone();
        if breaking.is_empty() {
            return fixed;
        }

        fixed.endpoint_annotations.retain(|endpoint_annotation| {
            !breaking.contains(&AnnotationElementRef::endpoint_annotation(
                endpoint_annotation.endpoint.id(),
            ))
        });

        let broken_parameters: BTreeSet<&str> = breaking
            .iter()
            .filter(|element| element.kind == AnnotationElementKind::ParameterAnnotation)
            .map(|element| element.id.as_str())
            .collect();

        for endpoint_annotation in &mut fixed.endpoint_annotations {
            endpoint_annotation
                .parameter_annotations
                .retain(|p| !broken_parameters.contains(p.parameter.id()));
        }

        fixed
    }
}
