use crate::model::{
    AnnotationElementRef, AnnotationValidityReport, AnnotationViolation, AnnotationViolationType,
    Application, ApplicationAnnotation, ApplicationChange, ApplicationChangeReport,
    ApplicationChangeType, ApplicationElement, ViolatedElement,
};

/// Checks annotations against the application they are paired with.
///
/// Findings accumulate over several `check_*` calls into one report; identical
/// findings from different checks collapse into one.
pub struct AnnotationValidityChecker<'a> {
    application: &'a Application,
    report: AnnotationValidityReport,
}

impl<'a> AnnotationValidityChecker<'a> {
    /// `application` is the model the annotation has to be valid against
    pub fn new(application: &'a Application) -> Self {
        Self {
            application,
            report: AnnotationValidityReport::empty(),
        }
    }

    /// Resolve every reference of the annotation against the application
    pub fn check_annotation(&mut self, annotation: &ApplicationAnnotation) -> &mut Self {
        for endpoint_annotation in &annotation.endpoint_annotations {
            let endpoint_id = endpoint_annotation.endpoint.id();

            let Some(endpoint) = endpoint_annotation.endpoint.resolve(self.application) else {
                self.report.add_violation(
                    AnnotationElementRef::endpoint_annotation(endpoint_id),
                    AnnotationViolation::new(
                        AnnotationViolationType::IllegalEndpointReference,
                        ViolatedElement::Application(ApplicationElement::endpoint(endpoint_id)),
                    ),
                );
                continue;
            };

            for parameter_annotation in &endpoint_annotation.parameter_annotations {
                let parameter_id = parameter_annotation.parameter.id();
                let key = AnnotationElementRef::parameter_annotation(parameter_id);

                if parameter_annotation.parameter.resolve_within(endpoint).is_none() {
                    self.report.add_violation(
                        key.clone(),
                        AnnotationViolation::new(
                            AnnotationViolationType::IllegalParameterReference,
                            ViolatedElement::Application(ApplicationElement::parameter(
                                endpoint_id,
                                parameter_id,
                            )),
                        ),
                    );
                }

                if annotation.input(&parameter_annotation.input).is_none() {
                    self.report.add_violation(
                        key,
                        AnnotationViolation::new(
                            AnnotationViolationType::IllegalInputReference,
                            ViolatedElement::Input(parameter_annotation.input.clone()),
                        ),
                    );
                }
            }
        }

        for input in &annotation.inputs {
            let key = AnnotationElementRef::input(input.id());

            for reference in input.endpoint_references() {
                if reference.resolve(self.application).is_none() {
                    self.report.add_violation(
                        key.clone(),
                        AnnotationViolation::new(
                            AnnotationViolationType::IllegalEndpointReference,
                            ViolatedElement::Application(ApplicationElement::endpoint(reference.id())),
                        ),
                    );
                }
            }

            for referenced in input.input_references() {
                if annotation.input(referenced).is_none() {
                    self.report.add_violation(
                        key.clone(),
                        AnnotationViolation::new(
                            AnnotationViolationType::IllegalInputReference,
                            ViolatedElement::Input(referenced.to_string()),
                        ),
                    );
                }
            }
        }

        self
    }

    /// Translate application changes into findings against the annotation elements they touch
    pub fn check_changes(
        &mut self,
        annotation: &ApplicationAnnotation,
        changes: &ApplicationChangeReport,
    ) -> &mut Self {
        for change in &changes.applied_changes {
            self.report.application_changes.insert(change.clone());

            match change.change_type {
                ApplicationChangeType::EndpointRemoved => {
                    let violation = AnnotationViolation::new(
                        AnnotationViolationType::IllegalEndpointReference,
                        ViolatedElement::Application(change.element.clone()),
                    );
                    for key in Self::endpoint_referrers(annotation, change.element.id()) {
                        self.report.add_violation(key, violation.clone());
                    }
                }
                ApplicationChangeType::ParameterRemoved => {
                    if let Some(key) = Self::parameter_referrer(annotation, &change.element) {
                        self.report.add_violation(
                            key,
                            AnnotationViolation::new(
                                AnnotationViolationType::IllegalParameterReference,
                                ViolatedElement::Application(change.element.clone()),
                            ),
                        );
                    }
                }
                ApplicationChangeType::EndpointChanged => {
                    for key in Self::endpoint_referrers(annotation, change.element.id()) {
                        self.report.add_violation(key, AnnotationViolation::from_change(change));
                    }
                }
                ApplicationChangeType::ParameterChanged => {
                    if let Some(key) = Self::parameter_referrer(annotation, &change.element) {
                        self.report.add_violation(key, AnnotationViolation::from_change(change));
                    }
                }
                ApplicationChangeType::EndpointAdded => {
                    self.report.add_violation(
                        AnnotationElementRef::annotation(&annotation.tag),
                        AnnotationViolation::from_change(change),
                    );
                }
                ApplicationChangeType::ParameterAdded => {
                    self.add_parameter_added(annotation, change);
                }
            }
        }

        self
    }

    pub fn report(self) -> AnnotationValidityReport {
        self.report
    }

    fn add_parameter_added(&mut self, annotation: &ApplicationAnnotation, change: &ApplicationChange) {
        let endpoint_id = change.element.endpoint_id();
        let key = if annotation.endpoint_annotation(endpoint_id).is_some() {
            AnnotationElementRef::endpoint_annotation(endpoint_id)
        } else {
            AnnotationElementRef::annotation(&annotation.tag)
        };
        self.report.add_violation(key, AnnotationViolation::from_change(change));
    }

    /// Annotation elements referring to an endpoint: its endpoint annotation and
    /// every input extracting from its responses
    fn endpoint_referrers(annotation: &ApplicationAnnotation, endpoint_id: &str) -> Vec<AnnotationElementRef> {
        let annotated = annotation
            .endpoint_annotation(endpoint_id)
            .map(|_| AnnotationElementRef::endpoint_annotation(endpoint_id));

        let extracting = annotation
            .inputs
            .iter()
            .filter(|input| input.endpoint_references().iter().any(|r| r.id() == endpoint_id))
            .map(|input| AnnotationElementRef::input(input.id()));

        annotated.into_iter().chain(extracting).collect()
    }

    fn parameter_referrer(
        annotation: &ApplicationAnnotation,
        element: &ApplicationElement,
    ) -> Option<AnnotationElementRef> {
        let ApplicationElement::Parameter { endpoint, id } = element else {
            return None;
        };

        annotation
            .endpoint_annotation(endpoint)?
            .parameter_annotations
            .iter()
            .find(|p| p.parameter.id() == id)
            .map(|_| AnnotationElementRef::parameter_annotation(id.as_str()))
    }
}
