use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use idpa_store::{
    AnnotationElementRef, AnnotationStorageManager, ApplicationAnnotation, ApplicationChange,
    ApplicationChangeType, ApplicationElement, ApplicationStorageManager, Application, DirectListInput,
    DocumentCodec, EndpointAnnotation, ExtractedInput, ExtractionPattern, FileSystemStorage, HttpEndpoint,
    HttpParameter, HttpParameterType, IdpaError, IdpaStorage, IdpaStorageListener, Input, ParameterAnnotation, ValueExtraction,
    VersionOrTimestamp, WeakReference,
};
use tempfile::TempDir;

const TAG: &str = "shop";

struct Fixture {
    _dir: TempDir,
    storage: Arc<FileSystemStorage>,
    applications: ApplicationStorageManager<FileSystemStorage>,
    annotations: Arc<AnnotationStorageManager<FileSystemStorage>>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileSystemStorage::new(dir.path(), DocumentCodec::yaml()).unwrap());
        Self {
            applications: ApplicationStorageManager::new(storage.clone()),
            annotations: AnnotationStorageManager::new(storage.clone()),
            storage,
            _dir: dir,
        }
    }

    fn save_application(&self, application: Application) {
        self.applications
            .save_or_update(TAG, application, &BTreeSet::new())
            .unwrap();
    }

    fn save_annotation(&self, annotation: ApplicationAnnotation) {
        let report = self.annotations.save_or_update(TAG, annotation).unwrap();
        assert!(!report.is_breaking(), "unexpected breaking report: {:?}", report);
    }

    fn is_broken(&self, version: &VersionOrTimestamp) -> bool {
        self.annotations.is_broken(TAG, version).unwrap()
    }
}

fn v(minor: u64) -> VersionOrTimestamp {
    VersionOrTimestamp::version(1, minor, 0)
}

fn login(with_user: bool) -> HttpEndpoint {
    let endpoint = HttpEndpoint::new("login", "POST", "/login");
    if with_user {
        endpoint.with_parameter(HttpParameter::new("user", "user", HttpParameterType::Form))
    } else {
        endpoint
    }
}

fn search() -> HttpEndpoint {
    HttpEndpoint::new("search", "GET", "/search")
        .with_parameter(HttpParameter::new("q", "q", HttpParameterType::Query))
}

fn cart() -> HttpEndpoint {
    HttpEndpoint::new("cart", "GET", "/cart")
}

fn users() -> Input {
    Input::Direct(DirectListInput {
        id: "users".to_string(),
        data: vec!["alice".to_string(), "bob".to_string()],
    })
}

fn terms() -> Input {
    Input::Direct(DirectListInput {
        id: "terms".to_string(),
        data: vec!["bike".to_string()],
    })
}

fn login_annotation(version: VersionOrTimestamp) -> ApplicationAnnotation {
    ApplicationAnnotation::new(TAG, version)
        .with_input(users())
        .with_endpoint_annotation(
            EndpointAnnotation::new("login").with_parameter_annotation(ParameterAnnotation::new("user", "users")),
        )
}

fn search_annotation(version: VersionOrTimestamp) -> ApplicationAnnotation {
    ApplicationAnnotation::new(TAG, version)
        .with_input(terms())
        .with_endpoint_annotation(
            EndpointAnnotation::new("search").with_parameter_annotation(ParameterAnnotation::new("q", "terms")),
        )
}

#[test]
fn test_removed_parameter_breaks_later_version_until_fixed() {
    let fixture = Fixture::new();
    fixture.save_application(Application::new(TAG, v(1)).with_endpoint(login(true)));
    fixture.save_annotation(login_annotation(v(1)));
    assert!(!fixture.is_broken(&v(1)));

    let report = fixture
        .applications
        .save_or_update(TAG, Application::new(TAG, v(2)).with_endpoint(login(false)), &BTreeSet::new())
        .unwrap();
    assert_eq!(
        report.applied_changes,
        BTreeSet::from([ApplicationChange::new(
            ApplicationChangeType::ParameterRemoved,
            ApplicationElement::parameter("login", "user"),
        )])
    );

    assert!(!fixture.is_broken(&v(1)));
    assert!(fixture.is_broken(&v(2)));
    assert!(fixture.is_broken(&VersionOrTimestamp::version(1, 2, 7)));
    assert_eq!(fixture.annotations.broken_versions(TAG, &v(2)).unwrap(), vec![v(2)]);

    let (fixed, report) = fixture.annotations.read_fixed(TAG, &v(2)).unwrap().unwrap();
    assert_eq!(fixed.version, Some(v(2)));
    assert!(fixed.endpoint_annotation("login").unwrap().parameter_annotations.is_empty());
    assert!(fixed.input("users").is_some());
    assert!(report.is_ok());
    assert!(report
        .violations_before_fix
        .unwrap()
        .contains_key(&AnnotationElementRef::parameter_annotation("user")));

    // The proposal is not the slot's annotation until someone stores it
    assert!(fixture.storage.read_annotation(TAG, &v(2)).unwrap().is_none());

    fixture.save_annotation(fixed);
    assert!(!fixture.is_broken(&v(2)));
    assert!(fixture.annotations.read_fixed(TAG, &v(2)).unwrap().is_none());
    assert!(fixture.annotations.broken_versions(TAG, &v(2)).unwrap().is_empty());
}

#[test]
fn test_breakage_is_bounded_by_next_application() {
    let fixture = Fixture::new();
    fixture.save_application(Application::new(TAG, v(1)).with_endpoint(login(true)).with_endpoint(search()));
    fixture.save_annotation(search_annotation(v(1)));
    fixture.save_application(
        Application::new(TAG, v(3))
            .with_endpoint(login(true))
            .with_endpoint(search())
            .with_endpoint(cart()),
    );
    assert!(!fixture.is_broken(&v(3)));

    // Inserted between v1 and v3, drops the annotated endpoint
    fixture.save_application(Application::new(TAG, v(2)).with_endpoint(login(true)));

    assert!(!fixture.is_broken(&v(1)));
    assert!(fixture.is_broken(&v(2)));
    assert!(fixture.is_broken(&VersionOrTimestamp::version(1, 2, 5)));
    assert!(!fixture.is_broken(&v(3)));

    assert!(fixture.annotations.broken_versions(TAG, &v(1)).unwrap().is_empty());
    assert_eq!(fixture.annotations.broken_versions(TAG, &v(2)).unwrap(), vec![v(2)]);
    assert!(fixture.annotations.broken_versions(TAG, &v(3)).unwrap().is_empty());
}

#[test]
fn test_equal_successor_is_relabeled() {
    let fixture = Fixture::new();
    let x = Application::new(TAG, v(1)).with_endpoint(login(true));
    let y = Application::new(TAG, v(3)).with_endpoint(login(true)).with_endpoint(cart());
    fixture.save_application(x);
    fixture.save_application(y.clone());

    let report = fixture
        .applications
        .save_or_update(TAG, Application { version: v(2), ..y.clone() }, &BTreeSet::new())
        .unwrap();

    assert_eq!(report.updated_application.version, v(2));
    assert_eq!(fixture.storage.versions(TAG).unwrap(), vec![v(2), v(1)]);
    assert!(fixture.storage.read_application(TAG, &v(3)).unwrap().is_none());
    assert_eq!(
        fixture.storage.read_application(TAG, &v(2)).unwrap().unwrap(),
        Application { version: v(2), ..y }
    );
    assert_eq!(fixture.storage.read_latest(TAG).unwrap().unwrap().version, v(2));
}

#[test]
fn test_equal_predecessor_is_not_stored() {
    let fixture = Fixture::new();
    let x = Application::new(TAG, v(1)).with_endpoint(login(true));
    fixture.save_application(x.clone());
    fixture.save_application(Application::new(TAG, v(3)).with_endpoint(login(true)).with_endpoint(cart()));

    let report = fixture
        .applications
        .save_or_update(TAG, Application { version: v(2), ..x.clone() }, &BTreeSet::new())
        .unwrap();

    assert!(!report.has_changes());
    assert_eq!(report.updated_application, x);
    assert_eq!(fixture.storage.versions(TAG).unwrap(), vec![v(3), v(1)]);
}

#[test]
fn test_resubmitting_is_idempotent() {
    let fixture = Fixture::new();
    let application = Application::new(TAG, v(1)).with_endpoint(login(true));
    fixture.save_application(application.clone());

    let report = fixture
        .applications
        .save_or_update(TAG, application.clone(), &BTreeSet::new())
        .unwrap();
    assert!(!report.has_changes());
    assert_eq!(fixture.storage.versions(TAG).unwrap(), vec![v(1)]);
    assert_eq!(fixture.applications.read(TAG, None).unwrap(), Some(application));
}

#[test]
fn test_first_application_reports_everything() {
    let fixture = Fixture::new();
    let report = fixture
        .applications
        .save_or_update(TAG, Application::new("other", v(1)).with_endpoint(login(true)), &BTreeSet::new())
        .unwrap();

    assert!(report.applied_changes.contains(&ApplicationChange::new(
        ApplicationChangeType::EndpointAdded,
        ApplicationElement::endpoint("login"),
    )));
    assert_eq!(report.before_version, None);
    // The tag argument wins over the document's own
    assert_eq!(fixture.storage.read_latest(TAG).unwrap().unwrap().tag, TAG);
}

#[test]
fn test_ignored_changes_keep_stored_state() {
    let fixture = Fixture::new();
    fixture.save_application(Application::new(TAG, v(1)).with_endpoint(login(true)));

    let ignored = BTreeSet::from([ApplicationChangeType::ParameterRemoved]);
    let report = fixture
        .applications
        .save_or_update(
            TAG,
            Application::new(TAG, v(2)).with_endpoint(login(false)).with_endpoint(cart()),
            &ignored,
        )
        .unwrap();

    assert_eq!(
        report.ignored_changes,
        BTreeSet::from([ApplicationChange::new(
            ApplicationChangeType::ParameterRemoved,
            ApplicationElement::parameter("login", "user"),
        )])
    );
    assert_eq!(
        report.applied_changes,
        BTreeSet::from([ApplicationChange::new(
            ApplicationChangeType::EndpointAdded,
            ApplicationElement::endpoint("cart"),
        )])
    );

    let stored = fixture.storage.read_application(TAG, &v(2)).unwrap().unwrap();
    assert!(stored.endpoint("cart").is_some());
    assert!(stored.parameter("user").is_some());
}

#[test]
fn test_only_ignored_changes_store_nothing() {
    let fixture = Fixture::new();
    fixture.save_application(Application::new(TAG, v(1)).with_endpoint(login(true)));

    let ignored = BTreeSet::from([ApplicationChangeType::ParameterRemoved]);
    let report = fixture
        .applications
        .save_or_update(TAG, Application::new(TAG, v(2)).with_endpoint(login(false)), &ignored)
        .unwrap();

    assert!(!report.has_changes());
    assert_eq!(report.ignored_changes.len(), 1);
    assert_eq!(fixture.storage.versions(TAG).unwrap(), vec![v(1)]);
}

#[test]
fn test_breaking_annotation_is_rejected() {
    let fixture = Fixture::new();
    fixture.save_application(Application::new(TAG, v(1)).with_endpoint(login(true)));

    let report = fixture
        .annotations
        .save_or_update(TAG, search_annotation(v(1)))
        .unwrap();

    assert!(report.is_breaking());
    assert!(report
        .breaking_elements()
        .any(|e| e == &AnnotationElementRef::endpoint_annotation("search")));
    assert!(!fixture.storage.has_annotation(TAG, &v(1)).unwrap());
}

#[test]
fn test_annotation_preconditions() {
    let fixture = Fixture::new();

    let mut unversioned = login_annotation(v(1));
    unversioned.version = None;
    let err = fixture.annotations.save_or_update(TAG, unversioned).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<IdpaError>(),
        Some(IdpaError::MissingAnnotationVersion { .. })
    ));

    let err = fixture
        .annotations
        .save_or_update(TAG, login_annotation(v(1)))
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<IdpaError>(), Some(IdpaError::NoApplication { .. })));

    // An annotation older than every application has nothing to be checked against
    fixture.save_application(Application::new(TAG, v(2)).with_endpoint(login(true)));
    let err = fixture
        .annotations
        .save_or_update(TAG, login_annotation(v(1)))
        .unwrap_err();
    assert!(matches!(err.downcast_ref::<IdpaError>(), Some(IdpaError::NoApplication { .. })));
}

#[test]
fn test_unrepairable_annotation_stays_broken() {
    let fixture = Fixture::new();
    let token = HttpEndpoint::new("token", "POST", "/token");
    let checkout = HttpEndpoint::new("checkout", "POST", "/checkout")
        .with_parameter(HttpParameter::new("session", "X-Session", HttpParameterType::Header));

    fixture.save_application(
        Application::new(TAG, v(1))
            .with_endpoint(token)
            .with_endpoint(checkout.clone()),
    );

    let session = Input::Extracted(ExtractedInput {
        id: "session".to_string(),
        initial_value: None,
        extractions: vec![ValueExtraction {
            from: WeakReference::new("token"),
            pattern: ExtractionPattern::JsonPath {
                path: "$.session".to_string(),
            },
            match_number: 0,
        }],
    });
    fixture.save_annotation(
        ApplicationAnnotation::new(TAG, v(1))
            .with_input(session)
            .with_endpoint_annotation(
                EndpointAnnotation::new("checkout")
                    .with_parameter_annotation(ParameterAnnotation::new("session", "session")),
            ),
    );

    fixture.save_application(Application::new(TAG, v(2)).with_endpoint(checkout));

    assert!(fixture.is_broken(&v(2)));
    assert!(fixture.annotations.read_fixed(TAG, &v(2)).unwrap().is_none());

    // Manual correction
    fixture.save_annotation(
        ApplicationAnnotation::new(TAG, v(2))
            .with_input(Input::Direct(DirectListInput {
                id: "session".to_string(),
                data: vec!["static".to_string()],
            }))
            .with_endpoint_annotation(
                EndpointAnnotation::new("checkout")
                    .with_parameter_annotation(ParameterAnnotation::new("session", "session")),
            ),
    );
    assert!(!fixture.is_broken(&v(2)));
    assert!(!fixture.is_broken(&v(1)));
}

#[test]
fn test_annotation_change_recomputes_following_slots() {
    let fixture = Fixture::new();
    fixture.save_application(Application::new(TAG, v(1)).with_endpoint(login(true)).with_endpoint(search()));
    fixture.save_application(Application::new(TAG, v(2)).with_endpoint(login(true)));
    assert!(!fixture.is_broken(&v(2)));

    // Valid at v1, dangling at v2
    fixture.save_annotation(search_annotation(v(1)));
    assert!(!fixture.is_broken(&v(1)));
    assert!(fixture.is_broken(&v(2)));

    // A newer annotation ends the range of the old one
    fixture.save_annotation(login_annotation(v(2)));
    assert!(!fixture.is_broken(&v(2)));
    assert!(fixture.annotations.read_fixed(TAG, &v(2)).unwrap().is_none());
}

#[test]
fn test_changes_since() {
    let fixture = Fixture::new();
    assert!(fixture.applications.changes_since(TAG, &v(1)).unwrap().is_none());

    fixture.save_application(Application::new(TAG, v(1)).with_endpoint(login(true)));
    fixture.save_application(Application::new(TAG, v(2)).with_endpoint(login(true)).with_endpoint(cart()));

    let delta = fixture.applications.changes_since(TAG, &v(1)).unwrap().unwrap();
    assert_eq!(delta.before_version, Some(v(1)));
    assert_eq!(
        delta.applied_changes,
        BTreeSet::from([ApplicationChange::new(
            ApplicationChangeType::EndpointAdded,
            ApplicationElement::endpoint("cart"),
        )])
    );

    assert!(!fixture
        .applications
        .changes_since(TAG, &v(2))
        .unwrap()
        .unwrap()
        .has_changes());
}

#[test]
fn test_timestamps_follow_versions() {
    let fixture = Fixture::new();
    fixture.save_application(Application::new(TAG, v(1)).with_endpoint(login(true)));
    fixture.save_annotation(login_annotation(v(1)));

    let snapshot = VersionOrTimestamp::now();
    fixture.save_application(Application::new(TAG, snapshot.clone()).with_endpoint(login(false)));

    assert_eq!(fixture.storage.versions(TAG).unwrap(), vec![snapshot.clone(), v(1)]);
    assert!(fixture.is_broken(&snapshot));
    assert!(fixture.is_broken(&VersionOrTimestamp::MAX));
    assert!(!fixture.is_broken(&v(9)));
}

#[derive(Default)]
struct FlakyListener {
    failing: AtomicBool,
}

impl IdpaStorageListener for FlakyListener {
    fn on_application_changed(&self, _tag: &str, _version: &VersionOrTimestamp) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("transient I/O");
        }
        Ok(())
    }

    fn on_annotation_changed(&self, _tag: &str, _version: &VersionOrTimestamp) -> anyhow::Result<()> {
        Ok(())
    }
}

#[test]
fn test_failed_save_can_be_retried() {
    let fixture = Fixture::new();
    fixture.save_application(Application::new(TAG, v(1)).with_endpoint(login(true)));
    fixture.save_annotation(login_annotation(v(1)));

    let flaky = Arc::new(FlakyListener::default());
    let listener: Arc<dyn IdpaStorageListener> = flaky.clone();
    fixture.storage.register_listener(Arc::downgrade(&listener));
    flaky.failing.store(true, Ordering::SeqCst);

    let submitted = Application::new(TAG, v(2)).with_endpoint(login(false));
    let err = fixture
        .applications
        .save_or_update(TAG, submitted.clone(), &BTreeSet::new())
        .unwrap_err();
    assert_eq!(err.to_string(), "transient I/O");
    assert_eq!(fixture.storage.versions(TAG).unwrap(), vec![v(1)]);
    assert!(!fixture.is_broken(&v(2)));

    flaky.failing.store(false, Ordering::SeqCst);
    let report = fixture
        .applications
        .save_or_update(TAG, submitted, &BTreeSet::new())
        .unwrap();
    assert!(report.has_changes());
    assert!(fixture.is_broken(&v(2)));
    assert!(fixture.annotations.read_fixed(TAG, &v(2)).unwrap().is_some());
}

#[test]
fn test_concurrent_saves_of_one_tag() {
    let fixture = Fixture::new();
    fixture.save_application(Application::new(TAG, v(1)).with_endpoint(login(true)));
    fixture.save_annotation(login_annotation(v(1)));

    // Distinct content per version, so no submission collapses into a neighbour
    let submission = |minor: u64| {
        Application::new(TAG, v(minor))
            .with_endpoint(login(minor % 2 == 1))
            .with_endpoint(HttpEndpoint::new(format!("page-{}", minor), "GET", format!("/page/{}", minor)))
    };

    thread::scope(|scope| {
        for parity in [0, 1] {
            let fixture = &fixture;
            scope.spawn(move || {
                for minor in (2..=12).filter(|m| m % 2 == parity) {
                    fixture
                        .applications
                        .save_or_update(TAG, submission(minor), &BTreeSet::new())
                        .unwrap();
                }
            });
        }
    });

    let expected: Vec<VersionOrTimestamp> = (1..=12).rev().map(v).collect();
    assert_eq!(fixture.storage.versions(TAG).unwrap(), expected);

    for minor in 2..=12 {
        let dropped_user = minor % 2 == 0;
        assert_eq!(fixture.is_broken(&v(minor)), dropped_user, "slot 1.{}.0", minor);
        assert_eq!(
            fixture.annotations.broken_versions(TAG, &v(minor)).unwrap(),
            if dropped_user { vec![v(minor)] } else { Vec::new() }
        );
    }
}
