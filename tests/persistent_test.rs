use celltrace::classifier::{MatchCondition, RuleField, ServiceRule};
use celltrace::persistent::{load_conventions, save_conventions};
use celltrace::types::Span;
use celltrace::{ComponentClassifier, ConventionClassifier, NamingConventions};

#[test]
fn test_conventions_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("conventions.json");

    let mut conventions = NamingConventions::default();
    conventions.istio_rules.push(ServiceRule {
        field: RuleField::Tag("component".to_string()),
        condition: MatchCondition::equal_to("proxy"),
    });
    conventions.cell_tag = "cell.name".to_string();

    let written = save_conventions(&conventions, Some(path.as_path())).unwrap();
    assert_eq!(written, path);

    let loaded = load_conventions(Some(path.as_path())).unwrap();
    assert_eq!(loaded, conventions);

    // No temporary files are left behind
    let files: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(files, vec![std::ffi::OsString::from("conventions.json")]);
}

#[test]
fn test_loaded_conventions_drive_the_classifier() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conventions.json");

    let mut conventions = NamingConventions::default();
    conventions.istio_rules = vec![ServiceRule::service_name(MatchCondition::regex(
        "^envoy-[0-9]+$",
    ))];
    save_conventions(&conventions, Some(path.as_path())).unwrap();

    let loaded = load_conventions(Some(path.as_path())).unwrap();
    let classifier = ConventionClassifier::new(loaded).unwrap();
    let mut span = Span::new("a", "a", "a");
    span.service_name = "envoy-12".to_string();
    assert!(classifier.is_istio_system_component(&span));
    span.service_name = "istio-mixer".to_string();
    assert!(!classifier.is_istio_system_component(&span));
}

#[test]
fn test_missing_explicit_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_conventions(Some(dir.path().join("missing.json").as_path())).is_err());
}

#[test]
fn test_invalid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conventions.json");
    std::fs::write(&path, "{\"V2\": {}}").unwrap();
    assert!(load_conventions(Some(path.as_path())).is_err());
}
