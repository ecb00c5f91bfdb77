// End-to-end scenarios through the public Registry API

use chrono::{NaiveDate, TimeZone, Utc};
use racing_registry::{
    Dog, DogStatus, EditContext, Grade, ImportMode, Meet, MeetResult, Operation, RaceResult,
    ReconcilePolicy, Registry, RegistryConfig, RegistryError, Title,
};

fn ctx(actor: &str) -> EditContext {
    EditContext::new(
        actor,
        Utc.with_ymd_and_hms(2025, 6, 20, 12, 0, 0).unwrap(),
        "tests/scenario",
    )
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 20).unwrap()
}

fn adult(cwa: &str) -> Dog {
    let mut dog = Dog::new(cwa, "Scenario Runner");
    dog.birthdate = NaiveDate::from_ymd_opt(2021, 4, 1);
    dog
}

fn held(registry: &Registry, cwa: &str) -> Vec<String> {
    registry
        .list_dog_titles(cwa)
        .unwrap()
        .into_iter()
        .map(|t| t.title)
        .collect()
}

fn with_meets(policy: ReconcilePolicy, count: u32) -> Registry {
    let mut registry = Registry::open_in_memory(policy).unwrap();
    for day in 1..=count {
        registry
            .register_meet(
                Meet::new(&format!("M{:02}", day), NaiveDate::from_ymd_opt(2025, 5, day).unwrap()),
                &ctx("secretary"),
            )
            .unwrap();
    }
    registry
}

#[test]
fn three_results_average_to_twenty() {
    let mut registry = with_meets(ReconcilePolicy::Automatic, 3);
    registry.register_dog(adult("C100"), &ctx("secretary")).unwrap();

    for (meet, points) in [("M01", 30.0), ("M02", 20.0), ("M03", 10.0)] {
        let mut result = MeetResult::new(meet, "C100");
        result.meet_points = Some(points);
        registry.record_meet_result(result, &ctx("secretary")).unwrap();
    }

    let dog = registry.get_dog("C100").unwrap();
    assert_eq!(dog.average, 20.0);
    assert_eq!(dog.meet_points, 60.0);
    assert_eq!(dog.meet_appearances, 3);
    assert_eq!(dog.current_grade, Grade::A);
    assert_eq!(held(&registry, "C100"), vec!["PR"]);
}

#[test]
fn race_cards_roll_up_into_meets_and_counters() {
    let mut registry = with_meets(ReconcilePolicy::Automatic, 2);
    registry.register_dog(adult("C300"), &ctx("secretary")).unwrap();
    registry.register_dog(adult("C301"), &ctx("secretary")).unwrap();

    let card = [
        ("M01", "C300", "1", 1, 10.0),
        ("M01", "C300", "2", 2, 8.0),
        ("M01", "C301", "1", 2, 9.0),
        ("M01", "C301", "2", 1, 9.0),
        ("M02", "C300", "1", 2, 5.0),
        ("M02", "C301", "1", 1, 20.0),
    ];
    for (meet, cwa, race, placement, points) in card {
        let mut run = RaceResult::new(meet, cwa, "A", race);
        run.placement = Some(placement);
        run.meet_points = Some(points);
        registry.record_race_result(run, &ctx("secretary")).unwrap();
    }

    // Level on points and average placement at M01: dog number decides
    let m01 = registry.find_meet_result("M01", "C300").unwrap().unwrap();
    assert_eq!(m01.meet_placement, Some(1));
    assert_eq!(
        registry.find_meet_result("M01", "C301").unwrap().unwrap().meet_placement,
        Some(2)
    );

    let c300 = registry.get_dog("C300").unwrap();
    assert_eq!(c300.meet_points, 23.0);
    assert_eq!(c300.meet_wins, 1);
    assert_eq!(c300.arx_points, 1.0);
    assert_eq!(c300.meet_appearances, 2);

    let c301 = registry.get_dog("C301").unwrap();
    assert_eq!(c301.meet_points, 38.0);
    assert_eq!(c301.average, 19.0);
    assert_eq!(c301.narx_points, 2.0);
}

#[test]
fn arx_trp_pr_scenario_with_zero_average() {
    let mut registry = Registry::open_in_memory(ReconcilePolicy::OnDemand).unwrap();
    let mut dog = adult("C200");
    dog.arx_points = 15.0;
    dog.meet_points = 50.0;
    dog.meet_appearances = 10;
    let stored = registry.register_dog(dog, &ctx("registrar")).unwrap();
    assert_eq!(stored.current_grade, Grade::D);

    let eligibility = registry.evaluate_dog("C200", today()).unwrap();
    assert_eq!(eligibility.grade, Grade::D);
    assert_eq!(eligibility.titles, vec![Title::Arx, Title::Trp, Title::Pr(1)]);
}

#[test]
fn tiers_and_high_combined_preview() {
    let mut registry = Registry::open_in_memory(ReconcilePolicy::OnDemand).unwrap();
    let mut dog = adult("C300");
    dog.meet_points = 250.0;
    dog.high_combined_wins = 7;
    registry.register_dog(dog, &ctx("registrar")).unwrap();

    let codes = registry.evaluate_dog("C300", today()).unwrap().title_codes();
    assert_eq!(codes, vec!["PR3", "HC"]);

    let mut dog = registry.get_dog("C300").unwrap();
    dog.high_combined_wins = 10;
    registry.edit_dog(dog, &ctx("registrar")).unwrap();
    let codes = registry.evaluate_dog("C300", today()).unwrap().title_codes();
    assert_eq!(codes, vec!["PR3", "HCX"]);
}

#[test]
fn inactive_dog_drops_one_grade() {
    let mut registry = Registry::open_in_memory(ReconcilePolicy::OnDemand).unwrap();
    let mut dog = adult("C400");
    dog.average = 15.0;
    dog.meet_appearances = 4;
    assert_eq!(registry.register_dog(dog, &ctx("registrar")).unwrap().current_grade, Grade::A);

    let mut dog = registry.get_dog("C400").unwrap();
    dog.status = DogStatus::Inactive;
    assert_eq!(registry.edit_dog(dog, &ctx("registrar")).unwrap().current_grade, Grade::B);
}

#[test]
fn reconcile_swaps_arx_for_pr_and_leaves_trp_alone() {
    let mut registry = Registry::open_in_memory(ReconcilePolicy::OnDemand).unwrap();
    let mut dog = adult("C500");
    dog.arx_points = 20.0;
    dog.meet_appearances = 10;
    registry.register_dog(dog, &ctx("registrar")).unwrap();

    let first = registry.reconcile_dog_titles("C500", &ctx("registrar")).unwrap();
    assert_eq!(first.added, vec!["ARX", "TRP"]);

    let mut dog = registry.get_dog("C500").unwrap();
    dog.arx_points = 0.0;
    dog.meet_points = 60.0;
    registry.edit_dog(dog, &ctx("registrar")).unwrap();
    assert_eq!(held(&registry, "C500"), vec!["ARX", "TRP"]);

    let second = registry.reconcile_dog_titles("C500", &ctx("registrar")).unwrap();
    assert_eq!(second.added, vec!["PR"]);
    assert_eq!(second.removed, vec!["ARX"]);
    assert_eq!(second.unchanged, vec!["TRP"]);
    assert_eq!(held(&registry, "C500"), vec!["PR", "TRP"]);

    let arx = registry
        .change_log_for_record("DogTitle", "CWANumber=C500|Title=ARX")
        .unwrap();
    assert_eq!(arx.last().unwrap().operation, Operation::Delete);

    let pr = registry
        .change_log_for_record("DogTitle", "CWANumber=C500|Title=PR")
        .unwrap();
    assert_eq!(pr.len(), 1);
    assert_eq!(pr[0].operation, Operation::Insert);

    let trp = registry
        .change_log_for_record("DogTitle", "CWANumber=C500|Title=TRP")
        .unwrap();
    assert_eq!(trp.len(), 1);
}

#[test]
fn narx_threshold_only_adds() {
    let mut registry = Registry::open_in_memory(ReconcilePolicy::Automatic).unwrap();
    let mut dog = adult("C600");
    dog.narx_points = 14.0;
    dog.meet_appearances = 10;
    dog.arx_points = 16.0;
    registry.register_dog(dog, &ctx("registrar")).unwrap();
    assert_eq!(held(&registry, "C600"), vec!["ARX", "TRP"]);

    let mut dog = registry.get_dog("C600").unwrap();
    dog.narx_points = 15.0;
    registry.edit_dog(dog, &ctx("registrar")).unwrap();
    assert_eq!(held(&registry, "C600"), vec!["ARX", "NARX", "TRP"]);
}

#[test]
fn refresh_twice_writes_nothing_the_second_time() {
    let mut registry = with_meets(ReconcilePolicy::OnDemand, 2);
    registry.register_dog(adult("C700"), &ctx("secretary")).unwrap();
    for meet in ["M01", "M02"] {
        let mut result = MeetResult::new(meet, "C700");
        result.meet_points = Some(30.0);
        result.arx_earned = Some(8.0);
        registry.record_meet_result(result, &ctx("secretary")).unwrap();
    }

    let first = registry.refresh_dog("C700", &ctx("secretary")).unwrap();
    assert!(first.stats_changed);
    assert_eq!(first.titles.added, vec!["ARX", "PR"]);

    let entries = registry.change_log().unwrap().len();
    let titles = registry.list_dog_titles("C700").unwrap().len();

    let second = registry.refresh_dog("C700", &ctx("secretary")).unwrap();
    assert!(!second.stats_changed);
    assert!(second.titles.is_noop());
    assert_eq!(registry.change_log().unwrap().len(), entries);
    assert_eq!(registry.list_dog_titles("C700").unwrap().len(), titles);
}

#[test]
fn refresh_all_covers_every_dog() {
    let mut registry = with_meets(ReconcilePolicy::OnDemand, 1);
    for cwa in ["C801", "C802"] {
        registry.register_dog(adult(cwa), &ctx("secretary")).unwrap();
        let mut result = MeetResult::new("M01", cwa);
        result.meet_points = Some(6.0);
        registry.record_meet_result(result, &ctx("secretary")).unwrap();
    }

    let outcomes = registry.refresh_all_dogs(&ctx("secretary")).unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.dog.current_grade == Grade::C));
}

#[test]
fn every_write_names_its_editor() {
    let mut registry = with_meets(ReconcilePolicy::Automatic, 1);
    registry.register_dog(adult("C900"), &ctx("alice")).unwrap();
    let mut result = MeetResult::new("M01", "C900");
    result.meet_points = Some(51.0);
    registry.record_meet_result(result, &ctx("bob")).unwrap();

    let bob = registry.change_log_for_actor("bob").unwrap();
    let tables: Vec<&str> = bob.iter().map(|e| e.changed_table.as_str()).collect();
    // result insert, stats update, PR catalog row, PR award
    assert_eq!(bob.len(), 4);
    assert!(tables.contains(&"MeetResult"));
    assert!(tables.contains(&"Dog"));
    assert!(tables.contains(&"TitleType"));
    assert!(tables.contains(&"DogTitle"));
    assert_eq!(registry.change_log_for_actor("alice").unwrap().len(), 1);
}

#[test]
fn stale_edit_is_a_conflict() {
    let mut registry = Registry::open_in_memory(ReconcilePolicy::OnDemand).unwrap();
    registry.register_dog(adult("C1000"), &ctx("alice")).unwrap();
    let loaded_by_alice = registry.get_dog("C1000").unwrap();
    let mut loaded_by_bob = loaded_by_alice.clone();

    let mut edit = loaded_by_alice;
    edit.call_name = Some("Zip".to_string());
    registry.edit_dog(edit, &ctx("alice")).unwrap();

    loaded_by_bob.call_name = Some("Zap".to_string());
    let err = registry.edit_dog(loaded_by_bob, &ctx("bob")).unwrap_err();
    assert!(matches!(err, RegistryError::ConcurrencyConflict { .. }));
}

#[test]
fn change_log_rejects_updates_and_detects_tampering() {
    let mut registry = Registry::open_in_memory(ReconcilePolicy::OnDemand).unwrap();
    registry.register_dog(adult("C1100"), &ctx("alice")).unwrap();
    let id = registry.change_log().unwrap()[0].id;

    let blocked = registry
        .connection()
        .execute_batch("UPDATE change_log SET changed_by = 'mallory'");
    assert!(blocked.is_err());
    assert!(registry.verify_change_log().unwrap().is_empty());

    registry
        .connection()
        .execute_batch(
            "DROP TRIGGER change_log_append_only;
             UPDATE change_log SET changed_by = 'mallory';",
        )
        .unwrap();
    assert_eq!(registry.verify_change_log().unwrap(), vec![id]);
}

#[test]
fn csv_import_through_the_registry() {
    let mut registry = with_meets(ReconcilePolicy::Automatic, 2);
    registry.register_dog(adult("C1200"), &ctx("secretary")).unwrap();
    let csv = "meetNumber, cwaNumber, meetPoints, meetPlacement\n\
               M01, C1200, 12, 1\n\
               M02, C1200, 9, 2\n\
               M02, C9999, 9, 2\n";

    let summary = registry
        .import_meet_results(csv.as_bytes(), ImportMode::Insert, &ctx("secretary"))
        .unwrap();
    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.refreshed, 1);

    let dog = registry.get_dog("C1200").unwrap();
    assert_eq!(dog.meet_wins, 1);
    assert_eq!(dog.average, 10.5);
    assert_eq!(dog.current_grade, Grade::B);
}

#[test]
fn file_backed_registry_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = RegistryConfig {
        database_path: dir.path().join("registry.db"),
        ..RegistryConfig::default()
    };

    {
        let mut registry = Registry::open(&config).unwrap();
        registry.register_dog(adult("C1300"), &ctx("alice")).unwrap();
    }

    let registry = Registry::open(&config).unwrap();
    assert_eq!(registry.get_dog("C1300").unwrap().registered_name, "Scenario Runner");
    assert_eq!(registry.change_log().unwrap().len(), 1);
}
