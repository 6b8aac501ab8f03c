//! End-to-end integration tests for cutoff-time evaluation.
//!
//! Each test runs plan → evaluate → assemble and asserts computed
//! values under the point-in-time rule: a feature for a target row may
//! only see rows stamped within that row's cutoff, through every
//! relationship hop.

use chrono::{DateTime, TimeZone, Utc};
use featuretools_rs::{
    assemble, evaluate, plan, ColumnType, CutoffFrame, CutoffInclusion,
    CutoffPolicy, EntityDef, EntitySet, Error, EvalMode, EvalOptions, Key,
    PlanConfig, PrimitiveLibrary, Table, Value,
};
use pretty_assertions::assert_eq;

// ============================================================================
// Helper: day-granular timestamps and a sessions → events schema
// ============================================================================

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
}

fn ts(d: u32) -> Value {
    Value::from(day(d))
}

/// Three sessions at days 10 / 20 / 30; two events for session 1
/// (days 9 and 15), one for session 2 (day 21), none for session 3.
fn sessions_with_events() -> EntitySet {
    let mut set = EntitySet::new();

    let sessions = EntityDef::new("sessions", "id")
        .with_time("started_at")
        .with_column("id", ColumnType::Identifier)
        .with_column("device", ColumnType::Categorical)
        .with_column("started_at", ColumnType::Timestamp);
    let mut t = Table::new(["id", "device", "started_at"]).unwrap();
    t.push_row([Value::Int(1), Value::from("phone"), ts(10)]).unwrap();
    t.push_row([Value::Int(2), Value::from("laptop"), ts(20)]).unwrap();
    t.push_row([Value::Int(3), Value::from("tablet"), ts(30)]).unwrap();
    set.add_entity(sessions, t).unwrap();

    let events = EntityDef::new("events", "id")
        .with_time("happened_at")
        .with_column("id", ColumnType::Identifier)
        .with_column("session_id", ColumnType::Identifier)
        .with_column("val", ColumnType::Numeric)
        .with_column("happened_at", ColumnType::Timestamp);
    let mut t = Table::new(["id", "session_id", "val", "happened_at"]).unwrap();
    t.push_row([Value::Int(100), Value::Int(1), Value::Int(5), ts(9)]).unwrap();
    t.push_row([Value::Int(101), Value::Int(1), Value::Int(7), ts(15)]).unwrap();
    t.push_row([Value::Int(102), Value::Int(2), Value::Int(2), ts(21)]).unwrap();
    set.add_entity(events, t).unwrap();

    set.add_relationship("sessions", "id", "events", "session_id")
        .unwrap();
    set
}

fn sum_only() -> PlanConfig {
    PlanConfig::new()
        .with_max_depth(1)
        .with_transforms(Vec::<String>::new())
        .with_aggregations(["SUM"])
        .with_excluded(["device"])
}

// ============================================================================
// 1. Own-time cutoffs: each row sums only what predates it
// ============================================================================

#[test]
fn test_own_time_cutoff_sums() {
    let set = sessions_with_events();
    let library = PrimitiveLibrary::standard().unwrap();

    let specs = plan(&set, &library, "sessions", &sum_only()).unwrap();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].to_string(), "SUM(events.val)");

    let (maps, report) =
        evaluate(&set, &library, &specs, "sessions", &EvalOptions::default()).unwrap();
    let matrix = assemble(&set, "sessions", &specs, &maps).unwrap();

    // Session 1 (cutoff day 10) sees only the day-9 event; the day-15
    // event for the same session is in its future. Session 2's single
    // event lands after day 20. Session 3 has no events at all.
    assert_eq!(matrix.get(&Key::from(1), "SUM(events.val)"), Some(&Value::Int(5)));
    assert_eq!(matrix.get(&Key::from(2), "SUM(events.val)"), Some(&Value::Int(0)));
    assert_eq!(matrix.get(&Key::from(3), "SUM(events.val)"), Some(&Value::Int(0)));

    assert_eq!(report.features_planned, 1);
    assert_eq!(report.features_computed, 1);
    assert_eq!(report.batches, 3);
}

// ============================================================================
// 2. Inclusive vs exclusive boundary
// ============================================================================

#[test]
fn test_cutoff_inclusion_boundary() {
    let mut set = EntitySet::new();

    let sessions = EntityDef::new("sessions", "id")
        .with_time("started_at")
        .with_column("id", ColumnType::Identifier)
        .with_column("started_at", ColumnType::Timestamp);
    let mut t = Table::new(["id", "started_at"]).unwrap();
    t.push_row([Value::Int(1), ts(10)]).unwrap();
    set.add_entity(sessions, t).unwrap();

    let events = EntityDef::new("events", "id")
        .with_time("happened_at")
        .with_column("id", ColumnType::Identifier)
        .with_column("session_id", ColumnType::Identifier)
        .with_column("val", ColumnType::Numeric)
        .with_column("happened_at", ColumnType::Timestamp);
    let mut t = Table::new(["id", "session_id", "val", "happened_at"]).unwrap();
    t.push_row([Value::Int(100), Value::Int(1), Value::Int(4), ts(10)]).unwrap();
    t.push_row([Value::Int(101), Value::Int(1), Value::Int(1), ts(3)]).unwrap();
    set.add_entity(events, t).unwrap();
    set.add_relationship("sessions", "id", "events", "session_id")
        .unwrap();

    let library = PrimitiveLibrary::standard().unwrap();
    let config = PlanConfig::new()
        .with_max_depth(1)
        .with_transforms(Vec::<String>::new())
        .with_aggregations(["SUM"]);
    let specs = plan(&set, &library, "sessions", &config).unwrap();

    // Default ≤: the event stamped exactly at the cutoff counts
    let (maps, _) =
        evaluate(&set, &library, &specs, "sessions", &EvalOptions::default()).unwrap();
    let matrix = assemble(&set, "sessions", &specs, &maps).unwrap();
    assert_eq!(matrix.get(&Key::from(1), "SUM(events.val)"), Some(&Value::Int(5)));

    // Strict <: it no longer does
    let options = EvalOptions::new().with_inclusion(CutoffInclusion::Exclusive);
    let (maps, _) = evaluate(&set, &library, &specs, "sessions", &options).unwrap();
    let matrix = assemble(&set, "sessions", &specs, &maps).unwrap();
    assert_eq!(matrix.get(&Key::from(1), "SUM(events.val)"), Some(&Value::Int(1)));
}

// ============================================================================
// 3. Frame cutoffs: per-row times, row order independent of batch order
// ============================================================================

#[test]
fn test_frame_cutoffs() {
    let set = sessions_with_events();
    let library = PrimitiveLibrary::standard().unwrap();

    let config = PlanConfig::new()
        .with_max_depth(1)
        .with_transforms(Vec::<String>::new())
        .with_aggregations(["SUM"]);
    let specs = plan(&set, &library, "sessions", &config).unwrap();
    let spec_names: Vec<String> = specs.iter().map(|s| s.to_string()).collect();
    assert_eq!(spec_names, vec!["device", "SUM(events.val)"]);

    // Deliberately out of row order: session 3 early, 1 late, 2 middle
    let mut frame = CutoffFrame::new();
    frame.set(3, day(5));
    frame.set(1, day(25));
    frame.set(2, day(12));

    let options = EvalOptions::new().with_cutoff(CutoffPolicy::Frame(frame));
    let (maps, report) = evaluate(&set, &library, &specs, "sessions", &options).unwrap();
    let matrix = assemble(&set, "sessions", &specs, &maps).unwrap();

    // Matrix rows stay in table order regardless of batch order
    assert_eq!(matrix.index(), &[Key::from(1), Key::from(2), Key::from(3)]);
    assert_eq!(report.batches, 3);

    // Session 1 at day 25 sees both of its events; session 2 at day 12
    // predates its only event
    assert_eq!(matrix.get(&Key::from(1), "SUM(events.val)"), Some(&Value::Int(12)));
    assert_eq!(matrix.get(&Key::from(2), "SUM(events.val)"), Some(&Value::Int(0)));
    assert_eq!(matrix.get(&Key::from(3), "SUM(events.val)"), Some(&Value::Int(0)));

    // A target row past its own cutoff keeps its identity but reads
    // missing for raw columns: session 2 started at day 20, cutoff day 12
    assert_eq!(matrix.get(&Key::from(1), "device"), Some(&Value::from("phone")));
    assert_eq!(matrix.get(&Key::from(2), "device"), Some(&Value::Missing));
    assert_eq!(matrix.get(&Key::from(3), "device"), Some(&Value::Missing));
}

// ============================================================================
// 4. The cutoff applies transitively through every hop
// ============================================================================

#[test]
fn test_transitive_cutoff_two_hops() {
    let mut set = EntitySet::new();

    let users = EntityDef::new("users", "id")
        .with_time("joined")
        .with_column("id", ColumnType::Identifier)
        .with_column("joined", ColumnType::Timestamp);
    let mut t = Table::new(["id", "joined"]).unwrap();
    t.push_row([Value::Int(1), ts(10)]).unwrap();
    set.add_entity(users, t).unwrap();

    let sessions = EntityDef::new("sessions", "id")
        .with_time("started_at")
        .with_column("id", ColumnType::Identifier)
        .with_column("user_id", ColumnType::Identifier)
        .with_column("started_at", ColumnType::Timestamp);
    let mut t = Table::new(["id", "user_id", "started_at"]).unwrap();
    t.push_row([Value::Int(10), Value::Int(1), ts(5)]).unwrap();
    set.add_entity(sessions, t).unwrap();

    let events = EntityDef::new("events", "id")
        .with_time("happened_at")
        .with_column("id", ColumnType::Identifier)
        .with_column("session_id", ColumnType::Identifier)
        .with_column("val", ColumnType::Numeric)
        .with_column("happened_at", ColumnType::Timestamp);
    let mut t = Table::new(["id", "session_id", "val", "happened_at"]).unwrap();
    t.push_row([Value::Int(100), Value::Int(10), Value::Int(3), ts(6)]).unwrap();
    t.push_row([Value::Int(101), Value::Int(10), Value::Int(9), ts(20)]).unwrap();
    set.add_entity(events, t).unwrap();

    set.add_relationship("users", "id", "sessions", "user_id").unwrap();
    set.add_relationship("sessions", "id", "events", "session_id").unwrap();

    let library = PrimitiveLibrary::standard().unwrap();
    let config = PlanConfig::new()
        .with_max_depth(2)
        .with_transforms(Vec::<String>::new())
        .with_aggregations(["COUNT", "SUM"]);
    let specs = plan(&set, &library, "users", &config).unwrap();

    let (maps, _) = evaluate(&set, &library, &specs, "users", &EvalOptions::default()).unwrap();
    let matrix = assemble(&set, "users", &specs, &maps).unwrap();

    // The day-20 event hangs off a visible session, but it is past the
    // user's day-10 cutoff, so no route may reach it
    let key = Key::from(1);
    assert_eq!(matrix.get(&key, "COUNT(sessions)"), Some(&Value::Int(1)));
    assert_eq!(matrix.get(&key, "COUNT(sessions.events)"), Some(&Value::Int(1)));
    assert_eq!(matrix.get(&key, "SUM(sessions.events.val)"), Some(&Value::Int(3)));
    assert_eq!(matrix.get(&key, "SUM(sessions.SUM(events.val))"), Some(&Value::Int(3)));
}

// ============================================================================
// 5. Entities without a time column are always fully visible
// ============================================================================

#[test]
fn test_atemporal_child_always_visible() {
    let mut set = EntitySet::new();

    let products = EntityDef::new("products", "id")
        .with_time("listed_at")
        .with_column("id", ColumnType::Identifier)
        .with_column("listed_at", ColumnType::Timestamp);
    let mut t = Table::new(["id", "listed_at"]).unwrap();
    t.push_row([Value::Int(1), ts(10)]).unwrap();
    set.add_entity(products, t).unwrap();

    let tags = EntityDef::new("tags", "id")
        .with_column("id", ColumnType::Identifier)
        .with_column("product_id", ColumnType::Identifier)
        .with_column("label", ColumnType::Categorical);
    let mut t = Table::new(["id", "product_id", "label"]).unwrap();
    t.push_row([Value::Int(100), Value::Int(1), Value::from("sale")]).unwrap();
    t.push_row([Value::Int(101), Value::Int(1), Value::from("new")]).unwrap();
    set.add_entity(tags, t).unwrap();
    set.add_relationship("products", "id", "tags", "product_id").unwrap();

    let library = PrimitiveLibrary::standard().unwrap();
    let config = PlanConfig::new()
        .with_max_depth(1)
        .with_transforms(Vec::<String>::new())
        .with_aggregations(["COUNT"]);
    let specs = plan(&set, &library, "products", &config).unwrap();

    let (maps, _) =
        evaluate(&set, &library, &specs, "products", &EvalOptions::default()).unwrap();
    let matrix = assemble(&set, "products", &specs, &maps).unwrap();

    assert_eq!(matrix.get(&Key::from(1), "COUNT(tags)"), Some(&Value::Int(2)));
}

// ============================================================================
// 6. A hole in the cutoff frame is fatal, even in lenient mode
// ============================================================================

#[test]
fn test_missing_frame_entry_is_fatal() {
    let set = sessions_with_events();
    let library = PrimitiveLibrary::standard().unwrap();
    let specs = plan(&set, &library, "sessions", &sum_only()).unwrap();

    let mut frame = CutoffFrame::new();
    frame.set(1, day(25));
    // Sessions 2 and 3 have no entry

    let options = EvalOptions::new()
        .with_cutoff(CutoffPolicy::Frame(frame))
        .with_mode(EvalMode::Lenient);
    let err = evaluate(&set, &library, &specs, "sessions", &options).unwrap_err();

    assert!(matches!(err, Error::Evaluation(_)));
    assert!(err.to_string().contains("no cutoff time"));
}
