//! End-to-end integration tests for feature planning.
//!
//! Each test plans against a three-level shop schema
//! (customers → orders → items) and asserts on the exact feature
//! names produced: enumeration order is part of the contract.

use chrono::{TimeZone, Utc};
use featuretools_rs::{
    plan, ColumnType, EntityDef, EntitySet, Error, PlanConfig, PrimitiveLibrary,
    Table, Value,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

// ============================================================================
// Helper: the three-level shop schema
// ============================================================================

fn ts(day: u32) -> Value {
    Value::from(Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap())
}

fn shop() -> EntitySet {
    let mut set = EntitySet::new();

    let customers = EntityDef::new("customers", "id")
        .with_column("id", ColumnType::Identifier)
        .with_column("region", ColumnType::Categorical);
    let mut t = Table::new(["id", "region"]).unwrap();
    t.push_row([Value::Int(1), Value::from("north")]).unwrap();
    t.push_row([Value::Int(2), Value::from("south")]).unwrap();
    set.add_entity(customers, t).unwrap();

    let orders = EntityDef::new("orders", "id")
        .with_time("ordered_at")
        .with_column("id", ColumnType::Identifier)
        .with_column("customer_id", ColumnType::Identifier)
        .with_column("amount", ColumnType::Numeric)
        .with_column("ordered_at", ColumnType::Timestamp);
    let mut t = Table::new(["id", "customer_id", "amount", "ordered_at"]).unwrap();
    t.push_row([Value::Int(10), Value::Int(1), Value::Float(25.0), ts(1)])
        .unwrap();
    t.push_row([Value::Int(11), Value::Int(2), Value::Float(40.0), ts(2)])
        .unwrap();
    set.add_entity(orders, t).unwrap();

    let items = EntityDef::new("items", "id")
        .with_time("added_at")
        .with_column("id", ColumnType::Identifier)
        .with_column("order_id", ColumnType::Identifier)
        .with_column("price", ColumnType::Numeric)
        .with_column("added_at", ColumnType::Timestamp);
    let mut t = Table::new(["id", "order_id", "price", "added_at"]).unwrap();
    t.push_row([Value::Int(100), Value::Int(10), Value::Float(5.0), ts(1)])
        .unwrap();
    t.push_row([Value::Int(101), Value::Int(10), Value::Float(7.5), ts(1)])
        .unwrap();
    set.add_entity(items, t).unwrap();

    set.add_relationship("customers", "id", "orders", "customer_id")
        .unwrap();
    set.add_relationship("orders", "id", "items", "order_id")
        .unwrap();
    set
}

fn names(specs: &[featuretools_rs::FeatureSpec]) -> Vec<String> {
    specs.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// 1. Default plan at depth 2: exact names, exact order
// ============================================================================

#[test]
fn test_default_plan_names() {
    let set = shop();
    let library = PrimitiveLibrary::standard().unwrap();
    let specs = plan(&set, &library, "customers", &PlanConfig::default()).unwrap();
    let got = names(&specs);

    // 1 base + 5 one-hop + 20 nested + 5 two-hop
    assert_eq!(got.len(), 31);

    // Base, then the one-hop layer in primitive order
    assert_eq!(
        &got[..6],
        &[
            "region",
            "COUNT(orders)",
            "SUM(orders.amount)",
            "MEAN(orders.amount)",
            "MIN(orders.amount)",
            "MAX(orders.amount)",
        ]
    );

    // Depth 2 opens with nested aggregations over the orders feature set
    assert_eq!(got[6], "SUM(orders.COUNT(items))");
    assert!(got.contains(&"MEAN(orders.SUM(items.price))".to_string()));

    // The two-hop direct aggregations close the plan
    assert_eq!(
        &got[26..],
        &[
            "COUNT(orders.items)",
            "SUM(orders.items.price)",
            "MEAN(orders.items.price)",
            "MIN(orders.items.price)",
            "MAX(orders.items.price)",
        ]
    );

    // No identifier, foreign key, or time column leaks into the plan
    for name in &got {
        assert!(!name.contains("customer_id"), "leaked key in {name}");
        assert!(!name.contains("ordered_at"), "leaked clock in {name}");
    }
}

// ============================================================================
// 2. Depth 1 keeps only base and one-hop features
// ============================================================================

#[test]
fn test_depth_one_plan() {
    let set = shop();
    let library = PrimitiveLibrary::standard().unwrap();
    let config = PlanConfig::new().with_max_depth(1);
    let got = names(&plan(&set, &library, "customers", &config).unwrap());

    assert_eq!(
        got,
        vec![
            "region",
            "COUNT(orders)",
            "SUM(orders.amount)",
            "MEAN(orders.amount)",
            "MIN(orders.amount)",
            "MAX(orders.amount)",
        ]
    );
}

// ============================================================================
// 3. Transforms apply to timestamp columns that are not the time index
// ============================================================================

#[test]
fn test_transforms_on_plain_timestamp_column() {
    let mut set = EntitySet::new();
    let visits = EntityDef::new("visits", "id")
        .with_column("id", ColumnType::Identifier)
        .with_column("arrived", ColumnType::Timestamp);
    let mut t = Table::new(["id", "arrived"]).unwrap();
    t.push_row([Value::Int(1), ts(4)]).unwrap();
    set.add_entity(visits, t).unwrap();

    let library = PrimitiveLibrary::standard().unwrap();
    let got = names(&plan(&set, &library, "visits", &PlanConfig::default()).unwrap());

    assert_eq!(
        got,
        vec!["arrived", "YEAR(arrived)", "MONTH(arrived)", "WEEKDAY(arrived)"]
    );
}

// ============================================================================
// 4. Explicit primitive selection narrows the plan
// ============================================================================

#[test]
fn test_explicit_selection() {
    let set = shop();
    let library = PrimitiveLibrary::standard().unwrap();
    let config = PlanConfig::new()
        .with_transforms(Vec::<String>::new())
        .with_aggregations(["SUM"]);
    let got = names(&plan(&set, &library, "customers", &config).unwrap());

    assert_eq!(
        got,
        vec![
            "region",
            "SUM(orders.amount)",
            "SUM(orders.SUM(items.price))",
            "SUM(orders.items.price)",
        ]
    );
}

// ============================================================================
// 5. Excluded columns vanish along with everything derived from them
// ============================================================================

#[test]
fn test_excluded_column() {
    let set = shop();
    let library = PrimitiveLibrary::standard().unwrap();
    let config = PlanConfig::new().with_excluded(["region"]);
    let got = names(&plan(&set, &library, "customers", &config).unwrap());

    assert_eq!(got.len(), 30);
    assert!(got.iter().all(|n| !n.contains("region")));

    // Exclusions bind to the target entity, not to descendants
    let config = PlanConfig::new().with_excluded(["amount"]);
    assert!(matches!(
        plan(&set, &library, "customers", &config),
        Err(Error::Plan(_))
    ));
}

// ============================================================================
// 6. Unknown selections fail loudly
// ============================================================================

#[test]
fn test_unknown_selection_fails() {
    let set = shop();
    let library = PrimitiveLibrary::standard().unwrap();

    let config = PlanConfig::new().with_aggregations(["SUM", "BOGUS"]);
    let err = plan(&set, &library, "customers", &config).unwrap_err();
    assert!(err.to_string().contains("BOGUS"));

    let err = plan(&set, &library, "nope", &PlanConfig::default()).unwrap_err();
    assert!(matches!(err, Error::Plan(_)));
}

// ============================================================================
// 7. Commutative primitives produce one spec per argument set
// ============================================================================

#[test]
fn test_commutative_arguments_planned_once() {
    let mut set = EntitySet::new();
    let readings = EntityDef::new("readings", "id")
        .with_column("id", ColumnType::Identifier)
        .with_column("a", ColumnType::Numeric)
        .with_column("b", ColumnType::Numeric);
    let mut t = Table::new(["id", "a", "b"]).unwrap();
    t.push_row([Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap();
    set.add_entity(readings, t).unwrap();

    let library = PrimitiveLibrary::standard().unwrap();
    let config = PlanConfig::new()
        .with_max_depth(1)
        .with_transforms(["ADD_NUMERIC"]);
    let got = names(&plan(&set, &library, "readings", &config).unwrap());

    assert_eq!(got, vec!["a", "b", "ADD_NUMERIC(a, b)"]);

    // At depth 2 the sum composes with itself, still one spec per set
    let config = PlanConfig::new()
        .with_max_depth(2)
        .with_transforms(["ADD_NUMERIC"]);
    let got = names(&plan(&set, &library, "readings", &config).unwrap());
    assert_eq!(
        got,
        vec![
            "a",
            "b",
            "ADD_NUMERIC(a, b)",
            "ADD_NUMERIC(a, ADD_NUMERIC(a, b))",
            "ADD_NUMERIC(b, ADD_NUMERIC(a, b))",
        ]
    );
}

// ============================================================================
// 8. Determinism and the depth bound, under arbitrary configs
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_plans_are_deterministic_and_depth_bounded(
        depth in 1usize..=3,
        selection in proptest::sample::subsequence(
            vec!["COUNT", "SUM", "MEAN", "MIN", "MAX"],
            1..=5,
        ),
    ) {
        let set = shop();
        let library = PrimitiveLibrary::standard().unwrap();
        let config = PlanConfig::new()
            .with_max_depth(depth)
            .with_aggregations(selection);

        let first = plan(&set, &library, "customers", &config).unwrap();
        let second = plan(&set, &library, "customers", &config).unwrap();
        prop_assert_eq!(names(&first), names(&second));

        let mut seen = std::collections::HashSet::new();
        for spec in &first {
            prop_assert!(spec.depth() <= depth, "{} exceeds depth {}", spec, depth);
            prop_assert!(seen.insert(spec.to_string()), "duplicate name {}", spec);
        }
    }
}
