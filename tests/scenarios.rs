//! End-to-end scenarios over a small color store.

use std::sync::Arc;

use microrel::{and, filter, ConstructionError, EntityId, FactStore, Query, Schema, Solution, Value, Var};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `e1[Color] = "red"`, `e2[Color] = "blue"`
fn color_store() -> FactStore {
    let schema = Schema::builder("colors").attr("Color").build().unwrap();
    let mut store = FactStore::new(Arc::new(schema));
    let color = store.schema().attr("Color").unwrap();
    store.insert(EntityId(1), color, "red").unwrap();
    store.insert(EntityId(2), color, "blue").unwrap();
    store
}

fn entities(solutions: &[Solution], var: &Var) -> Vec<EntityId> {
    solutions.iter().filter_map(|s| s.entity(var)).collect()
}

#[test]
fn test_single_literal_match() {
    init_logger();
    let store = color_store();
    let color = store.schema().attr("Color").unwrap();
    let v = Var::new("v");

    let found = Query::new(&[v.clone()], &v.attr_eq(color, "red"))
        .unwrap()
        .collect(&store)
        .unwrap();
    assert_eq!(entities(&found, &v), vec![EntityId(1)]);
}

#[test]
fn test_alternatives_in_list_order() {
    init_logger();
    let store = color_store();
    let color = store.schema().attr("Color").unwrap();
    let v = Var::new("v");

    let found = Query::new(&[v.clone()], &v.attr_in(color, ["red", "blue"]))
        .unwrap()
        .collect(&store)
        .unwrap();
    assert_eq!(entities(&found, &v), vec![EntityId(1), EntityId(2)]);

    let reversed = Query::new(&[v.clone()], &v.attr_in(color, ["blue", "red"]))
        .unwrap()
        .collect(&store)
        .unwrap();
    assert_eq!(entities(&reversed, &v), vec![EntityId(2), EntityId(1)]);
}

#[test]
fn test_conflicting_literals_have_no_solution() {
    init_logger();
    let store = color_store();
    let color = store.schema().attr("Color").unwrap();
    let v = Var::new("v");

    let clause = and([v.attr_eq(color, "red"), v.attr_eq(color, "blue")]);
    let found = Query::new(&[v], &clause).unwrap().collect(&store).unwrap();
    assert!(found.is_empty());
}

#[test]
fn test_filter_applied_after_binding() {
    init_logger();
    let store = color_store();
    let color = store.schema().attr("Color").unwrap();
    let (v, c) = (Var::new("v"), Var::new("c"));

    let clause = and([
        filter("isRed", &[c.clone()]).predicate(|vals| vals[0] == Value::from("red")),
        v.attr_in(color, ["red", "blue"]),
        v.attr_eq_var(color, &c),
    ]);
    let found = Query::new(&[v.clone()], &clause).unwrap().collect(&store).unwrap();
    assert_eq!(entities(&found, &v), vec![EntityId(1)]);
}

#[test]
fn test_filter_over_entity_variable() {
    init_logger();
    let store = color_store();
    let color = store.schema().attr("Color").unwrap();
    let v = Var::new("v");

    let clause = and([
        v.attr_in(color, ["red", "blue"]),
        filter("isFirst", &[v.clone()]).predicate(|vals| vals[0] == Value::Entity(EntityId(1))),
    ]);
    let found = Query::new(&[v.clone()], &clause).unwrap().collect(&store).unwrap();
    assert_eq!(entities(&found, &v), vec![EntityId(1)]);
}

#[test]
fn test_type_constraint() {
    init_logger();
    let schema = Arc::new(Schema::builder("typed").attr("Payload").build().unwrap());
    let payload = schema.attr("Payload").unwrap();
    let mut store = FactStore::new(Arc::clone(&schema));

    store.set_type::<i64>(EntityId(1));
    store.insert(EntityId(1), payload, 3).unwrap();
    store.set_type::<&str>(EntityId(2));
    store.insert(EntityId(2), payload, "x").unwrap();
    store.set_type::<bool>(EntityId(3));
    store.insert(EntityId(3), payload, true).unwrap();

    let v = Var::new("v");
    let clause = v.type_of(&schema, &[&3i64, &"x"]).unwrap();
    let found = Query::new(&[v.clone()], &clause).unwrap().collect(&store).unwrap();
    assert_eq!(entities(&found, &v), vec![EntityId(1), EntityId(2)]);

    let none = v.type_of(&schema, &[&1.5f64]).unwrap();
    let found = Query::new(&[v.clone()], &none).unwrap().collect(&store).unwrap();
    assert!(found.is_empty(), "no f64-typed entities, no error");

    assert!(matches!(
        v.type_of(&schema, &[]),
        Err(ConstructionError::NoTypeSamples { .. })
    ));
}

#[test]
fn test_type_constraint_from_plain_literals() {
    init_logger();
    let schema = Arc::new(Schema::builder("typed").attr("Payload").build().unwrap());
    let payload = schema.attr("Payload").unwrap();
    let mut store = FactStore::new(Arc::clone(&schema));

    // each entity is typed by the value it carries
    for (id, value) in [(1, Value::from(3)), (2, Value::from("x")), (3, Value::from(true))] {
        store.insert(EntityId(id), schema.type_attr(), value.type_tag()).unwrap();
        store.insert(EntityId(id), payload, value).unwrap();
    }

    let v = Var::new("v");
    let clause = v.type_of(&schema, &[&3, &"x"]).unwrap();
    let found = Query::new(&[v.clone()], &clause).unwrap().collect(&store).unwrap();
    assert_eq!(entities(&found, &v), vec![EntityId(1), EntityId(2)]);

    let owned = v.type_of(&schema, &[&String::from("y")]).unwrap();
    let found = Query::new(&[v.clone()], &owned).unwrap().collect(&store).unwrap();
    assert_eq!(entities(&found, &v), vec![EntityId(2)]);
}

#[test]
fn test_entities_sharing_an_attribute_value() {
    init_logger();
    let schema = Arc::new(
        Schema::builder("org")
            .attr("Team")
            .attr("Name")
            .build()
            .unwrap(),
    );
    let team = schema.attr("Team").unwrap();
    let name = schema.attr("Name").unwrap();
    let mut store = FactStore::new(Arc::clone(&schema));

    for (id, who, t) in [(1, "ann", "core"), (2, "ben", "core"), (3, "cat", "web")] {
        store.insert(EntityId(id), name, who).unwrap();
        store.insert(EntityId(id), team, t).unwrap();
    }

    let (t, a, b) = (Var::new("t"), Var::new("a"), Var::new("b"));
    let clause = and([
        t.entities(team, &[a.clone(), b.clone()]),
        a.attr_eq(name, "ann"),
        filter("distinct", &[a.clone(), b.clone()]).predicate(|vals| vals[0] != vals[1]),
    ]);
    let found = Query::new(&[b.clone(), t.clone()], &clause)
        .unwrap()
        .collect(&store)
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].entity(&b), Some(EntityId(2)));
    assert_eq!(found[0].get(&t), Some(&Value::from("core")));
}

#[test]
fn test_early_termination_only_explores_what_is_pulled() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    init_logger();
    let schema = Arc::new(Schema::builder("many").attr("Group").build().unwrap());
    let group = schema.attr("Group").unwrap();
    let mut store = FactStore::new(Arc::clone(&schema));
    for i in 0..1000u64 {
        store.insert(EntityId(i), group, "g").unwrap();
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let v = Var::new("v");
    let clause = and([
        v.attr_eq(group, "g"),
        filter("count", &[v.clone()]).predicate(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        }),
    ]);

    let query = Query::new(&[v], &clause).unwrap();
    let first_three: Vec<_> = query.iter(&store).take(3).collect();
    assert_eq!(first_three.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_filter_failure_reaches_consumer() {
    init_logger();
    let store = color_store();
    let color = store.schema().attr("Color").unwrap();
    let v = Var::new("v");

    let clause = and([
        v.attr_in(color, ["red", "blue"]),
        filter("explode_on_blue", &[v.clone()]).try_predicate(|vals| {
            anyhow::ensure!(vals[0] != Value::Entity(EntityId(2)), "blue entity");
            Ok(true)
        }),
    ]);
    let query = Query::new(&[v.clone()], &clause).unwrap();
    let items: Vec<_> = query.iter(&store).collect();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap().entity(&v), Some(EntityId(1)));
    assert!(items[1].is_err());
}
