//! Integration Tests for the Lifecycle Graph
//!
//! These tests drive whole graphs through start, end, restart, and detach
//! and check the order in which callbacks run.

use std::cell::{Cell, RefCell};
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use tracing_subscriber::EnvFilter;

use lifeline_core::{Graph, GraphConfig, NodeKind, Value};

type Journal = Rc<RefCell<Vec<String>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn journal() -> Journal {
    Rc::new(RefCell::new(Vec::new()))
}

/// Start/stop callbacks that pass an `i32` through and record each call.
fn passthrough(
    journal: &Journal,
    label: &'static str,
) -> (
    impl Fn(&i32) -> anyhow::Result<i32>,
    impl Fn(&i32),
) {
    let on_start = journal.clone();
    let on_stop = journal.clone();
    (
        move |v: &i32| {
            on_start.borrow_mut().push(format!("start {label}"));
            Ok(*v)
        },
        move |_: &i32| on_stop.borrow_mut().push(format!("stop {label}")),
    )
}

fn events(journal: &Journal, prefix: &str) -> Vec<String> {
    journal
        .borrow()
        .iter()
        .filter_map(|entry| entry.strip_prefix(prefix).map(str::to_owned))
        .collect()
}

/// Parents start before children, and teardown is the exact reverse.
#[test]
fn start_is_topological_and_end_is_reversed() {
    init_tracing();
    let graph = Graph::new();
    let log = journal();

    let (start, stop) = passthrough(&log, "root");
    let root = graph.create("root", start, stop);
    let (start, stop) = passthrough(&log, "a");
    let a = root.bind("a", start, stop).unwrap();
    let (start, stop) = passthrough(&log, "b");
    let b = root.bind("b", start, stop).unwrap();
    let (start, stop) = passthrough(&log, "c");
    let c = a.bind("c", start, stop).unwrap();

    let join_log = log.clone();
    let stop_log = log.clone();
    let d = c
        .join(
            &b,
            "d",
            move |x: &i32, y: &i32| {
                join_log.borrow_mut().push("start d".into());
                Ok(x + y)
            },
            move |_: &i32| stop_log.borrow_mut().push("stop d".into()),
        )
        .unwrap();

    let report = root.start(1).unwrap();
    assert!(report.is_clean());
    assert_eq!(*d.value().unwrap(), 2);

    let started = events(&log, "start ");
    assert_eq!(started, vec!["root", "a", "b", "c", "d"]);
    let position = |label: &str| started.iter().position(|s| s == label).unwrap();
    for (parent, child) in [("root", "a"), ("root", "b"), ("a", "c"), ("c", "d"), ("b", "d")] {
        assert!(position(parent) < position(child), "{parent} before {child}");
    }

    let ended = root.end();
    assert_eq!(ended.stopped.len(), 5);

    let mut reversed = started.clone();
    reversed.reverse();
    assert_eq!(events(&log, "stop "), reversed);
    assert!(!d.is_running());
}

/// A two-parent join starts once both parents delivered, in either order.
#[test]
fn join_waits_for_every_parent() {
    init_tracing();

    for a_first in [true, false] {
        let graph = Graph::new();
        let a = graph.create("a", |v: &i32| Ok(*v), |_| {});
        let b = graph.create("b", |v: &&'static str| Ok(v.to_string()), |_| {});

        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        let joined = a
            .join(
                &b,
                "joined",
                move |x: &i32, y: &String| {
                    sink.borrow_mut().push((*x, y.clone()));
                    Ok(())
                },
                |_| {},
            )
            .unwrap();
        assert_eq!(joined.kind(), Some(NodeKind::Join));

        let first = (if a_first { a.start(10) } else { b.start("x") }).unwrap();
        assert_eq!(first.waiting, vec![joined.id()]);
        assert!(!joined.is_running());

        let second = (if a_first { b.start("x") } else { a.start(10) }).unwrap();
        assert!(second.started.contains(&joined.id()));

        assert_eq!(*received.borrow(), vec![(10, "x".to_owned())]);
        assert_eq!(joined.start_count(), 1);
    }
}

/// A parent delivering again re-runs the join with every slot's latest value.
#[test]
fn join_reruns_with_latest_values() {
    init_tracing();
    let graph = Graph::new();
    let a = graph.create("a", |v: &i32| Ok(*v), |_| {});
    let b = graph.create("b", |v: &i32| Ok(*v), |_| {});

    let stops = Rc::new(Cell::new(0));
    let counter = stops.clone();
    let product = a
        .join(
            &b,
            "product",
            |x: &i32, y: &i32| Ok(x * y),
            move |_: &i32| counter.set(counter.get() + 1),
        )
        .unwrap();

    a.start(2).unwrap();
    b.start(3).unwrap();
    assert_eq!(*product.value().unwrap(), 6);

    a.restart_with(5).unwrap();
    assert_eq!(*product.value().unwrap(), 15);
    assert_eq!(stops.get(), 1);
    assert_eq!(b.start_count(), 1);
    assert_eq!(product.start_count(), 2);
}

/// Restart reuses the parent's cached value.
#[test]
fn restart_reuses_cached_parent() {
    init_tracing();
    let graph = Graph::new();
    let root = graph.create("root", |seed: &i32| Ok(*seed), |_| {});

    let stops = Rc::new(Cell::new(0));
    let counter = stops.clone();
    let double = root
        .bind(
            "double",
            |x: &i32| Ok(x * 2),
            move |_: &i32| counter.set(counter.get() + 1),
        )
        .unwrap();

    root.start(5).unwrap();
    assert_eq!(*double.value().unwrap(), 10);

    double.restart().unwrap();
    assert_eq!(*double.value().unwrap(), 10);
    assert_eq!(stops.get(), 1);
    assert_eq!(root.start_count(), 1);
}

/// Restart by label touches the matched node and its descendants only.
#[test]
fn restart_by_label_is_scoped() {
    init_tracing();
    let graph = Graph::new();
    let log = journal();

    let (start, stop) = passthrough(&log, "root");
    let root = graph.create("root", start, stop);
    let (start, stop) = passthrough(&log, "a");
    let a = root.bind("a", start, stop).unwrap();
    let (start, stop) = passthrough(&log, "b");
    let b = a.bind("b", start, stop).unwrap();
    let (start, stop) = passthrough(&log, "other");
    let other = root.bind("other", start, stop).unwrap();

    root.start(1).unwrap();
    log.borrow_mut().clear();

    let report = root.restart_by_label("a").unwrap().unwrap();
    assert_eq!(report.started, vec![a.id(), b.id()]);
    assert_eq!(
        *log.borrow(),
        vec!["stop b", "stop a", "start a", "start b"]
    );
    assert_eq!(root.start_count(), 1);
    assert_eq!(other.start_count(), 1);

    assert!(root.restart_by_label("missing").unwrap().is_none());
    assert!(b.restart_by_label("a").unwrap().is_none());
}

/// Detached subtrees are out of reach of the former parent.
#[test]
fn detached_subtree_is_isolated() {
    init_tracing();
    let graph = Graph::new();
    let log = journal();

    let (start, stop) = passthrough(&log, "root");
    let root = graph.create("root", start, stop);
    let (start, stop) = passthrough(&log, "a");
    let a = root.bind("a", start, stop).unwrap();
    let (start, stop) = passthrough(&log, "b");
    a.bind("b", start, stop).unwrap();

    root.start(1).unwrap();
    let detached = root.remove_children().unwrap();
    assert_eq!(detached, vec![a.erase()]);
    log.borrow_mut().clear();

    root.restart().unwrap();
    assert_eq!(*log.borrow(), vec!["stop root", "start root"]);

    // The detached subtree is still running on its own.
    assert!(a.is_running());
    log.borrow_mut().clear();
    detached[0].end();
    assert_eq!(*log.borrow(), vec!["stop b", "stop a"]);

    let removed = detached[0].clone().discard();
    assert_eq!(removed.removed.len(), 2);
    assert_eq!(graph.node_count(), 1);
}

/// A failed start leaves descendants unstarted and siblings untouched.
#[test]
fn failed_start_skips_descendants() {
    init_tracing();
    let graph = Graph::new();
    let healthy = Rc::new(Cell::new(false));
    let child_calls = Rc::new(Cell::new(0));

    let root = graph.create("root", |v: &i32| Ok(*v), |_| {});
    let flag = healthy.clone();
    let flaky = root
        .bind(
            "flaky",
            move |v: &i32| {
                if flag.get() {
                    Ok(*v)
                } else {
                    anyhow::bail!("device lost")
                }
            },
            |_| {},
        )
        .unwrap();
    let calls = child_calls.clone();
    let child = flaky
        .bind(
            "child",
            move |v: &i32| {
                calls.set(calls.get() + 1);
                Ok(*v)
            },
            |_| {},
        )
        .unwrap();
    let sibling = root.bind("sibling", |v: &i32| Ok(*v), |_| {}).unwrap();

    let report = root.start(3).unwrap();
    assert_eq!(report.failed, vec![flaky.id()]);
    assert_eq!(report.skipped, vec![child.id()]);
    assert_eq!(report.started, vec![root.id(), sibling.id()]);
    assert!(!report.is_clean());
    assert_eq!(child_calls.get(), 0);
    assert!(flaky.value().is_err());

    healthy.set(true);
    let report = flaky.restart().unwrap();
    assert_eq!(report.started, vec![flaky.id(), child.id()]);
    assert_eq!(*child.value().unwrap(), 3);
}

/// Panics in callbacks are contained unless configured otherwise.
#[test]
fn panics_are_contained_by_default() {
    init_tracing();
    let graph = Graph::new();
    let root = graph.create("root", |_: &()| Ok(()), |_| panic!("stop exploded"));
    let child = root
        .bind("child", |_: &()| -> anyhow::Result<()> { panic!("start exploded") }, |_| {})
        .unwrap();

    let report = root.start(()).unwrap();
    assert_eq!(report.failed, vec![child.id()]);

    let ended = root.end();
    assert_eq!(ended.stopped, vec![root.id()]);
    assert!(!root.is_running());

    let strict = Graph::with_config(GraphConfig {
        catch_panics: false,
        ..GraphConfig::default()
    });
    let root = strict.create("root", |_: &()| -> anyhow::Result<()> { panic!("boom") }, |_| {});
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| root.start(())));
    assert!(outcome.is_err());
    assert!(!root.is_running());
}

/// Six parents through the untyped join.
#[test]
fn join_all_takes_any_number_of_parents() {
    init_tracing();
    let graph = Graph::new();
    let parents: Vec<_> = (0..6)
        .map(|i| graph.create(format!("p{i}"), |v: &i32| Ok(*v), |_| {}))
        .collect();
    let erased: Vec<_> = parents.iter().map(|p| p.erase()).collect();

    let sum = graph
        .join_all(
            &erased,
            "sum",
            |values: &[Value]| {
                Ok(values
                    .iter()
                    .filter_map(|v| v.downcast_ref::<i32>())
                    .sum::<i32>())
            },
            |_| {},
        )
        .unwrap();

    for (i, parent) in parents.iter().enumerate() {
        assert!(!sum.is_running());
        parent.start(i as i32 + 1).unwrap();
    }
    assert_eq!(*sum.value().unwrap(), 21);
    assert_eq!(sum.start_count(), 1);
}

/// A diamond below one root starts its join once per episode.
#[test]
fn diamond_starts_once() {
    init_tracing();
    let graph = Graph::new();
    let root = graph.create("root", |v: &i32| Ok(*v), |_| {});
    let left = root.bind("left", |v: &i32| Ok(v + 1), |_| {}).unwrap();
    let right = root.bind("right", |v: &i32| Ok(v + 2), |_| {}).unwrap();
    let bottom = left
        .join(&right, "bottom", |l: &i32, r: &i32| Ok(l * r), |_| {})
        .unwrap();

    let report = root.start(1).unwrap();
    assert_eq!(report.started.len(), 4);
    assert_eq!(*bottom.value().unwrap(), 6);
    assert_eq!(bottom.start_count(), 1);

    root.restart_with(2).unwrap();
    assert_eq!(*bottom.value().unwrap(), 12);
    assert_eq!(bottom.start_count(), 2);
}

/// An early child starts ahead of siblings bound before it.
#[test]
fn early_child_starts_first() {
    init_tracing();
    let graph = Graph::new();
    let log = journal();

    let (start, stop) = passthrough(&log, "root");
    let root = graph.create("root", start, stop);
    let (start, stop) = passthrough(&log, "scene");
    root.bind("scene", start, stop).unwrap();
    let (start, stop) = passthrough(&log, "input");
    root.bind_early("input", start, stop).unwrap();

    root.start(0).unwrap();
    assert_eq!(events(&log, "start "), vec!["root", "input", "scene"]);
}

/// Starting a running root tears the old episode down first.
#[test]
fn reseeding_a_running_root_stops_the_old_values() {
    init_tracing();
    let graph = Graph::new();
    let log = journal();

    let (start, stop) = passthrough(&log, "root");
    let root = graph.create("root", start, stop);
    let (start, stop) = passthrough(&log, "child");
    let child = root.bind("child", start, stop).unwrap();

    root.start(1).unwrap();
    root.start(2).unwrap();

    assert_eq!(
        *log.borrow(),
        vec!["start root", "start child", "stop child", "stop root", "start root", "start child"]
    );
    assert_eq!(*child.value().unwrap(), 2);
}

/// Callbacks may bind into the graph while an episode is running.
#[test]
fn callbacks_can_bind_during_start() {
    init_tracing();
    let graph = Graph::new();
    let handle = graph.clone();
    let root = graph.create(
        "root",
        move |_: &()| {
            let _ = handle.node_count();
            Ok(())
        },
        |_| {},
    );
    let spawner = root.clone();
    root.bind(
        "spawner",
        move |_: &()| {
            spawner.bind("late", |_: &()| Ok(()), |_| {})?;
            Ok(())
        },
        |_| {},
    )
    .unwrap();

    root.start(()).unwrap();
    assert_eq!(graph.node_count(), 3);
    assert!(graph.find("late").is_some());
}
