//! Warning-level diagnostics.
//!
//! Kept in their own test binary so no global subscriber is installed
//! alongside the counting one.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use lifeline_core::{Graph, LogLevel};

/// Counts warn-level events.
struct WarnCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn counting<R>(body: impl FnOnce(&AtomicUsize) -> R) -> R {
    let warnings = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
    tracing::subscriber::with_default(subscriber, || body(&warnings))
}

#[test]
fn second_end_stops_nothing_and_warns_once() {
    counting(|warnings| {
        let graph = Graph::new();
        let stops = Rc::new(Cell::new(0));
        let counter = stops.clone();
        let node = graph.create(
            "window",
            |_: &()| Ok(()),
            move |_: &()| counter.set(counter.get() + 1),
        );

        node.start(()).unwrap();
        assert_eq!(node.end().stopped.len(), 1);
        assert_eq!(warnings.load(Ordering::SeqCst), 0);

        assert!(node.end().stopped.is_empty());
        assert_eq!(stops.get(), 1);
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
    });
}

#[test]
fn skipped_descendants_are_reported_as_warnings() {
    counting(|warnings| {
        let graph = Graph::new();
        let root = graph.create("root", |_: &()| Ok(()), |_| {});
        let broken = root
            .bind("broken", |_: &()| -> anyhow::Result<()> { anyhow::bail!("no adapter") }, |_| {})
            .unwrap();
        broken.bind("pipeline", |_: &()| Ok(()), |_| {}).unwrap();

        let report = root.start(()).unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
    });
}

#[test]
fn node_log_level_carries_over_to_children() {
    counting(|warnings| {
        let graph = Graph::new();
        let loud = graph.create_with_level("loud", LogLevel::Warn, |_: &()| Ok(()), |_| {});
        let child = loud.bind("child", |_: &()| Ok(()), |_| {}).unwrap();
        // "created root" and "bound"
        assert_eq!(warnings.load(Ordering::SeqCst), 2);

        let quiet = graph.create("quiet", |_: &()| Ok(()), |_| {});
        quiet.bind("quiet child", |_: &()| Ok(()), |_| {}).unwrap();
        quiet.start(()).unwrap();
        quiet.end();
        assert_eq!(warnings.load(Ordering::SeqCst), 2);

        loud.start(()).unwrap();
        assert!(child.is_running());
        assert_eq!(warnings.load(Ordering::SeqCst), 4);

        loud.end();
        assert_eq!(warnings.load(Ordering::SeqCst), 6);
    });
}

#[test]
fn unknown_restart_label_warns() {
    counting(|warnings| {
        let graph = Graph::new();
        let root = graph.create("root", |_: &()| Ok(()), |_| {});
        root.start(()).unwrap();

        assert!(root.restart_by_label("overlay").unwrap().is_none());
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
        assert_eq!(root.start_count(), 1);
    });
}
