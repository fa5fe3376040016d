//! Integration tests for the streaming and cached executives.

use std::any::Any;
use std::sync::{Arc, Mutex};

use vizflow::*;

type EventLog = Arc<Mutex<Vec<PipelineEvent>>>;

fn record_events(pipeline: &mut Pipeline, node: NodeId) -> EventLog {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    pipeline
        .add_observer(node, move |_, event| sink.lock().unwrap().push(event.clone()))
        .unwrap();
    events
}

fn count(events: &EventLog, wanted: &PipelineEvent) -> usize {
    events.lock().unwrap().iter().filter(|e| *e == wanted).count()
}

fn source_executions(pipeline: &Pipeline, node: NodeId) -> usize {
    pipeline
        .algorithm::<ImageSource>(node)
        .expect("node is an ImageSource")
        .execution_count()
}

/// Fails every execution once armed.
#[derive(Default)]
struct FailingFilter {
    armed: bool,
}

impl Algorithm for FailingFilter {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        "FailingFilter"
    }

    fn request_data(
        &mut self,
        ctx: &mut ExecuteContext<'_>,
    ) -> std::result::Result<(), PipelineError> {
        if self.armed {
            return Err(PipelineError::AlgorithmFailed("armed filter refused to run".into()));
        }
        ctx.pass_input(0, 0)
    }
}

#[test]
fn test_combined_update_extent_reset_between_updates() {
    init_logging();
    let mut pipeline = Pipeline::new();
    let source = pipeline.add_algorithm(ImageSource::new(Extent::new(0, 100, 0, 100, 0, 0)));
    let clip = pipeline.add_algorithm(ImageClip::new());
    pipeline.connect(source, 0, clip, 0).unwrap();
    pipeline.set_request_exact_extent(clip, 0, true).unwrap();

    pipeline
        .set_update_extent(clip, 0, Extent::new(0, 100, 0, 80, 0, 0))
        .unwrap();
    pipeline.update(clip).unwrap();
    assert_eq!(pipeline.update_extent(source, 0).unwrap(), Extent::new(0, 100, 0, 80, 0, 0));

    pipeline
        .set_update_extent(clip, 0, Extent::new(0, 100, 0, 50, 0, 0))
        .unwrap();
    pipeline.update(clip).unwrap();

    // The second pass must not keep the 80-row request around.
    assert_eq!(pipeline.update_extent(source, 0).unwrap(), Extent::new(0, 100, 0, 50, 0, 0));
    assert_eq!(pipeline.combined_update_extent(source, 0).unwrap(), Extent::EMPTY);
    assert_eq!(pipeline.combined_update_extent(clip, 0).unwrap(), Extent::EMPTY);
    assert_eq!(
        pipeline.output(clip, 0).unwrap().unwrap().extent(),
        Extent::new(0, 100, 0, 50, 0, 0)
    );
    // The 80-row data already covered the smaller request.
    assert_eq!(source_executions(&pipeline, source), 1);
}

#[test]
fn test_two_consumers_share_one_execution() {
    let mut pipeline = Pipeline::new();
    let source = pipeline.add_algorithm(ImageSource::new(Extent::new(0, 100, 0, 10, 0, 0)));
    let left =
        pipeline.add_algorithm(ImageClip::with_output_extent(Extent::new(0, 30, 0, 10, 0, 0)));
    let right =
        pipeline.add_algorithm(ImageClip::with_output_extent(Extent::new(60, 100, 0, 10, 0, 0)));
    let append = pipeline.add_algorithm(ImageAppend::new());
    pipeline.connect(source, 0, left, 0).unwrap();
    pipeline.connect(source, 0, right, 0).unwrap();
    pipeline.connect(left, 0, append, 0).unwrap();
    pipeline.connect(right, 0, append, 0).unwrap();

    pipeline.update(append).unwrap();

    assert_eq!(source_executions(&pipeline, source), 1);
    let source_algorithm = pipeline.algorithm::<ImageSource>(source).unwrap();
    assert_eq!(source_algorithm.last_extent(), Extent::new(0, 100, 0, 10, 0, 0));
    assert_eq!(pipeline.update_extent(source, 0).unwrap(), Extent::new(0, 100, 0, 10, 0, 0));

    let output = pipeline.output(append, 0).unwrap().unwrap();
    assert_eq!(output.extent(), Extent::new(0, 100, 0, 10, 0, 0));
    let expected = source_algorithm.value_at(65, 4, 0, 0.0);
    let actual = output.image().value(65, 4, 0, 0).unwrap();
    assert!((expected - actual).abs() < 1e-12);
    // The gap between both clips stays zero.
    assert_eq!(output.image().value(45, 4, 0, 0), Some(0.0));
}

#[test]
fn test_cache_hit_skips_upstream() {
    let mut pipeline = Pipeline::new();
    let source = pipeline.add_algorithm(ImageSource::new(Extent::new(0, 99, 0, 9, 0, 0)));
    let cache = pipeline.add_cached_algorithm(ImageCacheFilter::new());
    pipeline.connect(source, 0, cache, 0).unwrap();
    pipeline.set_cache_size(cache, 2).unwrap();
    pipeline.set_request_exact_extent(cache, 0, true).unwrap();

    let a = Extent::new(0, 9, 0, 9, 0, 0);
    let b = Extent::new(20, 29, 0, 9, 0, 0);
    let c = Extent::new(40, 49, 0, 9, 0, 0);

    pipeline.set_update_extent(cache, 0, a).unwrap();
    pipeline.update(cache).unwrap();
    let first_a = pipeline.output(cache, 0).unwrap().unwrap();
    pipeline.set_update_extent(cache, 0, b).unwrap();
    pipeline.update(cache).unwrap();
    assert_eq!(source_executions(&pipeline, source), 2);

    // `a` is still cached: neither the cache node nor its upstream executes.
    let events = record_events(&mut pipeline, cache);
    pipeline.set_update_extent(cache, 0, a).unwrap();
    pipeline.update(cache).unwrap();
    assert_eq!(source_executions(&pipeline, source), 2);
    assert_eq!(count(&events, &PipelineEvent::CacheHit), 1);
    assert_eq!(count(&events, &PipelineEvent::StartExecute), 0);
    assert_eq!(count(&events, &PipelineEvent::EndExecute), 0);
    let hit = pipeline.output(cache, 0).unwrap().unwrap();
    assert!(Arc::ptr_eq(&first_a, &hit));

    // Inserting `c` evicts `b`, the least recently used entry.
    pipeline.set_update_extent(cache, 0, c).unwrap();
    pipeline.update(cache).unwrap();
    assert_eq!(source_executions(&pipeline, source), 3);
    assert_eq!(pipeline.cache(cache).unwrap().len(), 2);

    pipeline.set_update_extent(cache, 0, b).unwrap();
    pipeline.update(cache).unwrap();
    assert_eq!(source_executions(&pipeline, source), 4);

    let stats = pipeline.cache(cache).unwrap();
    assert_eq!(stats.hits(), 1);
    assert!(stats.evictions() >= 1);
}

#[test]
fn test_cache_hit_on_combined_request_skips_upstream() {
    let mut pipeline = Pipeline::with_options(PipelineOptions {
        release_data_after_use: true,
        ..PipelineOptions::default()
    });
    let source = pipeline.add_algorithm(ImageSource::new(Extent::new(0, 100, 0, 10, 0, 0)));
    let cache = pipeline.add_cached_algorithm(ImageCacheFilter::new());
    let left =
        pipeline.add_algorithm(ImageClip::with_output_extent(Extent::new(0, 30, 0, 10, 0, 0)));
    let right =
        pipeline.add_algorithm(ImageClip::with_output_extent(Extent::new(60, 100, 0, 10, 0, 0)));
    let append = pipeline.add_algorithm(ImageAppend::new());
    pipeline.connect(source, 0, cache, 0).unwrap();
    pipeline.connect(cache, 0, left, 0).unwrap();
    pipeline.connect(cache, 0, right, 0).unwrap();
    pipeline.connect(left, 0, append, 0).unwrap();
    pipeline.connect(right, 0, append, 0).unwrap();

    pipeline.update(append).unwrap();
    let first = pipeline.output(append, 0).unwrap().unwrap();
    assert_eq!(source_executions(&pipeline, source), 1);
    assert!(pipeline.output(cache, 0).unwrap().is_none());

    // The first clip's request misses; the combined one hits the entry
    // stored by the previous update.
    let events = record_events(&mut pipeline, cache);
    pipeline.modified(append).unwrap();
    pipeline.update(append).unwrap();

    assert_eq!(source_executions(&pipeline, source), 1);
    assert_eq!(count(&events, &PipelineEvent::CacheHit), 1);
    assert_eq!(count(&events, &PipelineEvent::EndExecute), 0);
    let stats = pipeline.cache(cache).unwrap();
    assert_eq!((stats.hits(), stats.misses()), (1, 3));

    let second = pipeline.output(append, 0).unwrap().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.extent(), first.extent());
    assert_eq!(second.image().scalars(), first.image().scalars());
}

#[test]
fn test_cache_purged_when_upstream_changes() {
    let mut pipeline = Pipeline::new();
    let source = pipeline.add_algorithm(ImageSource::new(Extent::new(0, 9, 0, 9, 0, 0)));
    let cache = pipeline.add_cached_algorithm(ImageCacheFilter::new());
    pipeline.connect(source, 0, cache, 0).unwrap();

    pipeline.update(cache).unwrap();
    pipeline.algorithm_mut::<ImageSource>(source).unwrap().set_maximum(10.0);
    pipeline.update(cache).unwrap();

    assert_eq!(source_executions(&pipeline, source), 2);
    assert_eq!(pipeline.cache(cache).unwrap().len(), 1);
}

#[test]
fn test_repeated_update_is_idempotent() {
    let mut pipeline = Pipeline::new();
    let source = pipeline.add_algorithm(ImageSource::new(Extent::new(0, 20, 0, 20, 0, 0)));
    let filter = pipeline.add_algorithm(ImageShiftScale::new(1.0, 2.0));
    pipeline.connect(source, 0, filter, 0).unwrap();

    pipeline.update(filter).unwrap();
    let first = pipeline.output(filter, 0).unwrap().unwrap();
    pipeline.update(filter).unwrap();
    pipeline.update(filter).unwrap();
    let again = pipeline.output(filter, 0).unwrap().unwrap();

    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(source_executions(&pipeline, source), 1);
}

#[test]
fn test_out_of_bounds_request_leaves_outputs_untouched() {
    let mut pipeline = Pipeline::new();
    let source = pipeline.add_algorithm(ImageSource::new(Extent::new(0, 100, 0, 100, 0, 0)));
    let filter = pipeline.add_algorithm(ImageShiftScale::new(0.0, 1.0));
    pipeline.connect(source, 0, filter, 0).unwrap();
    pipeline.update(filter).unwrap();
    let before = pipeline.output(filter, 0).unwrap().unwrap();
    let events = record_events(&mut pipeline, filter);

    pipeline
        .set_update_extent(filter, 0, Extent::new(0, 200, 0, 50, 0, 0))
        .unwrap();
    let err = pipeline.update(filter).unwrap_err();
    assert!(matches!(err, PipelineError::ExtentOutOfBounds { node, .. } if node == filter));
    let failed = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, PipelineEvent::Failed(_)))
        .count();
    assert_eq!(failed, 1);

    let after = pipeline.output(filter, 0).unwrap().unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(pipeline.combined_update_extent(filter, 0).unwrap(), Extent::EMPTY);
    assert_eq!(source_executions(&pipeline, source), 1);

    // A valid request afterwards works as usual.
    pipeline
        .set_update_extent(filter, 0, Extent::new(0, 100, 0, 50, 0, 0))
        .unwrap();
    pipeline.update(filter).unwrap();
}

#[test]
fn test_algorithm_failure_is_contained() {
    let mut pipeline = Pipeline::new();
    let source = pipeline.add_algorithm(ImageSource::new(Extent::new(0, 10, 0, 10, 0, 0)));
    let failing = pipeline.add_algorithm(FailingFilter::default());
    let sink = pipeline.add_algorithm(ImageShiftScale::new(0.0, 1.0));
    pipeline.connect(source, 0, failing, 0).unwrap();
    pipeline.connect(failing, 0, sink, 0).unwrap();
    pipeline.update(sink).unwrap();
    let before = pipeline.output(sink, 0).unwrap().unwrap();

    let failures = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&failures);
    pipeline
        .add_observer(failing, move |node, event| {
            if let PipelineEvent::Failed(message) = event {
                log.lock().unwrap().push((node, message.clone()));
            }
        })
        .unwrap();
    pipeline.algorithm_mut::<FailingFilter>(failing).unwrap().armed = true;

    let err = pipeline.update(sink).unwrap_err();
    match &err {
        PipelineError::UpstreamFailure { node, algorithm, .. } => {
            assert_eq!(*node, failing);
            assert_eq!(*algorithm, "FailingFilter");
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(matches!(err.root_cause(), PipelineError::AlgorithmFailed(_)));
    assert_eq!(failures.lock().unwrap().len(), 1);
    assert!(Arc::ptr_eq(&before, &pipeline.output(sink, 0).unwrap().unwrap()));
}

#[test]
fn test_conflicting_pieces_are_rejected() {
    struct PieceSplitter;

    impl Algorithm for PieceSplitter {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }

        fn type_name(&self) -> &'static str {
            "PieceSplitter"
        }

        fn number_of_input_ports(&self) -> usize {
            2
        }

        fn request_update_extent(
            &mut self,
            _output_port: usize,
            _request: &UpdateRequest,
            inputs: &mut [Vec<UpdateRequest>],
            _input_information: &[Vec<OutputInformation>],
        ) -> std::result::Result<(), PipelineError> {
            inputs[0][0] = UpdateRequest::for_piece(0, 2, 0);
            inputs[1][0] = UpdateRequest::for_piece(1, 2, 0);
            Ok(())
        }

        fn request_data(
            &mut self,
            ctx: &mut ExecuteContext<'_>,
        ) -> std::result::Result<(), PipelineError> {
            ctx.pass_input(0, 0)
        }
    }

    let mut pipeline = Pipeline::new();
    let source = pipeline.add_algorithm(ImageSource::new(Extent::new(0, 10, 0, 10, 0, 0)));
    let splitter = pipeline.add_algorithm(PieceSplitter);
    pipeline.connect(source, 0, splitter, 0).unwrap();
    pipeline.connect(source, 0, splitter, 1).unwrap();

    assert!(matches!(
        pipeline.update(splitter),
        Err(PipelineError::UnsupportedStreaming { node, .. }) if node == source
    ));
    assert_eq!(source_executions(&pipeline, source), 0);
}

#[test]
fn test_cancellation_between_nodes() {
    let mut pipeline = Pipeline::new();
    let source = pipeline.add_algorithm(ImageSource::new(Extent::new(0, 10, 0, 10, 0, 0)));
    let filter = pipeline.add_algorithm(ImageShiftScale::new(0.0, 1.0));
    pipeline.connect(source, 0, filter, 0).unwrap();

    let token = CancellationToken::new();
    let trigger = token.clone();
    pipeline
        .add_observer(source, move |_, event| {
            if *event == PipelineEvent::EndExecute {
                trigger.cancel();
            }
        })
        .unwrap();

    let err = pipeline.update_with(filter, 0, &token).unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled(node) if node == filter));
    assert!(pipeline.output(source, 0).unwrap().is_some());
    assert!(pipeline.output(filter, 0).unwrap().is_none());

    // Resuming reuses the source output.
    token.reset();
    pipeline.clear_observers(source).unwrap();
    pipeline.update_with(filter, 0, &token).unwrap();
    assert_eq!(source_executions(&pipeline, source), 1);
}

#[test]
fn test_streaming_pieces_cover_whole_extent() {
    let whole = Extent::new(0, 31, 0, 31, 0, 0);
    let mut pipeline = Pipeline::new();
    let source = pipeline.add_algorithm(ImageSource::new(whole));
    let filter = pipeline.add_algorithm(ImageShiftScale::new(0.0, 1.0));
    pipeline.connect(source, 0, filter, 0).unwrap();

    let mut covered = Extent::EMPTY;
    let mut points = 0;
    for piece in 0..4 {
        pipeline.set_update_piece(filter, 0, piece, 4, 0).unwrap();
        pipeline.update(filter).unwrap();
        let output = pipeline.output(filter, 0).unwrap().unwrap();
        assert_eq!(output.information().piece, piece);
        covered = covered.union(&output.extent());
        points += output.image().number_of_points();
    }
    assert_eq!(covered, whole);
    // Neighbouring pieces share a boundary line.
    assert!(points >= whole.number_of_points());
    assert_eq!(source_executions(&pipeline, source), 4);
}
