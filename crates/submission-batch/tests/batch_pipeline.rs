use flow::engine::EngineConfig;
use flow::service::{FlowService, InMemoryFlow};
use flow::stubs::InMemoryWorkflowRepository;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use submission_batch::{BatchConfig, BatchError, BatchOptions, BatchResult, BatchSlicer, Draw, FaultConfig,
                       PipelineStep, ProgressMessage, ProgressSink, RandDraw, RecordingBackend, ResponseStatus,
                       SequenceDraw, StepExecutor, SubmissionCoordinator};
use submission_domain::{DefaultResolver, DomainStubs, InMemoryItemStore, ItemId, ItemRef, ItemStatus, ItemStore,
                        LiteralOnlyLoader, Manifest};

struct Harness {
  _flow: InMemoryFlow,
  store: Arc<InMemoryItemStore>,
  coordinator: SubmissionCoordinator<InMemoryWorkflowRepository>,
}

fn harness_with<F>(configure: F, draw: Arc<dyn Draw>, fault: FaultConfig) -> Harness
  where F: FnOnce(RecordingBackend) -> RecordingBackend
{
  let store = Arc::new(InMemoryItemStore::new());
  let backend = configure(RecordingBackend::new(store.clone()));
  let slicer = BatchSlicer::new(StepExecutor::new(Arc::new(backend), draw, fault), Arc::new(DefaultResolver::new()));
  let flow = FlowService::in_memory(EngineConfig::default(), Arc::new(LiteralOnlyLoader));
  let coordinator =
    SubmissionCoordinator::new(BatchConfig::default(), slicer, flow.service.bulk().clone(), Arc::new(LiteralOnlyLoader));
  Harness { _flow: flow, store, coordinator }
}

fn harness() -> Harness {
  harness_with(|b| b, Arc::new(RandDraw), FaultConfig::default())
}

fn collector() -> (Arc<Mutex<Vec<ProgressMessage>>>, Arc<ProgressSink>) {
  let seen = Arc::new(Mutex::new(Vec::new()));
  let sink_seen = seen.clone();
  let sink: Arc<ProgressSink> = Arc::new(move |m: &ProgressMessage| sink_seen.lock().unwrap().push(m.clone()));
  (seen, sink)
}

fn result_of(data: &serde_json::Value) -> BatchResult {
  serde_json::from_value(data.clone()).expect("batch result payload")
}

#[test]
fn nine_items_run_in_three_slices() {
  let h = harness();
  let (seen, sink) = collector();
  let manifest = Manifest::from_items(DomainStubs::numbered_items(9));
  let response = h.coordinator
                  .batch_create(&manifest, BatchOptions::default().with_progress(sink))
                  .expect("batch");
  assert_eq!(response.status, ResponseStatus::Ok);
  assert_eq!(response.manifest_id, Some(manifest.id()));
  assert!(response.duration_ms.is_some());

  let result = result_of(&response.data);
  assert_eq!(result.count, 9);
  assert_eq!(result.success.len(), 9);
  assert!(result.failure.is_empty());
  assert!(result.is_consistent());

  let messages = seen.lock().unwrap();
  // 3 slices x 4 steps
  assert_eq!(messages.len(), 12);
  let jobs: HashSet<_> = messages.iter().map(|m| m.job_id).collect();
  assert_eq!(jobs.len(), 3);
  assert!(messages.iter().all(|m| m.manifest_id == manifest.id() && m.data.count == 9));
  let sizes: Vec<usize> = messages.iter()
                                  .filter(|m| m.step == PipelineStep::PersistIntent)
                                  .map(|m| m.data.submitted.len())
                                  .collect();
  assert_eq!(sizes, vec![4, 4, 1]);
}

#[test]
fn single_item_goes_through_item_by_item_mode() {
  let h = harness();
  let manifest = Manifest::from_items(vec![ItemRef::from("solo-1")]);
  let response = h.coordinator.batch_create(&manifest, BatchOptions::default()).expect("batch");
  assert_eq!(response.status, ResponseStatus::Ok);
  let result = result_of(&response.data);
  assert_eq!(result.count, 1);
  assert_eq!(result.submitted, vec![ItemId::new("solo-1")]);
  assert_eq!(result.success, vec![ItemId::new("solo-1")]);
  assert_eq!(result.reports[&ItemId::new("solo-1")].status, "(OK)");
}

#[test]
fn failures_at_promote_leave_the_slice_before_index() {
  let h = harness_with(|b| {
                         b.with_failure(PipelineStep::Promote, "item-2", "cuota excedida")
                          .with_failure(PipelineStep::Promote, "item-4", "cuota excedida")
                       },
                       Arc::new(RandDraw),
                       FaultConfig::default());
  let (seen, sink) = collector();
  let manifest = Manifest::from_items(DomainStubs::numbered_items(5));
  let options = BatchOptions { batch_size: Some(5), ..BatchOptions::default() }.with_progress(sink);
  let response = h.coordinator.batch_create(&manifest, options).expect("batch");
  assert_eq!(response.status, ResponseStatus::Partial);

  let result = result_of(&response.data);
  let ids = |names: &[&str]| names.iter().map(|n| ItemId::new(*n)).collect::<Vec<_>>();
  assert_eq!(result.success, ids(&["item-1", "item-3", "item-5"]));
  assert_eq!(result.failure.keys().cloned().collect::<Vec<_>>(), ids(&["item-2", "item-4"]));
  assert!(result.failure.values().all(|r| r.starts_with(PipelineStep::Promote.failure_context())));
  assert!(result.is_consistent());

  let messages = seen.lock().unwrap();
  let index = messages.iter().find(|m| m.step == PipelineStep::Index).expect("index step");
  assert_eq!(index.data.submitted, ids(&["item-1", "item-3", "item-5"]));

  let failed = h.store.status(&manifest.id(), &ItemId::new("item-2")).unwrap().expect("entry");
  assert!(matches!(failed.status, ItemStatus::Failed { ref step, .. } if step == "promote"));
  let ok = h.store.status(&manifest.id(), &ItemId::new("item-5")).unwrap().expect("entry");
  assert_eq!(ok.status, ItemStatus::Ok { step: "index".into() });
}

#[test]
fn injected_fault_fails_only_the_sampled_slice() {
  let fault = FaultConfig { failure_floor: 0.0, failure_rate: 0.5, max_latency_ms: 0 };
  // the first slice-step draws 0.1, every later draw is 0.9
  let h = harness_with(|b| b, Arc::new(SequenceDraw::new(vec![0.1], 0.9)), fault);
  let manifest = Manifest::from_items(DomainStubs::numbered_items(8));
  let response = h.coordinator.batch_create(&manifest, BatchOptions::default()).expect("batch");
  assert_eq!(response.status, ResponseStatus::Partial);
  let result = result_of(&response.data);
  assert_eq!(result.failure.len(), 4);
  assert_eq!(result.success.len(), 4);
  let first: Vec<&String> = result.failure.values().collect();
  assert!(first.iter().all(|r| *r == first[0]));
  assert!(result.is_consistent());
  assert_eq!(h.store.list(&manifest.id()).unwrap().iter().filter(|e| e.status.is_failed()).count(), 4);
}

#[test]
fn systemic_failure_is_absorbed_with_no_raise() {
  let h = harness_with(|b| b.with_outage(PipelineStep::StageUpload, "staging no disponible"),
                       Arc::new(RandDraw),
                       FaultConfig::default());
  let manifest = Manifest::from_items(DomainStubs::numbered_items(6));
  let response = h.coordinator.batch_update(&manifest, BatchOptions::default()).expect("batch");
  assert_eq!(response.status, ResponseStatus::Failed);
  let result = result_of(&response.data);
  assert!(result.success.is_empty());
  assert_eq!(result.failure.len(), 6);
  assert!(result.failure.values().all(|r| r.contains("staging no disponible")));
  assert!(response.error.expect("error").contains("6 fallos"));
}

#[test]
fn systemic_failure_is_raised_without_no_raise() {
  let h = harness_with(|b| b.with_outage(PipelineStep::Index, "índice caído"),
                       Arc::new(RandDraw),
                       FaultConfig::default());
  let manifest = Manifest::from_items(DomainStubs::numbered_items(4));
  let options = BatchOptions { no_raise: false, ..BatchOptions::default() };
  let err = h.coordinator.batch_create(&manifest, options).expect_err("raised");
  assert!(matches!(err, BatchError::Step { ref step, .. } if step == "index"));
}

#[test]
fn invalid_items_make_the_response_partial() {
  let h = harness();
  let response = h.coordinator
                  .batch_create(&DomainStubs::sample_manifest(), BatchOptions::default())
                  .expect("batch");
  assert_eq!(response.status, ResponseStatus::Partial);
  let result = result_of(&response.data);
  assert_eq!(result.count, 6);
  assert_eq!(result.invalid.len(), 2);
  assert_eq!(result.success.len(), 4);
}

#[test]
fn extended_diagnostics_are_always_filled() {
  let h = harness();
  let manifest = Manifest::from_items(DomainStubs::numbered_items(3));
  let options = BatchOptions { extended: true, ..BatchOptions::default() };
  let response = h.coordinator.batch_create(&manifest, options).expect("batch");
  assert_eq!(response.status, ResponseStatus::Ok);
  assert!(response.diagnostic.is_some());
  assert_eq!(response.error.as_deref(), Some("ninguno"));
}

#[test]
fn zero_batch_size_is_a_precondition_error() {
  let h = harness();
  let manifest = Manifest::from_items(DomainStubs::numbered_items(3));
  let options = BatchOptions { batch_size: Some(0), ..BatchOptions::default() };
  assert!(matches!(h.coordinator.batch_create(&manifest, options), Err(BatchError::Validation(_))));
}
