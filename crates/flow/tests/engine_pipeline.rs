use flow::continuation::{Continuation, NextStep};
use flow::domain::{ActionState, ActionType, StepStatus, WorkflowKind, WorkflowRecord, WorkflowState};
use flow::engine::EngineConfig;
use flow::errors::FlowError;
use flow::repository::WorkflowRepository;
use flow::service::{FlowService, InMemoryFlow};
use std::sync::Arc;
use submission_domain::LiteralOnlyLoader;
use uuid::Uuid;

fn wiring() -> InMemoryFlow {
  FlowService::in_memory(EngineConfig::default(), Arc::new(LiteralOnlyLoader))
}

fn single(kind: WorkflowKind) -> WorkflowRecord {
  WorkflowRecord::new(kind, Uuid::new_v4()).with_item("doc-1")
}

#[test]
fn local_create_pipeline_ends_indexed() {
  let w = wiring();
  let (id, status) = w.service.submit_record(single(WorkflowKind::Create)).expect("submit");
  assert!(matches!(status, StepStatus::Dispatched { .. }));
  assert_eq!(w.service.engine().get(&id).unwrap().state, WorkflowState::Uploading);

  let processed = w.service.drain().expect("drain");
  // upload, store, index; no submit for a local target
  assert_eq!(processed, 3);
  let record = w.service.engine().get(&id).expect("get");
  assert_eq!(record.state, WorkflowState::Indexed);
  assert!(record.staged_file.is_some());
  assert!(record.last_saved.is_some());
  assert!(record.last_indexed.is_some());
  assert!(record.last_submitted.is_none());
  assert_eq!(w.services.calls_of(ActionType::Queue), 0);
}

#[test]
fn remote_create_pipeline_is_submitted() {
  let w = wiring();
  let record = single(WorkflowKind::Create).with_remote("remote-repo", None);
  let (id, _) = w.service.submit_record(record).expect("submit");
  assert_eq!(w.service.drain().expect("drain"), 4);
  let record = w.service.engine().get(&id).expect("get");
  assert_eq!(record.state, WorkflowState::Submitted);
  let remote = record.remote.expect("remote");
  assert_eq!(remote.remote_id, Some(format!("remote-{}", id.simple())));
  assert!(record.last_submitted.is_some());
}

#[test]
fn remote_descriptor_pointing_to_local_repository_stays_local() {
  let w = wiring();
  let record = single(WorkflowKind::Create).with_remote("local", None);
  let (id, _) = w.service.submit_record(record).expect("submit");
  w.service.drain().expect("drain");
  assert_eq!(w.service.engine().get(&id).unwrap().state, WorkflowState::Indexed);
}

#[test]
fn custom_target_policy_forces_submit() {
  let repo = Arc::new(flow::stubs::InMemoryWorkflowRepository::new());
  let queue = Arc::new(flow::stubs::InMemoryJobQueue::new());
  let services = Arc::new(flow::stubs::StubServices::new());
  let engine = Arc::new(flow::engine::WorkflowEngine::new(repo.clone(), queue.clone(), EngineConfig::default())
                          .with_policy(Arc::new(|_: &WorkflowRecord| false)));
  let performer = Arc::new(flow::services::ServicePerformer::new(services.clone(), services.clone(), services.clone()));
  let worker = flow::worker::Worker::new(engine.clone(), queue.clone(), performer);

  let id = engine.create(WorkflowRecord::new(WorkflowKind::Create, Uuid::new_v4())).expect("create");
  engine.launch(&id).expect("launch");
  worker.drain().expect("drain");
  let record = engine.get(&id).expect("get");
  assert_eq!(record.state, WorkflowState::Submitted);
  assert_eq!(record.remote.expect("remote").repository, "remote");
}

#[test]
fn edit_promotes_with_update_action() {
  let w = wiring();
  let (id, _) = w.service.submit_record(single(WorkflowKind::Edit)).expect("submit");
  w.service.drain().expect("drain");
  assert_eq!(w.service.engine().get(&id).unwrap().state, WorkflowState::Indexed);
  assert_eq!(w.services.calls_of(ActionType::Update), 1);
  assert_eq!(w.services.calls_of(ActionType::Store), 0);
}

#[test]
fn cancel_is_rejected_while_indexing() {
  let w = wiring();
  let engine = w.service.engine();
  let id = engine.create(single(WorkflowKind::Create)).expect("create");
  for to in [WorkflowState::Uploading, WorkflowState::Storing, WorkflowState::Indexing] {
    assert!(engine.transition_to(&id, to).expect("transition").is_some());
  }
  let status = engine.cancel(&id).expect("cancel");
  assert_eq!(status, StepStatus::Rejected);
  assert_eq!(engine.get(&id).unwrap().state, WorkflowState::Indexing);
}

#[test]
fn cancel_from_started_lands_canceled() {
  let w = wiring();
  let engine = w.service.engine();
  let id = engine.create(single(WorkflowKind::Create)).expect("create");
  assert_eq!(engine.cancel(&id).expect("cancel"), StepStatus::Completed { state: WorkflowState::Canceled });
  // terminal: nothing else is admitted
  assert!(engine.transition_to(&id, WorkflowState::Uploading).expect("transition").is_none());
  assert!(engine.upload(&id, None).expect("upload").is_rejected());
}

#[test]
fn finished_local_records_cannot_be_canceled_or_aborted() {
  let w = wiring();
  let (id, _) = w.service.submit_record(single(WorkflowKind::Create)).expect("submit");
  w.service.drain().expect("drain");
  let engine = w.service.engine();
  assert_eq!(engine.cancel(&id).expect("cancel"), StepStatus::Rejected);
  assert!(!engine.abort(&id, "tarde").expect("abort"));
  assert_eq!(engine.get(&id).unwrap().state, WorkflowState::Indexed);

  let review = engine.create(single(WorkflowKind::Review)).expect("create");
  engine.launch(&review).expect("launch");
  assert_eq!(engine.approve(&review).expect("approve"), StepStatus::Completed { state: WorkflowState::Approved });
  assert_eq!(engine.cancel(&review).expect("cancel"), StepStatus::Rejected);
  assert_eq!(engine.get(&review).unwrap().state, WorkflowState::Approved);
}

#[test]
fn remote_indexed_record_can_still_abort() {
  let w = wiring();
  let engine = w.service.engine();
  let id = engine.create(single(WorkflowKind::Create).with_remote("remote-repo", None)).expect("create");
  for to in [WorkflowState::Uploading, WorkflowState::Storing, WorkflowState::Indexing, WorkflowState::Indexed] {
    assert!(engine.transition_to(&id, to).expect("transition").is_some());
  }
  assert!(engine.abort(&id, "cola remota caída").expect("abort"));
  assert_eq!(engine.get(&id).unwrap().state, WorkflowState::Aborted);
}

#[test]
fn failed_dispatch_reverts_to_previous_state() {
  let w = wiring();
  let engine = w.service.engine();
  let id = engine.create(single(WorkflowKind::Create)).expect("create");
  w.queue.set_unavailable(true);
  let err = engine.launch(&id).expect_err("dispatch must fail");
  assert!(matches!(err, FlowError::Storage(_)));
  let record = engine.get(&id).expect("get");
  assert_eq!(record.state, WorkflowState::Started);
  assert!(!record.launched);
  let actions = w.repo.actions_for(&id).expect("actions");
  assert_eq!(actions.len(), 1);
  assert_eq!(actions[0].state, ActionState::Failed);

  w.queue.set_unavailable(false);
  engine.launch(&id).expect("relaunch");
  w.service.drain().expect("drain");
  assert_eq!(engine.get(&id).unwrap().state, WorkflowState::Indexed);
}

#[test]
fn failed_action_aborts_with_detail() {
  let w = wiring();
  let engine = w.service.engine();
  let id = engine.create(single(WorkflowKind::Create)).expect("create");
  w.services.fail_on(id, ActionType::Store);
  engine.launch(&id).expect("launch");
  w.service.drain().expect("drain");
  let record = engine.get(&id).expect("get");
  assert_eq!(record.state, WorkflowState::Aborted);
  assert!(record.detail.unwrap_or_default().contains("Store"));
  assert_eq!(w.services.calls_of(ActionType::Index), 0);
}

#[test]
fn action_result_is_delivered_at_most_once() {
  let w = wiring();
  let engine = w.service.engine();
  let id = engine.create(single(WorkflowKind::Create)).expect("create");
  engine.launch(&id).expect("launch");
  let job = w.queue.claim().expect("upload job");

  let first = w.service.worker().process(job.clone()).expect("process");
  assert!(matches!(first, StepStatus::Dispatched { .. }));
  // a duplicated delivery of the same job is dropped
  assert_eq!(w.service.worker().process(job.clone()).expect("process again"), StepStatus::Rejected);
  // calling the callback directly again is an invariant violation
  let err = engine.complete(&job.action_id, job.continuation.clone()).expect_err("second callback");
  assert!(matches!(err, FlowError::Invariant(_)));
  assert_eq!(engine.get(&id).unwrap().state, WorkflowState::Storing);
}

#[test]
fn callback_without_action_record_is_an_invariant_violation() {
  let w = wiring();
  let engine = w.service.engine();
  let id = engine.create(single(WorkflowKind::Create)).expect("create");
  let err = engine.complete(&Uuid::new_v4(), Continuation::new(id, NextStep::UploadDone))
                  .expect_err("missing action");
  assert!(matches!(err, FlowError::Invariant(_)));
  let err = engine.complete(&Uuid::new_v4(), Continuation::new(id, NextStep::Upload))
                  .expect_err("not a callback");
  assert!(matches!(err, FlowError::Invariant(_)));
}

#[test]
fn job_continuation_survives_json_round_trip() {
  let w = wiring();
  let engine = w.service.engine();
  let id = engine.create(single(WorkflowKind::Create)).expect("create");
  engine.launch(&id).expect("launch");
  let mut job = w.queue.claim().expect("job");
  assert_eq!(job.continuation.steps(),
             vec![NextStep::UploadDone, NextStep::Promote, NextStep::Index, NextStep::Submit]);
  let raw = job.continuation.to_json().expect("to json");
  job.continuation = Continuation::from_json(&raw).expect("from json");
  w.service.worker().process(job).expect("process");
  w.service.drain().expect("drain");
  assert_eq!(engine.get(&id).unwrap().state, WorkflowState::Indexed);
}

#[test]
fn remove_pipeline_unrecords_remote_records() {
  let w = wiring();
  let mut record = WorkflowRecord::new(WorkflowKind::Remove, Uuid::new_v4()).with_item("doc-9")
                                                                             .with_remote("remote-repo",
                                                                                          Some("r-9".into()));
  record.last_indexed = Some(chrono::Utc::now());
  let (id, _) = w.service.submit_record(record).expect("submit");
  assert_eq!(w.service.drain().expect("drain"), 3);
  let record = w.service.engine().get(&id).expect("get");
  assert_eq!(record.state, WorkflowState::Removed);
  assert!(record.remote.expect("remote").remote_id.is_none());
  assert!(record.last_indexed.is_none());
  assert_eq!(w.services.calls_of(ActionType::UnRecord), 1);
  assert_eq!(w.services.calls_of(ActionType::UnStore), 1);
}

#[test]
fn local_remove_skips_unrecord() {
  let w = wiring();
  let (id, _) = w.service.submit_record(single(WorkflowKind::Remove)).expect("submit");
  assert_eq!(w.service.drain().expect("drain"), 2);
  assert_eq!(w.service.engine().get(&id).unwrap().state, WorkflowState::Removed);
  assert_eq!(w.services.calls_of(ActionType::UnRecord), 0);
}

#[test]
fn review_approve_and_reject() {
  let w = wiring();
  let engine = w.service.engine();

  let (local, status) = w.service.submit_record(single(WorkflowKind::Review)).expect("review");
  assert_eq!(status, StepStatus::Completed { state: WorkflowState::Reviewing });
  assert_eq!(engine.approve(&local).expect("approve"), StepStatus::Completed { state: WorkflowState::Approved });

  let remote = single(WorkflowKind::Review).with_remote("remote-repo", None);
  let (remote, _) = w.service.submit_record(remote).expect("review");
  assert!(matches!(engine.approve(&remote).expect("approve"), StepStatus::Dispatched { .. }));
  w.service.drain().expect("drain");
  assert_eq!(engine.get(&remote).unwrap().state, WorkflowState::Submitted);

  let (rejected, _) = w.service.submit_record(single(WorkflowKind::Review)).expect("review");
  engine.reject(&rejected, Some("incompleto")).expect("reject");
  let record = engine.get(&rejected).expect("get");
  assert_eq!(record.state, WorkflowState::Rejected);
  assert_eq!(record.detail.as_deref(), Some("incompleto"));
  assert!(engine.approve(&rejected).expect("approve").is_rejected());
}

#[test]
fn revert_restores_state_outside_the_table() {
  let w = wiring();
  let engine = w.service.engine();
  let id = engine.create(single(WorkflowKind::Create)).expect("create");
  let prev = engine.transition_to(&id, WorkflowState::Uploading).expect("transition").expect("applied");
  assert_eq!(prev, WorkflowState::Started);
  engine.revert_to(&id, prev).expect("revert");
  assert_eq!(engine.get(&id).unwrap().state, WorkflowState::Started);
}

#[test]
fn bulk_kinds_cannot_be_launched_directly() {
  let w = wiring();
  let engine = w.service.engine();
  let record = WorkflowRecord::new_bulk(WorkflowKind::BulkCreate, Uuid::new_v4(), Uuid::new_v4());
  let id = engine.create(record).expect("create");
  assert!(matches!(engine.launch(&id), Err(FlowError::InvalidArgument(_))));
  assert!(w.repo.find_record(&id).unwrap().is_some());
}
