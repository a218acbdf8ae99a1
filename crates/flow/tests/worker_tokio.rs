use flow::domain::{WorkflowKind, WorkflowRecord, WorkflowState};
use flow::engine::EngineConfig;
use flow::service::FlowService;
use flow::worker::spawn_worker;
use std::sync::Arc;
use std::time::Duration;
use submission_domain::LiteralOnlyLoader;
use tokio::sync::watch;
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_worker_drives_pipeline_until_shutdown() {
  let w = FlowService::in_memory(EngineConfig::default(), Arc::new(LiteralOnlyLoader));
  let (tx, rx) = watch::channel(false);
  let handle = spawn_worker(w.service.worker().clone(), Duration::from_millis(5), rx);

  let record = WorkflowRecord::new(WorkflowKind::Create, Uuid::new_v4()).with_item("doc-async");
  let (id, _) = w.service.submit_record(record).expect("submit");

  let mut state = WorkflowState::Started;
  for _ in 0..200 {
    state = w.service.engine().get(&id).expect("get").state;
    if state == WorkflowState::Indexed {
      break;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  assert_eq!(state, WorkflowState::Indexed);
  assert!(w.queue.is_empty());

  tx.send(true).expect("shutdown");
  tokio::time::timeout(Duration::from_secs(2), handle).await
                                                     .expect("worker stops")
                                                     .expect("join");
}
