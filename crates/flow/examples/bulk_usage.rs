use flow::engine::EngineConfig;
use flow::errors::FlowError;
use flow::service::FlowService;
use flow::{WorkflowKind, WorkflowRecord};
use std::sync::Arc;
use submission_domain::{DomainStubs, LiteralOnlyLoader};
use uuid::Uuid;

fn main() -> Result<(), FlowError> {
    let wiring = FlowService::in_memory(EngineConfig::from_env()?, Arc::new(LiteralOnlyLoader));
    let bulk = wiring.service.bulk();

    // Lote con ítems heterogéneos (algunos inválidos)
    let manifest = DomainStubs::sample_manifest();
    let record = WorkflowRecord::new_bulk(WorkflowKind::BulkCreate, Uuid::new_v4(), manifest.id());
    let bulk_id = bulk.create_bulk(record, manifest)?;
    println!("run: {:?}", bulk.run(&bulk_id)?);

    // Pausa con trabajos en vuelo: los hijos se estacionan al terminar su paso
    println!("pause: {:?}", bulk.pause(&bulk_id)?);
    println!("procesados: {}", wiring.service.drain()?);
    println!("{:#?}", bulk.summary(&bulk_id)?);

    println!("resume: {:?}", bulk.resume(&bulk_id)?);
    println!("procesados: {}", wiring.service.drain()?);
    println!("{:#?}", bulk.summary(&bulk_id)?);
    Ok(())
}
