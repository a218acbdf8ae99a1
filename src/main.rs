use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use flow::domain::WorkflowKind;
use flow::engine::EngineConfig;
use flow::service::{FlowService, InMemoryFlow};
use flow::stubs::InMemoryWorkflowRepository;
use flow::worker::spawn_worker;
use submission_batch::{BatchConfig, BatchOptions, BatchSlicer, ControlCommand, ProgressMessage, ProgressSink,
                       RecordingBackend, Response, SubmissionCoordinator, Target};
use submission_domain::{DefaultResolver, FileManifestLoader, InMemoryItemStore, ItemRef, Manifest, ManifestLoader};
use tokio::sync::watch;
use uuid::Uuid;

/// Armado en memoria del motor de envíos para la CLI.
struct App {
    flow: InMemoryFlow,
    coordinator: SubmissionCoordinator<InMemoryWorkflowRepository>,
}

impl App {
    fn from_env() -> Result<Self, Box<dyn Error>> {
        let engine_config = EngineConfig::from_env()?;
        let batch_config = BatchConfig::from_env()?;
        let loader: Arc<dyn ManifestLoader> = Arc::new(FileManifestLoader::default());
        let flow = FlowService::in_memory(engine_config, loader.clone());
        let backend = Arc::new(RecordingBackend::new(Arc::new(InMemoryItemStore::new())));
        let slicer = BatchSlicer::from_config(&batch_config, backend, Arc::new(DefaultResolver::new()));
        let coordinator = SubmissionCoordinator::new(batch_config, slicer, flow.service.bulk().clone(), loader);
        Ok(Self { flow, coordinator })
    }
}

/// Menú interactivo sobre el motor de envíos en memoria. Un worker en
/// segundo plano procesa la cola de trabajos mientras el menú está abierto.
///
/// Opciones soportadas:
/// 1) Listar registros de un manifiesto o de un job
/// 2) Iniciar un lote (create/edit/remove)
/// 3) Pausar un lote
/// 4) Reanudar un lote
/// 5) Cancelar un lote o un registro
/// 6) Envío por lotes (batch_create)
/// 7) Actualización por lotes (batch_update)
/// 8) Procesar la cola de trabajos ahora
/// 9) Salir
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let app = App::from_env()?;
    let (shutdown, rx) = watch::channel(false);
    let worker = spawn_worker(app.flow.service.worker().clone(), Duration::from_millis(100), rx);
    let cfg = app.coordinator.config();
    log::info!("motor de envíos listo: slice {} en [{}, {}], banda de fallos [{}, {})",
               cfg.slice_size,
               cfg.min_slice,
               cfg.max_slice,
               cfg.failure_floor,
               cfg.failure_rate);

    loop {
        println!("\n== Submit CLI menu ==");
        println!("1) Listar registros");
        println!("2) Iniciar lote");
        println!("3) Pausar lote");
        println!("4) Reanudar lote");
        println!("5) Cancelar lote o registro");
        println!("6) Envío por lotes");
        println!("7) Actualización por lotes");
        println!("8) Procesar cola de trabajos");
        println!("9) Salir");
        print!("Elige una opción: ");
        io::stdout().flush().ok();

        let mut choice = String::new();
        io::stdin().read_line(&mut choice)?;
        let command = match choice.trim() {
            "1" => read_target()?.map(ControlCommand::List),
            "2" => {
                let kind = match parse_kind(&prompt("Tipo (create/edit/remove): ")?) {
                    Some(k) => k,
                    None => {
                        eprintln!("Tipo inválido");
                        continue;
                    }
                };
                let manifest = read_manifest()?;
                println!("Manifiesto: {}", manifest.id());
                Some(ControlCommand::Start { kind, manifest })
            }
            "3" => read_target()?.map(ControlCommand::Pause),
            "4" => read_target()?.map(ControlCommand::Resume),
            "5" => read_target()?.map(ControlCommand::Cancel),
            "6" | "7" => {
                let manifest = read_manifest()?;
                let options = BatchOptions::default().with_progress(progress_printer());
                let outcome = if choice.trim() == "6" {
                    app.coordinator.batch_create(&manifest, options)
                } else {
                    app.coordinator.batch_update(&manifest, options)
                };
                match outcome {
                    Ok(response) => print_response(&response),
                    Err(e) => eprintln!("Error en el lote: {}", e),
                }
                None
            }
            "8" => {
                match app.flow.service.drain() {
                    Ok(n) => println!("Trabajos procesados: {} (pendientes: {})", n, app.flow.queue.len()),
                    Err(e) => eprintln!("Error procesando la cola: {}", e),
                }
                None
            }
            "9" => {
                println!("Saliendo...");
                break;
            }
            other => {
                println!("Opción inválida: {}", other);
                None
            }
        };
        if let Some(command) = command {
            match app.coordinator.command(command) {
                Ok(response) => print_response(&response),
                Err(e) => eprintln!("Error: {}", e),
            }
        }
    }

    shutdown.send(true).ok();
    worker.await?;
    Ok(())
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}

fn read_target() -> io::Result<Option<Target>> {
    let kind = prompt("¿Manifiesto o job? (m/j): ")?;
    let raw = prompt("Id (UUID): ")?;
    let id = match Uuid::parse_str(raw.trim()) {
        Ok(u) => u,
        Err(_) => {
            eprintln!("UUID inválido");
            return Ok(None);
        }
    };
    Ok(parse_target(&kind, id))
}

/// Ítems separados por comas, o `@archivo.json` para un manifiesto diferido.
fn read_manifest() -> io::Result<Manifest> {
    let raw = prompt("Ítems (separados por coma, o @archivo.json): ")?;
    Ok(match raw.trim().strip_prefix('@') {
        Some(path) => Manifest::deferred(path.trim()),
        None => Manifest::from_items(parse_items(&raw)),
    })
}

fn parse_items(raw: &str) -> Vec<ItemRef> {
    raw.split(',')
       .map(str::trim)
       .filter(|s| !s.is_empty())
       .map(|s| match s.parse::<i64>() {
           Ok(n) => ItemRef::Number(n),
           Err(_) => ItemRef::from(s),
       })
       .collect()
}

fn parse_kind(raw: &str) -> Option<WorkflowKind> {
    match raw.trim().to_lowercase().as_str() {
        "create" => Some(WorkflowKind::BulkCreate),
        "edit" => Some(WorkflowKind::BulkEdit),
        "remove" => Some(WorkflowKind::BulkRemove),
        _ => None,
    }
}

fn parse_target(kind: &str, id: Uuid) -> Option<Target> {
    match kind.trim().to_lowercase().as_str() {
        "m" => Some(Target::Manifest(id)),
        "j" => Some(Target::Job(id)),
        _ => {
            eprintln!("Destino inválido");
            None
        }
    }
}

fn progress_printer() -> Arc<ProgressSink> {
    Arc::new(|m: &ProgressMessage| {
        println!("  [{}] job {} paso {}: {} enviados, {} fallos ({} ms)",
                 m.manifest_id,
                 m.job_id,
                 m.step.label(),
                 m.data.submitted.len(),
                 m.data.failure.as_ref().map(|f| f.len()).unwrap_or(0),
                 m.duration_ms)
    })
}

fn print_response(response: &Response) {
    match serde_json::to_string_pretty(response) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("No se pudo mostrar la respuesta: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow::domain::WorkflowState;
    use submission_batch::ResponseStatus;

    #[test]
    fn items_are_split_and_typed() {
        let items = parse_items(" a-1, 7 ,, doc-3 ");
        assert_eq!(items, vec![ItemRef::from("a-1"), ItemRef::Number(7), ItemRef::from("doc-3")]);
        assert_eq!(parse_kind("Edit"), Some(WorkflowKind::BulkEdit));
        assert_eq!(parse_kind("review"), None);
        assert!(matches!(parse_target("M", Uuid::nil()), Some(Target::Manifest(_))));
    }

    #[test]
    fn background_worker_completes_a_started_bulk() {
        tokio_test::block_on(async {
            let app = App::from_env().expect("wiring");
            let (shutdown, rx) = watch::channel(false);
            let worker = spawn_worker(app.flow.service.worker().clone(), Duration::from_millis(5), rx);

            let manifest = Manifest::from_items(parse_items("w-1, w-2"));
            let manifest_id = manifest.id();
            let started = app.coordinator
                             .command(ControlCommand::Start { kind: WorkflowKind::BulkCreate, manifest })
                             .expect("start");
            assert_eq!(started.status, ResponseStatus::Ok);

            let bulk_id = app.coordinator.bulk().bulk_for_manifest(&manifest_id).expect("lookup").expect("bulk");
            let mut state = WorkflowState::Running;
            for _ in 0..200 {
                state = app.flow.service.engine().get(&bulk_id).expect("get").state;
                if state == WorkflowState::Completed {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            assert_eq!(state, WorkflowState::Completed);
            shutdown.send(true).expect("shutdown");
            worker.await.expect("join");
        });
    }
}
