// Archivo: state_table.rs
// Propósito: tablas de transición declaradas por tipo de workflow.
use crate::domain::WorkflowKind;
use crate::domain::WorkflowState::{self, *};

const SINGLE_STATES: &[WorkflowState] = &[Started, Uploading, Storing, Indexing, Indexed, Submitting, Submitted,
                                          Canceling, Canceled, Aborted];
const REMOVE_STATES: &[WorkflowState] = &[Started, Unrecording, Unindexing, Unstoring, Removed, Canceling, Canceled,
                                          Aborted];
const REVIEW_STATES: &[WorkflowState] = &[Started, Reviewing, Approved, Rejected, Submitting, Submitted, Canceling,
                                          Canceled, Aborted];
const BULK_STATES: &[WorkflowState] = &[Started, Running, Pausing, Paused, Resuming, Restarting, Completed,
                                        Canceling, Canceled, Aborted];

/// Estados declarados para `kind`.
pub fn states(kind: WorkflowKind) -> &'static [WorkflowState] {
    match kind {
        WorkflowKind::Create | WorkflowKind::Edit => SINGLE_STATES,
        WorkflowKind::Remove => REMOVE_STATES,
        WorkflowKind::Review => REVIEW_STATES,
        WorkflowKind::BulkCreate | WorkflowKind::BulkEdit | WorkflowKind::BulkRemove => BULK_STATES,
    }
}

/// Destinos admitidos desde `from` para `kind`. Vacío para estados
/// terminales o estados que no pertenecen a la tabla.
pub fn targets(kind: WorkflowKind, from: WorkflowState) -> &'static [WorkflowState] {
    match kind {
        WorkflowKind::Create | WorkflowKind::Edit => match from {
            Started => &[Uploading, Canceling, Aborted],
            Uploading => &[Storing, Canceling, Aborted],
            Storing => &[Indexing, Canceling, Aborted],
            // sin cancelación mientras el índice trabaja
            Indexing => &[Indexed, Aborted],
            Indexed => &[Submitting, Canceling, Aborted],
            Submitting => &[Submitted, Aborted],
            Canceling => &[Canceled, Aborted],
            _ => &[],
        },
        WorkflowKind::Remove => match from {
            Started => &[Unrecording, Unindexing, Canceling, Aborted],
            Unrecording => &[Unindexing, Aborted],
            Unindexing => &[Unstoring, Aborted],
            Unstoring => &[Removed, Aborted],
            Canceling => &[Canceled, Aborted],
            _ => &[],
        },
        WorkflowKind::Review => match from {
            Started => &[Reviewing, Canceling, Aborted],
            Reviewing => &[Approved, Rejected, Canceling, Aborted],
            Approved => &[Submitting, Canceling, Aborted],
            Submitting => &[Submitted, Aborted],
            Canceling => &[Canceled, Aborted],
            _ => &[],
        },
        WorkflowKind::BulkCreate | WorkflowKind::BulkEdit | WorkflowKind::BulkRemove => match from {
            Started => &[Running, Canceling, Aborted],
            Running => &[Pausing, Completed, Canceling, Aborted],
            Pausing => &[Paused, Aborted],
            Paused => &[Resuming, Restarting, Canceling, Aborted],
            Resuming => &[Running, Aborted],
            Restarting => &[Running, Aborted],
            Completed => &[Restarting],
            Aborted => &[Restarting],
            Canceling => &[Canceled, Aborted],
            _ => &[],
        },
    }
}

pub fn can_transition(kind: WorkflowKind, from: WorkflowState, to: WorkflowState) -> bool {
    targets(kind, from).contains(&to)
}

pub fn is_member(kind: WorkflowKind, state: WorkflowState) -> bool {
    states(kind).contains(&state)
}
