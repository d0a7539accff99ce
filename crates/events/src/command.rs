use logiclinic_core::AggregateId;

/// A command targets a specific aggregate.
///
/// Commands represent **intent**: a request to change one aggregate. They are
/// transient; only the events they produce are persisted. A rejected command
/// leaves no trace beyond the error returned to the caller.
///
/// One command operates on exactly one aggregate stream; this is what makes
/// the optimistic-concurrency check on append meaningful.
///
/// Clinic scoping is enforced at the event level (envelopes), not here, so
/// command types stay focused on business intent.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
