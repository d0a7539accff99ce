//! Infrastructure wiring: store, bus, projections, workflow services.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx::postgres::PgPool;

use logiclinic_billing::BillingTicketId;
use logiclinic_core::{AggregateId, ClinicId, DomainError, UserId};
use logiclinic_dispensation::{Coverage, DispensationId};
use logiclinic_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use logiclinic_infra::aggregate_types;
use logiclinic_infra::command_dispatcher::{CommandDispatcher, DispatchError};
use logiclinic_infra::event_store::{InMemoryEventStore, PostgresEventStore, StoredEvent};
use logiclinic_infra::pharmacy::{
    AddLineOutcome, DispensationProcessor, DispensingPolicy, PendingTicket, TicketEmitError,
    TicketEmitter, WorkflowError,
};
use logiclinic_infra::projections::{
    ActivePrescriptionsProjection, BillingTicketsProjection, ClinicTariffsProjection,
    DispensationsProjection, LotReadModel, PrescriptionReadModel, StockLevelsProjection,
    TariffReadModel, TariffResolver, TicketReadModel,
};
use logiclinic_infra::read_model::InMemoryClinicStore;
use logiclinic_dispensation::PaymentSplit;
use logiclinic_prescriptions::PrescriptionId;
use logiclinic_pricing::{DefaultTariffCatalog, ServiceId};
use logiclinic_stock::LotId;

use crate::config::ApiConfig;

type MemStore = Arc<InMemoryEventStore>;
type MemBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type PgStore = Arc<PostgresEventStore>;
type TariffStore = Arc<InMemoryClinicStore<ServiceId, TariffReadModel>>;

type StockProjection =
    Arc<StockLevelsProjection<Arc<InMemoryClinicStore<LotId, LotReadModel>>>>;
type PrescriptionsProjection = Arc<
    ActivePrescriptionsProjection<
        Arc<InMemoryClinicStore<PrescriptionId, PrescriptionReadModel>>,
    >,
>;
type DispensationsProjectionHandle = Arc<
    DispensationsProjection<
        Arc<
            InMemoryClinicStore<
                DispensationId,
                logiclinic_infra::projections::DispensationReadModel,
            >,
        >,
    >,
>;
type TicketsProjection =
    Arc<BillingTicketsProjection<Arc<InMemoryClinicStore<BillingTicketId, TicketReadModel>>>>;
type TariffsProjection = Arc<ClinicTariffsProjection<TariffStore>>;

/// The read models every deployment keeps in memory.
#[derive(Clone)]
pub struct ProjectionSet {
    pub stock: StockProjection,
    pub prescriptions: PrescriptionsProjection,
    pub dispensations: DispensationsProjectionHandle,
    pub tickets: TicketsProjection,
    pub tariffs: TariffsProjection,
}

impl ProjectionSet {
    fn new() -> Self {
        Self {
            stock: Arc::new(StockLevelsProjection::new(Arc::new(
                InMemoryClinicStore::new(),
            ))),
            prescriptions: Arc::new(ActivePrescriptionsProjection::new(Arc::new(
                InMemoryClinicStore::new(),
            ))),
            dispensations: Arc::new(DispensationsProjection::new(Arc::new(
                InMemoryClinicStore::new(),
            ))),
            tickets: Arc::new(BillingTicketsProjection::new(Arc::new(
                InMemoryClinicStore::new(),
            ))),
            tariffs: Arc::new(ClinicTariffsProjection::new(Arc::new(
                InMemoryClinicStore::new(),
            ))),
        }
    }

    fn apply(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), String> {
        match envelope.aggregate_type() {
            aggregate_types::LOT => self.stock.apply_envelope(envelope).map_err(|e| e.to_string()),
            aggregate_types::PRESCRIPTION => self
                .prescriptions
                .apply_envelope(envelope)
                .map_err(|e| e.to_string()),
            aggregate_types::DISPENSATION => self
                .dispensations
                .apply_envelope(envelope)
                .map_err(|e| e.to_string()),
            aggregate_types::BILLING_TICKET => self
                .tickets
                .apply_envelope(envelope)
                .map_err(|e| e.to_string()),
            aggregate_types::CLINIC_TARIFF => self
                .tariffs
                .apply_envelope(envelope)
                .map_err(|e| e.to_string()),
            _ => Ok(()),
        }
    }
}

/// Background subscriber: bus -> projections.
fn spawn_projection_pump(
    subscription: Subscription<EventEnvelope<JsonValue>>,
    projections: ProjectionSet,
) {
    tokio::task::spawn_blocking(move || loop {
        match subscription.recv() {
            Ok(envelope) => {
                if let Err(e) = projections.apply(&envelope) {
                    tracing::warn!("projection apply failed: {e}");
                }
            }
            Err(_) => break,
        }
    });
}

pub enum AppServices {
    InMemory {
        dispatcher: Arc<CommandDispatcher<MemStore, MemBus>>,
        processor: Arc<DispensationProcessor<MemStore, MemBus, TariffStore>>,
        emitter: Arc<TicketEmitter<MemStore, MemBus>>,
        projections: ProjectionSet,
        resolver: Arc<TariffResolver<TariffStore>>,
        policy: DispensingPolicy,
    },
    Persistent {
        dispatcher: Arc<CommandDispatcher<PgStore, MemBus>>,
        processor: Arc<DispensationProcessor<PgStore, MemBus, TariffStore>>,
        emitter: Arc<TicketEmitter<PgStore, MemBus>>,
        projections: ProjectionSet,
        resolver: Arc<TariffResolver<TariffStore>>,
        policy: DispensingPolicy,
    },
}

pub async fn build_services(config: &ApiConfig) -> AppServices {
    match &config.database_url {
        Some(url) => build_persistent_services(url).await,
        None => build_in_memory_services(),
    }
}

fn wire<S>(
    store: S,
    bus: MemBus,
    policy: DispensingPolicy,
) -> (
    Arc<CommandDispatcher<S, MemBus>>,
    Arc<DispensationProcessor<S, MemBus, TariffStore>>,
    Arc<TicketEmitter<S, MemBus>>,
    ProjectionSet,
    Arc<TariffResolver<TariffStore>>,
)
where
    S: logiclinic_infra::event_store::EventStore + Clone + 'static,
{
    let projections = ProjectionSet::new();
    spawn_projection_pump(bus.subscribe(), projections.clone());

    // The clinic tariff read model feeds the pricing resolver; the rest of
    // the projections only serve queries.
    let catalog = Arc::new(DefaultTariffCatalog::default());
    let resolver = Arc::new(TariffResolver::new(
        projections.tariffs.clone(),
        catalog.clone(),
    ));

    let emitter = Arc::new(TicketEmitter::new(CommandDispatcher::new(
        store.clone(),
        bus.clone(),
    )));
    let processor = Arc::new(DispensationProcessor::new(
        CommandDispatcher::new(store.clone(), bus.clone()),
        TariffResolver::new(projections.tariffs.clone(), catalog),
        emitter.clone(),
        policy,
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(store, bus));

    (dispatcher, processor, emitter, projections, resolver)
}

fn build_in_memory_services() -> AppServices {
    let store: MemStore = Arc::new(InMemoryEventStore::new());
    let bus: MemBus = Arc::new(InMemoryEventBus::new());
    let policy = DispensingPolicy::default();

    let (dispatcher, processor, emitter, projections, resolver) =
        wire(store, bus, policy);

    AppServices::InMemory {
        dispatcher,
        processor,
        emitter,
        projections,
        resolver,
        policy,
    }
}

async fn build_persistent_services(database_url: &str) -> AppServices {
    let pool = PgPool::connect(database_url)
        .await
        .expect("failed to connect to Postgres");

    let store: PgStore = Arc::new(PostgresEventStore::new(pool));
    store
        .ensure_schema()
        .await
        .expect("failed to ensure event schema");

    let bus: MemBus = Arc::new(InMemoryEventBus::new());
    let policy = DispensingPolicy::default();

    let (dispatcher, processor, emitter, projections, resolver) =
        wire(store, bus, policy);

    AppServices::Persistent {
        dispatcher,
        processor,
        emitter,
        projections,
        resolver,
        policy,
    }
}

impl AppServices {
    pub fn projections(&self) -> &ProjectionSet {
        match self {
            AppServices::InMemory { projections, .. } => projections,
            AppServices::Persistent { projections, .. } => projections,
        }
    }

    pub fn resolver(&self) -> &TariffResolver<TariffStore> {
        match self {
            AppServices::InMemory { resolver, .. } => resolver,
            AppServices::Persistent { resolver, .. } => resolver,
        }
    }

    pub fn policy(&self) -> DispensingPolicy {
        match self {
            AppServices::InMemory { policy, .. } => *policy,
            AppServices::Persistent { policy, .. } => *policy,
        }
    }

    pub fn dispatch<A>(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(ClinicId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: logiclinic_core::Aggregate<Error = DomainError>,
        A::Command: logiclinic_events::Command,
        A::Event: logiclinic_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        match self {
            AppServices::InMemory { dispatcher, .. } => dispatcher.dispatch::<A>(
                clinic_id,
                aggregate_id,
                aggregate_type,
                command,
                make_aggregate,
            ),
            AppServices::Persistent { dispatcher, .. } => dispatcher.dispatch::<A>(
                clinic_id,
                aggregate_id,
                aggregate_type,
                command,
                make_aggregate,
            ),
        }
    }

    pub fn begin_dispensation(
        &self,
        clinic_id: ClinicId,
        prescription_id: PrescriptionId,
        dispensed_by: UserId,
    ) -> Result<DispensationId, DispatchError> {
        let now = chrono::Utc::now();
        match self {
            AppServices::InMemory { processor, .. } => {
                processor.begin(clinic_id, prescription_id, dispensed_by, now)
            }
            AppServices::Persistent { processor, .. } => {
                processor.begin(clinic_id, prescription_id, dispensed_by, now)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_dispensation_line(
        &self,
        clinic_id: ClinicId,
        dispensation_id: DispensationId,
        prescription_line_no: u32,
        lot_id: LotId,
        quantity: i64,
    ) -> Result<AddLineOutcome, DispatchError> {
        let now = chrono::Utc::now();
        match self {
            AppServices::InMemory { processor, .. } => processor.add_line(
                clinic_id,
                dispensation_id,
                prescription_line_no,
                lot_id,
                quantity,
                now,
            ),
            AppServices::Persistent { processor, .. } => processor.add_line(
                clinic_id,
                dispensation_id,
                prescription_line_no,
                lot_id,
                quantity,
                now,
            ),
        }
    }

    pub fn finalize_dispensation(
        &self,
        clinic_id: ClinicId,
        dispensation_id: DispensationId,
        coverage: Option<Coverage>,
        recorded_by: UserId,
    ) -> Result<PaymentSplit, DispatchError> {
        let now = chrono::Utc::now();
        match self {
            AppServices::InMemory { processor, .. } => {
                processor.finalize(clinic_id, dispensation_id, coverage, recorded_by, now)
            }
            AppServices::Persistent { processor, .. } => {
                processor.finalize(clinic_id, dispensation_id, coverage, recorded_by, now)
            }
        }
    }

    pub fn validate_dispensation(
        &self,
        clinic_id: ClinicId,
        dispensation_id: DispensationId,
    ) -> Result<Vec<BillingTicketId>, WorkflowError> {
        let now = chrono::Utc::now();
        match self {
            AppServices::InMemory { processor, .. } => {
                processor.validate(clinic_id, dispensation_id, now)
            }
            AppServices::Persistent { processor, .. } => {
                processor.validate(clinic_id, dispensation_id, now)
            }
        }
    }

    pub fn cancel_dispensation(
        &self,
        clinic_id: ClinicId,
        dispensation_id: DispensationId,
        reason: Option<String>,
    ) -> Result<(), DispatchError> {
        let now = chrono::Utc::now();
        match self {
            AppServices::InMemory { processor, .. } => {
                processor.cancel(clinic_id, dispensation_id, reason, now)
            }
            AppServices::Persistent { processor, .. } => {
                processor.cancel(clinic_id, dispensation_id, reason, now)
            }
        }
    }

    pub fn retry_pending_tickets(&self) -> Result<Vec<BillingTicketId>, TicketEmitError> {
        let now = chrono::Utc::now();
        match self {
            AppServices::InMemory { emitter, .. } => emitter.retry_pending(now),
            AppServices::Persistent { emitter, .. } => emitter.retry_pending(now),
        }
    }

    pub fn pending_tickets(&self) -> Vec<PendingTicket> {
        match self {
            AppServices::InMemory { emitter, .. } => emitter.pending(),
            AppServices::Persistent { emitter, .. } => emitter.pending(),
        }
    }
}
