//! Projection runner utilities (read model builders).
//!
//! Read models are **disposable**; events are the source of truth. This
//! module provides deterministic replay and cursor/version tracking without
//! making storage assumptions.

use logiclinic_core::ClinicId;

use crate::{EventEnvelope, Projection};

/// Tracks projection progress for a single clinic.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProjectionCursor {
    clinic_id: ClinicId,
    last_sequence_number: u64,
}

impl ProjectionCursor {
    pub fn clinic_id(&self) -> ClinicId {
        self.clinic_id
    }

    pub fn last_sequence_number(&self) -> u64 {
        self.last_sequence_number
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    ClinicMismatch { expected: ClinicId, found: ClinicId },
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Runs envelopes through a projection and tracks progress.
#[derive(Debug)]
pub struct ProjectionRunner<P>
where
    P: Projection,
{
    projection: P,
    cursor: Option<ProjectionCursor>,
}

impl<P> ProjectionRunner<P>
where
    P: Projection,
{
    pub fn new(projection: P) -> Self {
        Self {
            projection,
            cursor: None,
        }
    }

    /// Create a runner pinned to a specific clinic.
    ///
    /// Prevents accidentally starting a projection with an event from the
    /// wrong clinic.
    pub fn new_for_clinic(clinic_id: ClinicId, projection: P) -> Self {
        Self {
            projection,
            cursor: Some(ProjectionCursor {
                clinic_id,
                last_sequence_number: 0,
            }),
        }
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn projection_mut(&mut self) -> &mut P {
        &mut self.projection
    }

    pub fn into_projection(self) -> P {
        self.projection
    }

    /// Current cursor/version for this projection (if any envelopes were applied).
    pub fn cursor(&self) -> Option<ProjectionCursor> {
        self.cursor
    }

    /// Apply a single envelope, enforcing clinic consistency and monotonic sequencing.
    pub fn apply(&mut self, envelope: &EventEnvelope<P::Ev>) -> Result<(), ProjectionError> {
        let found_clinic = envelope.clinic_id();
        let found_seq = envelope.sequence_number();

        match self.cursor {
            None => {
                self.projection.apply(envelope);
                self.cursor = Some(ProjectionCursor {
                    clinic_id: found_clinic,
                    last_sequence_number: found_seq,
                });
                Ok(())
            }
            Some(mut c) => {
                if c.clinic_id != found_clinic {
                    return Err(ProjectionError::ClinicMismatch {
                        expected: c.clinic_id,
                        found: found_clinic,
                    });
                }
                if found_seq <= c.last_sequence_number {
                    return Err(ProjectionError::NonMonotonicSequence {
                        last: c.last_sequence_number,
                        found: found_seq,
                    });
                }

                self.projection.apply(envelope);
                c.last_sequence_number = found_seq;
                self.cursor = Some(c);
                Ok(())
            }
        }
    }

    /// Apply many envelopes in order.
    pub fn run<'a>(
        &mut self,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>,
    ) -> Result<(), ProjectionError>
    where
        P::Ev: 'a,
    {
        for env in envelopes {
            self.apply(env)?;
        }
        Ok(())
    }

    /// Rebuild a projection from scratch by replaying the full event history.
    pub fn rebuild_from_scratch<'a>(
        factory: impl FnOnce() -> P,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>,
    ) -> Result<(P, Option<ProjectionCursor>), ProjectionError>
    where
        P::Ev: 'a,
    {
        let mut runner = ProjectionRunner::new(factory());
        runner.run(envelopes)?;
        Ok((runner.projection, runner.cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClinicScoped, Event};
    use chrono::{DateTime, Utc};
    use logiclinic_core::AggregateId;
    use uuid::Uuid;

    #[derive(Debug, Clone)]
    struct Ticked {
        at: DateTime<Utc>,
    }

    impl Event for Ticked {
        fn event_type(&self) -> &'static str {
            "test.ticked"
        }

        fn version(&self) -> u32 {
            1
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[derive(Debug, Default)]
    struct Counter {
        applied: usize,
    }

    impl Projection for Counter {
        type Ev = Ticked;

        fn apply(&mut self, _envelope: &EventEnvelope<Self::Ev>) {
            self.applied += 1;
        }
    }

    fn envelope(clinic_id: ClinicId, aggregate_id: AggregateId, seq: u64) -> EventEnvelope<Ticked> {
        EventEnvelope::new(
            Uuid::now_v7(),
            clinic_id,
            aggregate_id,
            "test.counter",
            seq,
            Ticked { at: Utc::now() },
        )
    }

    #[test]
    fn applies_in_order_and_tracks_the_cursor() {
        let clinic_id = ClinicId::new();
        let aggregate_id = AggregateId::new();
        let mut runner = ProjectionRunner::new_for_clinic(clinic_id, Counter::default());

        runner.apply(&envelope(clinic_id, aggregate_id, 1)).unwrap();
        runner.apply(&envelope(clinic_id, aggregate_id, 2)).unwrap();

        assert_eq!(runner.projection().applied, 2);
        assert_eq!(runner.cursor().unwrap().last_sequence_number(), 2);
    }

    #[test]
    fn rejects_cross_clinic_envelopes() {
        let clinic_id = ClinicId::new();
        let aggregate_id = AggregateId::new();
        let mut runner = ProjectionRunner::new_for_clinic(clinic_id, Counter::default());

        let foreign = envelope(ClinicId::new(), aggregate_id, 1);
        assert_eq!(foreign.clinic_id(), ClinicScoped::clinic_id(&foreign));

        let err = runner.apply(&foreign).unwrap_err();
        assert!(matches!(err, ProjectionError::ClinicMismatch { .. }));
        assert_eq!(runner.projection().applied, 0);
    }

    #[test]
    fn rejects_replays_below_the_cursor() {
        let clinic_id = ClinicId::new();
        let aggregate_id = AggregateId::new();
        let mut runner = ProjectionRunner::new_for_clinic(clinic_id, Counter::default());

        runner.apply(&envelope(clinic_id, aggregate_id, 3)).unwrap();
        let err = runner.apply(&envelope(clinic_id, aggregate_id, 3)).unwrap_err();
        assert_eq!(
            err,
            ProjectionError::NonMonotonicSequence { last: 3, found: 3 }
        );
    }

    #[test]
    fn rebuild_replays_everything() {
        let clinic_id = ClinicId::new();
        let aggregate_id = AggregateId::new();
        let history: Vec<_> = (1..=5)
            .map(|seq| envelope(clinic_id, aggregate_id, seq))
            .collect();

        let (projection, cursor) =
            ProjectionRunner::rebuild_from_scratch(Counter::default, history.iter()).unwrap();

        assert_eq!(projection.applied, 5);
        assert_eq!(cursor.unwrap().last_sequence_number(), 5);
    }
}
