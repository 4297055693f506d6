//! Runs a resolved plan of units against one network.

use std::sync::Arc;

use tracing::Instrument;

use crate::{
    DeployError, ExecutionContext, ExecutionPlan, NetworkId, PlannedUnit, TagSet, UnitId,
    UnitRegistry,
    artifact::{ArtifactFactory, TemplateCatalog},
    ledger::Ledger,
    network::{Connection, NetworkRegistry},
};

/// Parameters of a single run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Active tags. Empty selects every unit.
    pub tags: TagSet,
    /// Re-run units that are already applied and republish their artifacts.
    pub force: bool,
    /// Run only these units and their dependencies, ignoring tags for selection.
    pub targets: Option<Vec<UnitId>>,
}

impl RunOptions {
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UnitId>,
    {
        self.targets = Some(targets.into_iter().map(Into::into).collect());
        self
    }
}

/// What happened to a planned unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum Outcome {
    /// Already applied; the body was not invoked.
    Skipped,
    /// The body published at least one artifact.
    NewlyPublished,
    /// The body succeeded without publishing.
    Attached,
    Failed,
    /// An earlier unit failed.
    NotAttempted,
}

#[derive(Debug)]
pub struct UnitReport {
    pub unit: UnitId,
    pub outcome: Outcome,
    pub error: Option<anyhow::Error>,
}

/// Per-unit outcomes of a run, in execution order.
#[derive(Debug)]
pub struct RunReport {
    pub network: NetworkId,
    pub entries: Vec<UnitReport>,
}

impl RunReport {
    pub fn outcome_of(&self, unit: &str) -> Option<Outcome> {
        self.entries
            .iter()
            .find(|entry| entry.unit.as_str() == unit)
            .map(|entry| entry.outcome)
    }

    /// The failed unit, if any.
    pub fn failed(&self) -> Option<&UnitReport> {
        self.entries
            .iter()
            .find(|entry| entry.outcome == Outcome::Failed)
    }

    pub fn is_success(&self) -> bool {
        self.failed().is_none()
    }

    /// Count of entries with `outcome`.
    pub fn count(&self, outcome: Outcome) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.outcome == outcome)
            .count()
    }

    /// Turn a failed report into [`DeployError::UnitFailed`].
    pub fn into_result(self) -> Result<Self, DeployError> {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.outcome == Outcome::Failed);

        let Some(position) = position else {
            return Ok(self);
        };

        let mut entries = self.entries;
        let failed = entries.swap_remove(position);
        let source = failed
            .error
            .unwrap_or_else(|| anyhow::anyhow!("unit failed without an error"));

        Err(DeployError::UnitFailed {
            unit: failed.unit,
            source: source.into(),
        })
    }
}

/// Applies unit registries to networks.
///
/// Cheap to share behind an `Arc`; concurrent runs against different networks are
/// supported.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    networks: Arc<NetworkRegistry>,
    factory: ArtifactFactory,
    ledger: Arc<Ledger>,
}

impl Orchestrator {
    pub fn new(
        networks: Arc<NetworkRegistry>,
        catalog: TemplateCatalog,
        ledger: Arc<Ledger>,
    ) -> Self {
        Self {
            networks,
            factory: ArtifactFactory::new(catalog),
            ledger,
        }
    }

    pub fn networks(&self) -> &NetworkRegistry {
        &self.networks
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn factory(&self) -> &ArtifactFactory {
        &self.factory
    }

    /// The plan `run` would execute, without touching any network.
    pub fn plan(
        &self,
        units: &UnitRegistry,
        options: &RunOptions,
    ) -> Result<ExecutionPlan, DeployError> {
        ExecutionPlan::resolve(units, &options.tags, options.targets.as_deref())
    }

    /// Apply `units` to `network`.
    ///
    /// Graph errors, an unknown network and an unreadable ledger are returned before any
    /// unit runs. Unit failures end the run and are reported in the [`RunReport`].
    pub async fn run(
        &self,
        units: &UnitRegistry,
        network: &NetworkId,
        options: &RunOptions,
    ) -> Result<RunReport, DeployError> {
        let plan = self.plan(units, options)?;

        if self.networks.descriptor(network).is_none() {
            return Err(DeployError::UnknownNetwork(network.clone()));
        }
        self.ledger.load(network)?;

        tracing::info!(
            %network,
            units = plan.len(),
            tags = ?options.tags,
            force = options.force,
            "Starting deployment run"
        );

        let mut cached: Option<Arc<Connection>> = None;
        let mut entries = Vec::with_capacity(plan.len());
        let mut planned = plan.into_iter();

        while let Some(step) = planned.next() {
            let id = step.unit.id().clone();

            let applied =
                self.ledger.exists(network, &id) || self.ledger.is_completed(network, &id);
            if applied && !options.force {
                tracing::debug!(%network, unit = %id, "Unit already applied, skipping");
                entries.push(UnitReport {
                    unit: id,
                    outcome: Outcome::Skipped,
                    error: None,
                });
                continue;
            }

            let connection = match cached.clone() {
                Some(connection) => connection,
                None => {
                    let established = self.networks.connection_for(network).await?;
                    cached = Some(established.clone());
                    established
                }
            };

            let mut ctx = ExecutionContext::new(
                id.clone(),
                step.dependencies.clone(),
                connection,
                self.ledger.clone(),
                self.factory.clone(),
                options.force,
            );

            let span =
                tracing::info_span!("unit", unit = %id, %network, inclusion = %step.inclusion);
            let body = step.unit.runner();
            let result = body.run(&mut ctx).instrument(span).await;

            match result {
                Ok(()) => {
                    let activity = ctx.activity();
                    let outcome = if activity.published > 0 {
                        Outcome::NewlyPublished
                    } else {
                        Outcome::Attached
                    };

                    if !self.ledger.exists(network, &id) {
                        if let Err(e) = self.ledger.mark_completed(network, &id) {
                            tracing::error!(
                                %network,
                                unit = %id,
                                error = %e,
                                "Failed to mark unit completed"
                            );
                            entries.push(UnitReport {
                                unit: id,
                                outcome: Outcome::Failed,
                                error: Some(e.into()),
                            });
                            entries.extend(not_attempted(planned));
                            break;
                        }
                    }

                    tracing::info!(
                        %network,
                        unit = %id,
                        %outcome,
                        published = activity.published,
                        attached = activity.attached,
                        "Unit applied"
                    );
                    entries.push(UnitReport {
                        unit: id,
                        outcome,
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::error!(%network, unit = %id, error = ?e, "Unit failed");
                    entries.push(UnitReport {
                        unit: id,
                        outcome: Outcome::Failed,
                        error: Some(e),
                    });
                    entries.extend(not_attempted(planned));
                    break;
                }
            }
        }

        let report = RunReport {
            network: network.clone(),
            entries,
        };

        tracing::info!(
            %network,
            skipped = report.count(Outcome::Skipped),
            newly_published = report.count(Outcome::NewlyPublished),
            attached = report.count(Outcome::Attached),
            failed = report.count(Outcome::Failed),
            not_attempted = report.count(Outcome::NotAttempted),
            "Deployment run finished"
        );

        Ok(report)
    }
}

fn not_attempted(
    rest: impl Iterator<Item = PlannedUnit>,
) -> impl Iterator<Item = UnitReport> {
    rest.map(|step| UnitReport {
        unit: step.unit.id().clone(),
        outcome: Outcome::NotAttempted,
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_outcome_display_and_parse() {
        assert_eq!(Outcome::NewlyPublished.to_string(), "newly-published");
        assert_eq!(Outcome::NotAttempted.as_ref(), "not-attempted");
        assert_eq!(Outcome::from_str("skipped").unwrap(), Outcome::Skipped);
        assert!(Outcome::from_str("done").is_err());
    }

    #[test]
    fn test_report_into_result() {
        let ok = RunReport {
            network: "n1".into(),
            entries: vec![UnitReport {
                unit: "a".into(),
                outcome: Outcome::Skipped,
                error: None,
            }],
        };
        assert!(ok.is_success());
        assert!(ok.into_result().is_ok());

        let failed = RunReport {
            network: "n1".into(),
            entries: vec![
                UnitReport {
                    unit: "a".into(),
                    outcome: Outcome::Failed,
                    error: Some(anyhow::anyhow!("boom")),
                },
                UnitReport {
                    unit: "b".into(),
                    outcome: Outcome::NotAttempted,
                    error: None,
                },
            ],
        };
        assert_eq!(failed.failed().map(|e| e.unit.as_str()), Some("a"));
        assert_eq!(failed.outcome_of("b"), Some(Outcome::NotAttempted));

        match failed.into_result() {
            Err(DeployError::UnitFailed { unit, source }) => {
                assert_eq!(unit.as_str(), "a");
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("expected a unit failure, got {other:?}"),
        }
    }
}
