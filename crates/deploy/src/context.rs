//! The per-unit view of a run handed to unit bodies.

use std::sync::Arc;

use alloy_core::primitives::Address;
use chrono::Utc;

use crate::{
    DeployError, NetworkId, UnitId,
    artifact::{ArtifactFactory, ArtifactHandle, ConstructorArgs},
    ledger::{Ledger, LedgerEntry, PublishRef},
    network::{Connection, DEFAULT_ACCOUNT, NamedAccounts, Receipt},
};

/// Overrides for [`ExecutionContext::deploy_with`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployOptions {
    /// Ledger id to record under instead of the current unit id.
    pub id: Option<UnitId>,
    /// Named account to publish from instead of `deployer`.
    pub from: Option<String>,
}

impl DeployOptions {
    pub fn id(mut self, id: impl Into<UnitId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.from = Some(account.into());
        self
    }
}

/// Outcome of a deploy call.
#[derive(Debug, Clone)]
pub enum DeployResult {
    /// A new instance was published and recorded.
    Published {
        handle: ArtifactHandle,
        receipt: Receipt,
    },
    /// A matching instance was already recorded; nothing was sent.
    Attached { handle: ArtifactHandle },
}

impl DeployResult {
    pub fn handle(&self) -> &ArtifactHandle {
        match self {
            Self::Published { handle, .. } | Self::Attached { handle } => handle,
        }
    }

    pub fn into_handle(self) -> ArtifactHandle {
        match self {
            Self::Published { handle, .. } | Self::Attached { handle } => handle,
        }
    }

    pub fn was_newly_published(&self) -> bool {
        matches!(self, Self::Published { .. })
    }
}

/// What a body did, as seen by the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Activity {
    pub published: usize,
    pub attached: usize,
}

/// Passed to each unit body. Built fresh for every invocation.
#[derive(Debug)]
pub struct ExecutionContext {
    unit: UnitId,
    declared: Vec<UnitId>,
    connection: Arc<Connection>,
    ledger: Arc<Ledger>,
    factory: ArtifactFactory,
    force: bool,
    activity: Activity,
}

impl ExecutionContext {
    pub(crate) fn new(
        unit: UnitId,
        declared: Vec<UnitId>,
        connection: Arc<Connection>,
        ledger: Arc<Ledger>,
        factory: ArtifactFactory,
        force: bool,
    ) -> Self {
        Self {
            unit,
            declared,
            connection,
            ledger,
            factory,
            force,
            activity: Activity::default(),
        }
    }

    pub(crate) fn activity(&self) -> Activity {
        self.activity
    }

    /// The unit being executed.
    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    pub fn network(&self) -> &NetworkId {
        &self.connection.network
    }

    pub fn chain_id(&self) -> u64 {
        self.connection.chain_id
    }

    pub fn accounts(&self) -> &NamedAccounts {
        &self.connection.accounts
    }

    /// Address of a named account on the current network.
    pub fn account(&self, name: &str) -> Result<Address, DeployError> {
        self.connection
            .accounts
            .get(name)
            .ok_or_else(|| DeployError::UnknownAccount(name.to_string()))
    }

    pub fn is_forced(&self) -> bool {
        self.force
    }

    /// Publish `template` under the current unit id from `deployer`.
    pub async fn deploy(
        &mut self,
        template: &str,
        args: &ConstructorArgs,
    ) -> Result<DeployResult, DeployError> {
        self.deploy_with(template, args, DeployOptions::default())
            .await
    }

    /// Publish `template`, or attach to the recorded instance when template and
    /// arguments match and the run is not forced.
    pub async fn deploy_with(
        &mut self,
        template: &str,
        args: &ConstructorArgs,
        options: DeployOptions,
    ) -> Result<DeployResult, DeployError> {
        let id = options.id.unwrap_or_else(|| self.unit.clone());
        let signer = self.account(options.from.as_deref().unwrap_or(DEFAULT_ACCOUNT))?;
        let builder = self
            .factory
            .build(template, self.connection.clone(), signer)?;
        let fingerprint = args.fingerprint();
        let network = self.connection.network.clone();

        if !self.force {
            if let Some(existing) = self.ledger.lookup(&network, &id) {
                if existing.template != template || existing.args_fingerprint != fingerprint {
                    tracing::warn!(
                        %network,
                        unit = %self.unit,
                        id = %id,
                        recorded_template = %existing.template,
                        template,
                        "Recorded artifact differs from the requested one"
                    );
                    return Err(DeployError::LedgerConflict { network, unit: id });
                }

                tracing::info!(
                    %network,
                    id = %id,
                    address = %existing.address,
                    template,
                    "Reusing recorded artifact"
                );
                self.activity.attached += 1;
                return Ok(DeployResult::Attached {
                    handle: builder.attach(existing.address),
                });
            }
        }

        let published = builder.publish(args).await?;
        let address = published.handle.address();

        let entry = LedgerEntry {
            address,
            template: template.to_string(),
            args_fingerprint: fingerprint,
            publish_ref: Some(PublishRef {
                tx_hash: published.receipt.tx_hash,
                block_number: published.receipt.block_number,
            }),
            newly_published: true,
            recorded_at: Utc::now(),
        };

        if let Err(e) = self.ledger.record(&network, &id, entry, self.force) {
            tracing::error!(
                %network,
                id = %id,
                %address,
                tx_hash = %published.receipt.tx_hash,
                error = %e,
                "Artifact was published but could not be recorded"
            );
            return Err(DeployError::LedgerWrite {
                unit: id,
                address,
                reason: e.to_string(),
            });
        }

        tracing::info!(
            %network,
            id = %id,
            %address,
            template,
            block = published.receipt.block_number,
            "Published artifact"
        );
        self.activity.published += 1;

        Ok(DeployResult::Published {
            handle: published.handle,
            receipt: published.receipt,
        })
    }

    /// Handle of an artifact recorded on the current network.
    ///
    /// Any recorded id resolves. Ids the unit did not declare as dependencies are
    /// logged, since nothing guarantees they ran first.
    pub fn get(&mut self, id: impl Into<UnitId>) -> Result<ArtifactHandle, DeployError> {
        let id = id.into();
        let network = &self.connection.network;

        if id != self.unit && !self.declared.contains(&id) {
            tracing::warn!(
                %network,
                unit = %self.unit,
                dependency = %id,
                "Reading an artifact the unit does not declare as dependency"
            );
        }

        let entry = self
            .ledger
            .lookup(network, &id)
            .ok_or_else(|| DeployError::UnresolvedDependency {
                network: network.clone(),
                unit: id.clone(),
            })?;

        self.activity.attached += 1;
        Ok(self
            .factory
            .handle_for(&entry.template, &self.connection, entry.address))
    }

    /// Record an artifact published outside the orchestrator.
    ///
    /// Importing the same address and template again is a no-op; any other
    /// existing entry conflicts unless the run is forced.
    pub fn import(
        &mut self,
        id: impl Into<UnitId>,
        template: &str,
        address: Address,
    ) -> Result<ArtifactHandle, DeployError> {
        let id = id.into();
        if !self.factory.catalog().contains(template) {
            return Err(DeployError::InvalidTemplate(template.to_string()));
        }

        let network = self.connection.network.clone();
        let handle = self
            .factory
            .handle_for(template, &self.connection, address);

        if let Some(existing) = self.ledger.lookup(&network, &id) {
            if existing.address == address && existing.template == template {
                self.activity.attached += 1;
                return Ok(handle);
            }
        }

        let entry = LedgerEntry {
            address,
            template: template.to_string(),
            args_fingerprint: ConstructorArgs::empty().fingerprint(),
            publish_ref: None,
            newly_published: false,
            recorded_at: Utc::now(),
        };
        self.ledger.record(&network, &id, entry, self.force)?;

        tracing::info!(%network, id = %id, %address, template, "Imported artifact");
        self.activity.attached += 1;
        Ok(handle)
    }
}
