//! hatchery applies idempotent, dependency-ordered contract deployments to EVM networks.

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command, DeployArgs, NetworksArgs, SelectionArgs, StatusArgs};
use hatchery_deploy::{
    ExecutionPlan, HatcheryConfig, JsonRpcConnector, Ledger, Manifest, NetworkId, Orchestrator,
    RunOptions, RunReport, TemplateCatalog, UnitRegistry, tag_set,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config_path = cli.config_path();
    let config = cli::load_config(config_path.as_deref())?;

    match cli.command {
        Command::Deploy(args) => deploy(&config, args).await,
        Command::Plan(args) => plan(&config, &args),
        Command::Status(args) => status(&config, &args),
        Command::Networks(args) => networks(&config, &args).await,
    }
}

fn load_units(config: &HatcheryConfig) -> Result<(Manifest, UnitRegistry)> {
    let manifest = Manifest::load(&config.manifest)
        .context(format!("Failed to load manifest {}", config.manifest.display()))?;
    let units = manifest
        .clone()
        .into_registry()
        .context("Failed to build units from manifest")?;
    Ok((manifest, units))
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(header.to_vec());
    table
}

async fn deploy(config: &HatcheryConfig, args: DeployArgs) -> Result<()> {
    let (manifest, units) = load_units(config)?;

    let catalog = TemplateCatalog::load_dir(&config.artifacts_dir)?;
    manifest
        .validate(&catalog)
        .context("Manifest references a template missing from the artifacts directory")?;

    let connector = Arc::new(JsonRpcConnector::new(config.confirmation.clone()));
    let networks = config.network_registry(connector)?;
    let ledger = Ledger::open(&config.ledger_dir)?;
    let orchestrator = Orchestrator::new(Arc::new(networks), catalog, Arc::new(ledger));

    let network = NetworkId::from(args.network.as_str());
    let options = RunOptions {
        tags: tag_set(args.selection.tags.iter().cloned()),
        force: args.force,
        targets: args.selection.targets(),
    };

    tracing::info!(
        %network,
        units = units.len(),
        force = options.force,
        "Deploying..."
    );

    let report = orchestrator
        .run(&units, &network, &options)
        .await
        .context(format!("Failed to deploy to network {network}"))?;

    print_report(&report, orchestrator.ledger());

    report
        .into_result()
        .context(format!("Deployment to network {network} did not complete"))?;

    Ok(())
}

fn print_report(report: &RunReport, ledger: &Ledger) {
    let mut table = new_table(&["Unit", "Outcome", "Address", "Error"]);

    for entry in &report.entries {
        let address = ledger
            .lookup(&report.network, &entry.unit)
            .map(|recorded| recorded.address.to_string())
            .unwrap_or_default();
        let error = entry
            .error
            .as_ref()
            .map(|e| format!("{e:#}"))
            .unwrap_or_default();

        table.add_row(vec![
            entry.unit.to_string(),
            entry.outcome.to_string(),
            address,
            error,
        ]);
    }

    println!("{table}");
}

fn plan(config: &HatcheryConfig, args: &SelectionArgs) -> Result<()> {
    let (_, units) = load_units(config)?;
    let targets = args.targets();

    let plan = ExecutionPlan::resolve(
        &units,
        &tag_set(args.tags.iter().cloned()),
        targets.as_deref(),
    )?;

    let mut table = new_table(&["#", "Unit", "Dependencies", "Included as"]);
    for (position, planned) in plan.units().iter().enumerate() {
        let dependencies = planned
            .dependencies
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        table.add_row(vec![
            (position + 1).to_string(),
            planned.id().to_string(),
            dependencies,
            planned.inclusion.to_string(),
        ]);
    }

    println!("{table}");
    Ok(())
}

fn status(config: &HatcheryConfig, args: &StatusArgs) -> Result<()> {
    let network = NetworkId::from(args.network.as_str());
    let ledger = Ledger::open(&config.ledger_dir)?;
    ledger
        .load(&network)
        .context(format!("Failed to read ledger of network {network}"))?;

    let entries = ledger.entries(&network);
    if entries.is_empty() {
        println!("No artifacts recorded on {network}");
        return Ok(());
    }

    let mut table = new_table(&["Id", "Template", "Address", "Block", "Published", "Recorded at"]);
    for (id, entry) in entries {
        table.add_row(vec![
            id.to_string(),
            entry.template,
            entry.address.to_string(),
            entry
                .publish_ref
                .map(|publish| publish.block_number.to_string())
                .unwrap_or_else(|| "-".to_string()),
            if entry.newly_published { "yes" } else { "imported" }.to_string(),
            entry.recorded_at.to_rfc3339(),
        ]);
    }

    println!("{table}");
    Ok(())
}

async fn networks(config: &HatcheryConfig, args: &NetworksArgs) -> Result<()> {
    let connector = Arc::new(JsonRpcConnector::new(config.confirmation.clone()));
    let registry = config.network_registry(connector)?;

    let mut header = vec!["Network", "Endpoints"];
    if args.probe {
        header.extend(["Chain id", "Endpoint used"]);
    }
    let mut table = new_table(&header);

    for id in registry.networks() {
        let endpoints = registry
            .descriptor(id)
            .map(|descriptor| {
                descriptor
                    .endpoints
                    .iter()
                    .map(|url| url.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        let mut row = vec![id.to_string(), endpoints];
        if args.probe {
            match registry.connection_for(id).await {
                Ok(connection) => {
                    row.push(connection.chain_id.to_string());
                    row.push(connection.endpoint.to_string());
                }
                Err(e) => {
                    tracing::warn!(network = %id, error = %e, "Probe failed");
                    row.push("unreachable".to_string());
                    row.push(e.to_string());
                }
            }
        }
        table.add_row(row);
    }

    println!("{table}");
    Ok(())
}
