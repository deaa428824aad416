use super::config::{default_config_path, resolve_relative, PsiConfig};
use super::init_logging;
use fedpsi::lifecycle::{ComponentBindings, ComponentRegistry, PsiLifecycle};
use fedpsi::source::FileItemSource;
use fedpsi::store::FileResultStore;
use fedpsi::transport::InMemoryHub;
use fedpsi::types::IntersectionResult;
use fedpsi::{PsiError, PsiResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Component id each party's item file is registered under
const ITEM_SOURCE_ID: &str = "local_items";

/// Outcome of one party's session
#[derive(Debug)]
pub struct PartyOutcome {
    pub party: String,
    pub result: PsiResult<IntersectionResult>,
}

/// Run a PSI session between the configured parties
///
/// Every party runs in its own task over an in-process hub, standing in for
/// the federated job runtime. Each party gets its own registry with a
/// file-backed result store under `<result_dir>/<party>/` and its item file
/// as item source.
pub async fn execute(config_path: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        return Err(format!(
            "Config file '{}' not found (create one with: fedpsi init-config)",
            config_path.display()
        )
        .into());
    }
    let config = PsiConfig::load(&config_path)?;
    init_logging(&config.logging.level);

    println!("Config: {}", config_path.display());
    println!("Session: {} (attempt {})", config.session.id, config.session.attempt);
    println!("Algorithm: {}", config.algorithm.kind);
    println!("Parties: {}", config.parties.len());
    println!();

    let outcomes = simulate(&config, &config_path).await?;

    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(result) => println!(
                "{}: {} common identifiers -> {}",
                outcome.party,
                result.len(),
                config.party_result_dir(&outcome.party).display()
            ),
            Err(err) => {
                failed += 1;
                let hint = if err.is_retryable() {
                    " (retryable: bump session.attempt and re-run)"
                } else {
                    ""
                };
                println!("{}: FAILED: {}{}", outcome.party, err, hint);
            }
        }
    }

    if failed > 0 {
        return Err(format!("{} of {} parties failed", failed, outcomes.len()).into());
    }
    Ok(())
}

/// Run every configured party concurrently and collect their outcomes.
pub async fn simulate(
    config: &PsiConfig,
    config_path: &Path,
) -> Result<Vec<PartyOutcome>, Box<dyn std::error::Error>> {
    config.validate()?;
    if config.parties.is_empty() {
        return Err("No [[parties]] configured".into());
    }

    let hub = InMemoryHub::new();
    let bindings = ComponentBindings {
        psi_writer_id: config.store.psi_writer_id.clone(),
        item_source_id: ITEM_SOURCE_ID.to_string(),
    };

    // Register every endpoint before any party starts sending
    let endpoints: Vec<_> = config
        .parties
        .iter()
        .map(|party| hub.endpoint(party.name.as_str()))
        .collect();

    let mut handles = Vec::with_capacity(config.parties.len());
    for (party, endpoint) in config.parties.iter().zip(endpoints) {
        let mut registry = ComponentRegistry::new();
        registry.register_result_store(
            config.store.psi_writer_id.clone(),
            Arc::new(FileResultStore::new(config.party_result_dir(&party.name))),
        );
        registry.register_item_source(
            ITEM_SOURCE_ID,
            Arc::new(FileItemSource::new(resolve_relative(config_path, &party.items))),
        );

        let mut lifecycle = PsiLifecycle::from_registry(
            &registry,
            &bindings,
            config.session_settings(&party.name),
            Arc::new(endpoint),
        )?;

        let name = party.name.clone();
        handles.push(tokio::spawn(async move {
            let result = lifecycle.run().await;
            if let Err(err) = lifecycle.finalize().await {
                warn!(party = %name, error = %err, "finalize failed");
            }
            PartyOutcome { party: name, result }
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for joined in futures::future::join_all(handles).await {
        let outcome = joined.map_err(|e| PsiError::Aborted(format!("party task panicked: {}", e)))?;
        info!(party = %outcome.party, ok = outcome.result.is_ok(), "party finished");
        outcomes.push(outcome);
    }
    Ok(outcomes)
}
