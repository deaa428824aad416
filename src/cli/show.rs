use super::config::{default_config_path, PsiConfig};
use super::init_logging;
use fedpsi::store::{FileResultStore, ResultStore, StoreError};
use fedpsi::types::{IntersectionResult, SessionId};
use std::path::PathBuf;

/// Print a party's persisted intersection, one identifier per line
pub async fn execute(
    config_path: Option<String>,
    party: String,
    session: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let config = PsiConfig::load(&config_path)?;
    config.validate()?;
    init_logging(&config.logging.level);

    let session = session
        .map(SessionId::new)
        .unwrap_or_else(|| config.session.id.clone());
    let result = load_result(&config, &party, &session).await?;

    println!("# session {} / party {}: {} identifiers", session, party, result.len());
    for id in result.iter() {
        println!("{}", id.as_str());
    }
    Ok(())
}

async fn load_result(
    config: &PsiConfig,
    party: &str,
    session: &SessionId,
) -> Result<IntersectionResult, Box<dyn std::error::Error>> {
    if config.party(party).is_none() {
        return Err(format!("Unknown party '{}'", party).into());
    }

    let store = FileResultStore::new(config.party_result_dir(party));
    match store.load(session).await {
        Ok(result) => Ok(result),
        Err(StoreError::NotFound(_)) => Err(format!(
            "No result for session {} at {} (has `fedpsi run` completed?)",
            session,
            store.root().display()
        )
        .into()),
        Err(err) => Err(err.into()),
    }
}
