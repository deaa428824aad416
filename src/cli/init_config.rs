use super::config::{default_config_path, default_result_dir, PsiConfig};
use fedpsi::types::SessionId;
use std::path::PathBuf;

/// Write a commented default configuration file
///
/// Refuses to replace an existing file unless `force` is set. The result
/// directory defaults to `results/` next to the config file.
pub fn execute(
    path: Option<String>,
    session: Option<String>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (config_path, result_dir) = match path {
        Some(path) => {
            let path = PathBuf::from(path);
            let result_dir = path
                .parent()
                .map(|p| p.join("results"))
                .unwrap_or_else(|| PathBuf::from("results"));
            (path, result_dir)
        }
        None => (default_config_path(), default_result_dir()),
    };

    if config_path.exists() && !force {
        return Err(format!(
            "Config file '{}' already exists (use --force to overwrite)",
            config_path.display()
        )
        .into());
    }

    let session = session.map(SessionId::new).unwrap_or_else(SessionId::random);
    PsiConfig::create_default(&config_path, &session, &result_dir)?;

    println!("Created: {}", config_path.display());
    println!("Session: {}", session);
    println!("Add [[parties]] entries, then run: fedpsi run --config {}", config_path.display());
    Ok(())
}
