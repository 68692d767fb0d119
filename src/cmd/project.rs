//! Project setup and inspection: `shadow-pm init` and `shadow-pm state`.

use std::path::Path;

use anyhow::Result;

use shadow_pm::config::Settings;
use shadow_pm::store::{ContinuationStore, SqliteStore};

/// `settings` must be the file-only view; environment overlays stay out of the saved file.
pub fn cmd_init(config_path: &Path, settings: &Settings, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        println!(
            "{} already exists, leaving it untouched (use --force to overwrite)",
            config_path.display()
        );
    } else {
        settings.save(config_path)?;
        println!("Wrote {}", config_path.display());
    }

    SqliteStore::open(&settings.server.db_path)?;
    println!("State database ready at {}", settings.server.db_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set GOOGLE_GEMINI_API_KEY (and optionally JIRA_API_TOKEN, GITHUB_TOKEN) in .env");
    println!("  2. Fill in the [jira] and [slack] sections of {}", config_path.display());
    println!("  3. Run `shadow-pm serve`");
    Ok(())
}

pub async fn cmd_state(settings: &Settings, project: Option<String>) -> Result<()> {
    let project = project.unwrap_or_else(|| settings.project.default_id.clone());
    let store = SqliteStore::open(&settings.server.db_path)?;

    match store.get(&project).await? {
        Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
        None => println!("No strategic state recorded for project '{}'", project),
    }
    Ok(())
}
