use std::time::Duration;

use anyhow::{Context, Result, bail};
use polreg_contracts::NewPolicy;
use polreg_store::PolicyStore;

const DEFAULT_SEED_PATH: &str = "seeds.json";
const DEFAULT_DB_URL: &str = "sqlite://policies.db";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SEED_PATH.to_string());
    let db_url = std::env::var("POLREG_DB_URL")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_DB_URL.to_string());

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read seed file `{}`", path))?;
    let items = parse_seeds(&raw).with_context(|| format!("invalid seed file `{}`", path))?;

    let store = PolicyStore::connect_and_migrate(&db_url, 1, Duration::from_secs(5))
        .await
        .with_context(|| format!("failed to open policy store at `{}`", db_url))?;

    let mut inserted = 0usize;
    for item in &items {
        if store
            .insert_or_ignore(item)
            .await
            .with_context(|| format!("failed to insert policy `{}`", item.number))?
        {
            inserted += 1;
        } else {
            tracing::debug!(number = %item.number, "policy already present");
        }
    }
    store.close().await;

    println!(
        "Seeded {} items ({} new, duplicates ignored).",
        items.len(),
        inserted
    );
    Ok(())
}

/// Parses and validates a JSON array of policies. The whole file is rejected
/// if any entry fails validation.
fn parse_seeds(raw: &str) -> Result<Vec<NewPolicy>> {
    let items: Vec<NewPolicy> =
        serde_json::from_str(raw).context("expected a JSON array of policy objects")?;

    for (idx, item) in items.iter().enumerate() {
        if let Err(err) = item.validate() {
            bail!("entry {} (`{}`): {}", idx, item.number, err);
        }
    }

    Ok(items)
}
