use std::sync::Arc;

use tracing::{error, info};

use staycal::config::Config;
use staycal::org::OrganizationManager;
use staycal::retry::RetryPolicy;
use staycal::store::{coerce, MemoryBookings};

/// Exit code when the rule import did not fully land.
const EXIT_IMPORT_FAILED: i32 = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    staycal::observability::init_tracing();

    let config = Config::from_env()?;
    std::fs::create_dir_all(&config.data_dir)?;

    let bookings = Arc::new(match &config.bookings {
        Some(path) => MemoryBookings::load_json(path)?,
        None => MemoryBookings::new(),
    });
    let property_ids = bookings.property_ids();

    let manager = OrganizationManager::new(config.data_dir.clone(), bookings.clone(), config.compact_threshold)
        .with_retry_policy(RetryPolicy::with_attempts(config.retry_attempts));
    let org = manager.get_or_create(&config.organization_id)?;

    info!("staycal report for {}", config.organization_id);
    info!("  data_dir: {}", config.data_dir.display());
    info!("  window: {} .. {}", config.window.start, config.window.end);
    info!("  properties: {}", property_ids.len());

    org.engine.refresh(Some(config.window)).await?;

    let mut import_failed = false;
    if let Some(path) = &config.rules_import {
        let raw = std::fs::read_to_string(path)?;
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        let imported = match coerce::rule_drafts_from_json(&config.organization_id, &value) {
            Ok(drafts) => org.engine.import_rules(drafts).await,
            Err(e) => Err(e),
        };
        match imported {
            Ok(rules) => info!("imported {} rules from {}", rules.len(), path.display()),
            Err(e) => {
                error!("rule import from {} failed: {e}", path.display());
                import_failed = true;
            }
        }
    }

    let mut conflicts = 0usize;
    for property_id in &property_ids {
        for report in org.engine.detect_conflicts(property_id, config.window).await? {
            println!("{}", serde_json::to_string(&report)?);
            conflicts += 1;
        }
    }
    info!(
        org = %config.organization_id,
        properties = property_ids.len(),
        rules = org.store.rule_count(),
        conflicts,
        "report finished"
    );

    if import_failed {
        std::process::exit(EXIT_IMPORT_FAILED);
    }
    Ok(())
}
