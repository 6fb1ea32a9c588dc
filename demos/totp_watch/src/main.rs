use std::sync::Arc;

use anyhow::Context;
use pulsotp::{
    clock::SystemClock,
    config::Settings,
    display::DisplayEntry,
    scheduler::RefreshScheduler,
    service::{JsonServiceSource, ServiceSource},
};

#[tokio::main(flavor = "current_thread")]
pub async fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Usage: totp-watch <services.json> [settings.toml]
    let mut args = std::env::args().skip(1);
    let services_path = args
        .next()
        .context("Usage: totp-watch <services.json> [settings.toml]")?;
    let settings = match args.next() {
        Some(path) => Settings::load(&path).with_context(|| format!("Loading {path}"))?,
        None => Settings::default(),
    };

    let services = JsonServiceSource::new(services_path).list_services()?;
    let defaults = settings.otp_parameters();

    // Register one entry per service, each refreshed on its own
    let scheduler = RefreshScheduler::new(Arc::new(SystemClock), &settings);
    let mut entries = Vec::new();
    for service in &services {
        let entry = Arc::new(
            DisplayEntry::from_service(service).with_grouping(settings.group_codes),
        );
        scheduler.register_entry(entry.clone(), service.totp(&defaults));
        entries.push(entry);
    }

    let mut countdown = scheduler.subscribe_countdown();

    loop {
        tokio::select! {
            changed = countdown.changed() => {
                changed?;
                println!("--- {}s ---", *countdown.borrow_and_update());

                for entry in &entries {
                    let code = entry.rendered().unwrap_or_else(|| "(unavailable)".into());
                    println!("{:<20} {:<24} {code}", entry.service(), entry.account().unwrap_or(""));
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    scheduler.shutdown();

    Ok(())
}
