use anyhow::Context;

use ledgerbank_infra::{LedgerConfig, LogPublisher, OutboxRelay, PostgresLedgerStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ledgerbank_observability::init();

    let config = LedgerConfig::from_env().context("loading configuration")?;
    let database_url = config.require_database_url()?;

    let store = PostgresLedgerStore::connect(database_url, config.db_max_connections)
        .await
        .context("connecting to postgres")?;
    store.migrate().await.context("running migrations")?;

    let relay = OutboxRelay::new(
        store,
        LogPublisher,
        config.outbox_batch_size,
        config.outbox_poll_interval,
    );

    relay
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "could not listen for shutdown signal");
            }
        })
        .await;

    Ok(())
}
