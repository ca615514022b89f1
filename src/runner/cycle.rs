//! One polling cycle over every configured service, and the interval loop.

use super::summary::CycleSummary;
use crate::clients::{ArrClient, ClientPool, RequestGate, ServiceClient};
use crate::config::{AppConfig, ServiceSettings};
use crate::engine::{
    Decision, DecisionEngine, DecisionInput, ReannounceCoordinator, Reason, StoreWrite,
};
use crate::notifications::{
    NotificationEvent, NotificationRouter, NotificationTransport, WebhookTransport,
};
use crate::queue::{QueueItem, StrikeKey};
use crate::strikes::{JsonFileStrikeStore, StrikeRecord, StrikeStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Tracing target of the per-item decision explanations.
pub const EVENTS_TARGET: &str = "queue_cleaner::events";

const ENRICH_CONCURRENCY: usize = 8;

/// A managed service together with its client and request gate.
pub struct ServiceHandle {
    pub settings: ServiceSettings,
    pub client: Box<dyn ServiceClient>,
    pub gate: Arc<RequestGate>,
}

/// Owns the strike store and the reannounce tracker. Decisions, store writes
/// and adapter calls all happen serially on the cycle's own task.
pub struct CycleRunner {
    config: AppConfig,
    services: Vec<ServiceHandle>,
    clients: ClientPool,
    store: Arc<dyn StrikeStore>,
    transport: Arc<dyn NotificationTransport>,
    engine: DecisionEngine,
    reannounce: ReannounceCoordinator,
    router: NotificationRouter,
}

impl CycleRunner {
    pub fn new(
        config: AppConfig,
        services: Vec<ServiceHandle>,
        clients: ClientPool,
        store: Arc<dyn StrikeStore>,
        transport: Arc<dyn NotificationTransport>,
    ) -> Self {
        let engine = DecisionEngine::new(config.general.reset_policy);
        let router = NotificationRouter::new(config.destinations.clone(), config.general.dry_run);
        Self {
            config,
            services,
            clients,
            store,
            transport,
            engine,
            reannounce: ReannounceCoordinator::new(),
            router,
        }
    }

    /// Wire up HTTP clients, the JSON strike store and the webhook transport.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let mut services = Vec::with_capacity(config.services.len());
        for settings in &config.services {
            let limits = config.service_limits(&settings.name);
            let client = ArrClient::from_settings(settings, &config.general, &limits)?;
            let gate = client.gate().clone();
            services.push(ServiceHandle {
                settings: settings.clone(),
                client: Box::new(client),
                gate,
            });
        }
        let clients = ClientPool::from_settings(&config.clients, &config.general)?;
        let store = Arc::new(JsonFileStrikeStore::open(
            config.general.strike_file_path.clone(),
        ));
        let transport = Arc::new(WebhookTransport::new()?);
        Ok(Self::new(config, services, clients, store, transport))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StrikeStore> {
        &self.store
    }

    /// Run cycles every `interval_secs` until cancelled. With `once`, run a
    /// single cycle and return.
    pub async fn run(mut self, shutdown: CancellationToken, once: bool) {
        let interval = Duration::from_secs(self.config.general.interval_secs);
        info!(
            "Queue cleaner starting (services={}, torrent_clients={}, interval={}s, dry_run={})",
            self.services.len(),
            self.clients.len(),
            interval.as_secs(),
            self.config.general.dry_run
        );

        loop {
            // A started cycle always runs to completion so that removals and
            // their strike writes are never split.
            let summary = self.run_cycle().await;
            let next_run = (!once).then(|| {
                Utc::now() + chrono::Duration::seconds(interval.as_secs() as i64)
            });
            summary.log(next_run);

            if once || shutdown.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => {
                    info!("Queue cleaner shutting down");
                    break;
                }
            }
        }

        info!("Queue cleaner stopped");
    }

    /// Poll every service once and act on what was found.
    pub async fn run_cycle(&mut self) -> CycleSummary {
        let now = Utc::now();
        let mut summary = CycleSummary::default();
        self.reannounce.begin_cycle();

        let snapshots = join_all(
            self.services
                .iter()
                .map(|handle| handle.client.fetch_queue()),
        )
        .await;

        let mut present_downloads: HashSet<String> = HashSet::new();
        for (index, snapshot) in snapshots.into_iter().enumerate() {
            summary.services_polled += 1;
            let name = self.services[index].settings.name.clone();
            match snapshot {
                Ok(mut items) => {
                    info!("{}: checking {} queue item(s)", name, items.len());
                    present_downloads.extend(
                        items
                            .iter()
                            .filter_map(|item| item.download_id.as_deref())
                            .map(str::to_lowercase),
                    );
                    enrich(&mut items, &self.clients, &self.services[index].gate).await;
                    self.process_service(index, &items, now, &mut summary).await;
                }
                Err(e) => {
                    summary.services_failed += 1;
                    summary.errors += 1;
                    error!("{}: queue fetch failed, skipping this cycle: {}", name, e);
                }
            }
        }

        // Pruning needs the full picture: every service polled successfully.
        if summary.services_failed == 0 {
            let dropped = self.reannounce.retain(&present_downloads);
            if dropped > 0 {
                debug!("Dropped reannounce tracking for {} departed download(s)", dropped);
            }
            if !self.config.general.dry_run {
                self.prune_unconfigured_services(&mut summary);
            }
        }

        let pending = self.router.flush();
        if !pending.is_empty() {
            debug!("Flushing {} batched notification(s)", pending.len());
            self.transport.send_all(pending).await;
        }

        if !self.config.general.dry_run {
            if let Err(e) = self.store.flush() {
                warn!("Failed to flush strike store: {:#}", e);
            }
        }

        summary.items_with_strikes = match self.store.list() {
            Ok(records) => records.iter().filter(|(_, r)| r.count > 0).count(),
            Err(e) => {
                warn!("Failed to list strike records: {:#}", e);
                0
            }
        };
        summary
    }

    /// Drop strike records of services that are no longer configured.
    fn prune_unconfigured_services(&self, summary: &mut CycleSummary) {
        if self.services.is_empty() {
            return;
        }
        let records = match self.store.list() {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to list strike records: {:#}", e);
                summary.errors += 1;
                return;
            }
        };
        for (key, _) in records {
            let configured = self
                .services
                .iter()
                .any(|handle| handle.settings.name == key.service());
            if configured {
                continue;
            }
            match self.store.remove(&key) {
                Ok(_) => info!("Pruned strike record {} of unconfigured service", key),
                Err(e) => {
                    warn!("Failed to prune strike record {}: {:#}", key, e);
                    summary.errors += 1;
                }
            }
        }
    }

    async fn process_service(
        &mut self,
        index: usize,
        items: &[QueueItem],
        now: DateTime<Utc>,
        summary: &mut CycleSummary,
    ) {
        let Self {
            config,
            services,
            clients,
            store,
            transport,
            engine,
            reannounce,
            router,
        } = self;
        let handle = &services[index];
        let name = handle.settings.name.as_str();
        let dry_run = config.general.dry_run;
        let mut seen: HashSet<StrikeKey> = HashSet::with_capacity(items.len());

        for item in items {
            summary.processed += 1;
            let key = item.strike_key();
            seen.insert(key.clone());

            let record = match store.get(&key) {
                Ok(record) => record,
                Err(e) => {
                    warn!("{}: cannot read strikes for {}: {:#}", name, key, e);
                    summary.errors += 1;
                    continue;
                }
            };

            let effective = config.effective_config(name, &item.title);
            let input = DecisionInput {
                item,
                record: record.as_ref(),
                config: &effective,
                whitelisted: config.whitelist.matches(item),
                auto_search: handle.settings.auto_search,
                now,
            };
            let mut evaluation = engine.evaluate(&input, reannounce);

            if let Decision::Reannounce {
                download_id,
                recheck,
            } = evaluation.decision.clone()
            {
                if !dry_run {
                    if clients.reannounce(&download_id, recheck).await {
                        let state = reannounce.commit(&download_id, now);
                        info!(
                            "{}: reannounced {} (id={}, attempt {})",
                            name, item.title, item.id, state.attempts
                        );
                    } else {
                        warn!(
                            "{}: no torrent client accepted the reannounce of {}, counting a strike instead",
                            name, download_id
                        );
                        let mut fallback = effective.clone();
                        fallback.reannounce.enabled = false;
                        let input = DecisionInput {
                            config: &fallback,
                            ..input
                        };
                        evaluation = engine.evaluate(&input, reannounce);
                    }
                }
            }

            let decision = &evaluation.decision;
            if let Decision::Remove {
                blacklist, search, ..
            } = decision
            {
                if !dry_run {
                    if let Err(e) = handle.client.remove(item.id, *blacklist).await {
                        error!(
                            "{}: failed to remove {} (id={}): {}",
                            name, item.title, item.id, e
                        );
                        summary.errors += 1;
                        continue;
                    }
                    if *search {
                        match handle.client.search(item).await {
                            Ok(true) => info!("{}: triggered search for id={}", name, item.id),
                            Ok(false) => info!(
                                "{}: no search identifiers on id={}, skipping search",
                                name, item.id
                            ),
                            Err(e) => warn!(
                                "{}: search after removing id={} failed: {}",
                                name, item.id, e
                            ),
                        }
                    }
                    if let Some(download_id) = &item.download_id {
                        reannounce.forget(download_id);
                    }
                }
            }

            if !dry_run {
                let result = match &evaluation.write {
                    StoreWrite::None => Ok(()),
                    StoreWrite::Apply { delta, snapshot } => {
                        store.apply(&key, *delta, snapshot).map(|_| ())
                    }
                    StoreWrite::Remove => store.remove(&key).map(|_| ()),
                };
                if let Err(e) = result {
                    warn!("{}: failed to update strikes for {}: {:#}", name, key, e);
                    summary.errors += 1;
                }
            }

            let strikes = strikes_after(decision, record.as_ref());
            log_decision(name, item, decision, strikes, dry_run);
            count_decision(summary, decision);

            if config.general.explain_decisions {
                info!(
                    target: EVENTS_TARGET,
                    event = decision_event(decision),
                    service = name,
                    id = item.id,
                    title = item.title.as_str(),
                    verdict = evaluation.verdict.map(|v| v.as_str()).unwrap_or("none"),
                    reason = decision.reason().as_str(),
                    strikes,
                    dry_run,
                    "decision"
                );
            }

            if decision.is_notifiable() {
                let event = NotificationEvent {
                    service: name.to_string(),
                    id: item.id,
                    title: item.title.clone(),
                    reason: decision.reason().as_str().to_string(),
                };
                let messages = router.route(&event);
                if !messages.is_empty() {
                    transport.send_all(messages).await;
                }
            }
        }

        // Only a complete, successful snapshot may age out records.
        if !dry_run {
            match store.sweep(name, &seen) {
                Ok(removed) if !removed.is_empty() => {
                    info!("{}: pruned {} stale strike record(s)", name, removed.len())
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("{}: failed to prune stale strike records: {:#}", name, e);
                    summary.errors += 1;
                }
            }
        }
    }
}

/// Attach torrent-client data to torrents that have a download id.
async fn enrich(items: &mut [QueueItem], clients: &ClientPool, gate: &RequestGate) {
    if clients.is_empty() {
        return;
    }
    let targets: Vec<(usize, String)> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.is_torrent())
        .filter_map(|(i, item)| item.download_id.clone().map(|id| (i, id)))
        .collect();
    if targets.is_empty() {
        return;
    }

    let found: Vec<_> = stream::iter(targets)
        .map(|(i, download_id)| async move {
            let _permit = gate.acquire().await;
            (i, clients.enrich(&download_id).await)
        })
        .buffer_unordered(ENRICH_CONCURRENCY)
        .collect()
        .await;

    for (i, enrichment) in found {
        items[i].enrichment = enrichment;
    }
}

/// Strike count once the decision's write is applied.
fn strikes_after(decision: &Decision, record: Option<&StrikeRecord>) -> u32 {
    match decision {
        Decision::Strike { count } | Decision::Reset { count } => *count,
        Decision::Remove { .. } => 0,
        Decision::NoOp { .. } | Decision::Reannounce { .. } => {
            record.map(|r| r.count).unwrap_or(0)
        }
    }
}

fn decision_event(decision: &Decision) -> &'static str {
    match decision {
        Decision::NoOp { .. } => "noop",
        Decision::Strike { .. } => "strike",
        Decision::Reset { .. } => "reset",
        Decision::Remove { .. } => "remove",
        Decision::Reannounce { .. } => "reannounce",
    }
}

fn count_decision(summary: &mut CycleSummary, decision: &Decision) {
    match decision {
        Decision::NoOp {
            reason: Reason::Waiting,
        } => summary.waiting += 1,
        Decision::NoOp { .. } => {}
        Decision::Strike { .. } => summary.strikes_increased += 1,
        Decision::Reset { .. } => summary.strikes_decreased += 1,
        Decision::Remove { .. } => summary.removed += 1,
        Decision::Reannounce { .. } => summary.reannounces += 1,
    }
}

fn log_decision(service: &str, item: &QueueItem, decision: &Decision, strikes: u32, dry_run: bool) {
    let prefix = if dry_run { "[DRY RUN] " } else { "" };
    match decision {
        Decision::NoOp { reason } => debug!(
            "{}: id={} {} unchanged ({})",
            service,
            item.id,
            item.title,
            reason.as_str()
        ),
        Decision::Strike { .. } => info!(
            "{}{}: strike {} for {} (id={})",
            prefix, service, strikes, item.title, item.id
        ),
        Decision::Reset { .. } => info!(
            "{}{}: {} (id={}) progressed, strikes now {}",
            prefix, service, item.title, item.id, strikes
        ),
        Decision::Remove { reason, search, .. } => info!(
            "{}{}: removed and blocklisted {} (id={}) reason={} search={}",
            prefix,
            service,
            item.title,
            item.id,
            reason.as_str(),
            search
        ),
        Decision::Reannounce {
            download_id,
            recheck,
        } => info!(
            "{}{}: reannounce scheduled for {} ({}) recheck={}",
            prefix, service, item.title, download_id, recheck
        ),
    }
}
