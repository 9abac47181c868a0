//! Session engine

use chrono::{DateTime, Local, NaiveDate};
use timelock_api::{
    AppEntry, AppMetadata, AppState, ContextRole, DegradedReason, LaunchVerdict, PermissionStatus,
    SessionDocument, SessionSnapshot, SyncPayload, API_VERSION,
};
use timelock_config::EngineConfig;
use timelock_store::{SaveOutcome, SessionStore, StoreError};
use timelock_util::{PackageId, RetryExhausted};
use tracing::{debug, info, warn};

use crate::{
    access_used, is_newer, launch_verdict, tick_to_now, unverified_launch_verdict, CoreEvent,
    EngineError, EngineResult, EventDispatcher, PermissionGate, SyncOutbox,
};

/// Times a command is attempted when the other context keeps committing
/// the revision it wanted
const COMMIT_ATTEMPTS: usize = 3;

/// The session engine for one execution context.
///
/// Commands re-read the stored document before deciding anything, so a
/// mutation made by the other context is never overwritten with values
/// captured earlier. Every committed change bumps the revision, is persisted
/// with bounded retry, and is handed to the sync outbox. A commit whose
/// revision the other context already stored is re-run on the newer
/// document. When the store cannot be reached the engine keeps working on
/// its in-memory copy and reports itself degraded.
pub struct SessionEngine {
    config: EngineConfig,
    role: ContextRole,
    store: SessionStore,
    gate: PermissionGate,
    outbox: SyncOutbox,
    dispatcher: EventDispatcher,
    document: SessionDocument,
    store_failure: Option<String>,
    /// Set once a document was read from the store or received from the
    /// other context. Until then launches are blocked.
    state_known: bool,
    monitoring_required: bool,
}

impl SessionEngine {
    pub fn new(
        config: EngineConfig,
        role: ContextRole,
        store: SessionStore,
        gate: PermissionGate,
        outbox: SyncOutbox,
    ) -> Self {
        info!(
            role = %role,
            max_controlled_apps = config.session.max_controlled_apps,
            "Session engine initialized"
        );

        Self {
            config,
            role,
            store,
            gate,
            outbox,
            dispatcher: EventDispatcher::new(),
            document: SessionDocument::default(),
            store_failure: None,
            state_known: false,
            monitoring_required: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn role(&self) -> ContextRole {
        self.role
    }

    /// Listeners registered here see every event the engine produces
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Local document as of the last command or tick
    pub fn document(&self) -> &SessionDocument {
        &self.document
    }

    pub fn revision(&self) -> u64 {
        self.document.revision
    }

    pub fn permissions(&self) -> PermissionStatus {
        self.gate.status()
    }

    /// False until the stored or published document has been seen
    pub fn state_known(&self) -> bool {
        self.state_known
    }

    pub fn store_healthy(&self) -> bool {
        self.store_failure.is_none() && self.store.is_healthy()
    }

    /// True while any entry is Active or Locked
    pub fn monitoring_required(&self) -> bool {
        self.monitoring_required
    }

    pub fn degraded_reasons(&self) -> Vec<DegradedReason> {
        let mut reasons = Vec::new();
        if let Some(detail) = &self.store_failure {
            reasons.push(DegradedReason::StoreUnavailable {
                detail: detail.clone(),
            });
        }
        if let Some(detail) = self.outbox.health().failure() {
            reasons.push(DegradedReason::SyncUnavailable { detail });
        }
        reasons
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded_reasons().is_empty()
    }

    /// Load the persisted document and apply every transition that came due
    /// while nothing was running.
    pub fn recover(&mut self, now: DateTime<Local>) -> Vec<CoreEvent> {
        let events = self.prepare(now);
        if self.state_known {
            info!(
                role = %self.role,
                revision = self.document.revision,
                entries = self.document.len(),
                "Session document recovered"
            );
        } else {
            warn!(role = %self.role, "Session document unreadable, launches blocked until it loads");
        }
        self.dispatcher.dispatch_all(&events);
        events
    }

    /// Add an app to the controlled set as Pending.
    ///
    /// Selecting a Pending app again only refreshes its metadata.
    pub fn select_app(
        &mut self,
        metadata: AppMetadata,
        now: DateTime<Local>,
    ) -> EngineResult<AppEntry> {
        if metadata.package_id.is_blank() {
            return Err(EngineError::InvalidArgument(
                "package id must not be empty".into(),
            ));
        }

        self.run_command(now, |engine, events| {
            engine.select_inner(metadata.clone(), now, events)
        })
    }

    fn select_inner(
        &mut self,
        metadata: AppMetadata,
        now: DateTime<Local>,
        events: &mut Vec<CoreEvent>,
    ) -> EngineResult<AppEntry> {
        let id = metadata.package_id.clone();
        let previous = self.document.get(&id).cloned();
        let previous_state = previous.as_ref().map(|e| e.state);

        let entry = match previous {
            Some(existing) if existing.state == AppState::Pending => {
                if existing.metadata() == metadata {
                    return Ok(existing);
                }
                AppEntry {
                    display_name: metadata.display_name,
                    icon: metadata.icon,
                    ..existing
                }
            }
            Some(existing) if existing.is_running() => {
                return Err(EngineError::InvalidStateTransition {
                    package_id: id,
                    state: existing.state,
                    action: "select",
                });
            }
            other => {
                let max = self.config.session.max_controlled_apps;
                if self.document.capacity_used() >= max {
                    return Err(EngineError::CapacityExceeded { max });
                }
                let mut entry = AppEntry::pending(metadata);
                // An app coming back after a finished cycle keeps its last limits
                if let Some(old) = other {
                    entry.access_budget_seconds = old.access_budget_seconds;
                    entry.lock_duration_seconds = old.lock_duration_seconds;
                }
                entry
            }
        };

        let mut next = self.document.clone();
        next.entries.insert(id.clone(), entry.clone());
        events.extend(self.commit(next, now)?);
        self.save_catalog();

        info!(package_id = %id, "App selected");
        events.push(CoreEvent::StateChanged {
            package_id: id,
            from_state: previous_state,
            to_state: Some(AppState::Pending),
        });
        Ok(entry)
    }

    /// Remove an app that is not mid-cycle. Unknown ids are a no-op.
    pub fn deselect_app(
        &mut self,
        package_id: &PackageId,
        now: DateTime<Local>,
    ) -> EngineResult<Option<AppEntry>> {
        self.run_command(now, |engine, events| {
            engine.deselect_inner(package_id, now, events)
        })
    }

    fn deselect_inner(
        &mut self,
        package_id: &PackageId,
        now: DateTime<Local>,
        events: &mut Vec<CoreEvent>,
    ) -> EngineResult<Option<AppEntry>> {
        let Some(existing) = self.document.get(package_id).cloned() else {
            debug!(package_id = %package_id, "Deselect of unknown app ignored");
            return Ok(None);
        };

        if existing.is_running() {
            return Err(EngineError::InvalidStateTransition {
                package_id: package_id.clone(),
                state: existing.state,
                action: "deselect",
            });
        }

        let mut next = self.document.clone();
        next.entries.remove(package_id);
        events.extend(self.commit(next, now)?);
        self.save_catalog();

        info!(package_id = %package_id, "App deselected");
        events.push(CoreEvent::StateChanged {
            package_id: package_id.clone(),
            from_state: Some(existing.state),
            to_state: None,
        });
        Ok(Some(existing))
    }

    /// Start the access window of a Pending app.
    ///
    /// Checks run in order: durations, entry state, permissions. Any failure
    /// leaves the document untouched and publishes nothing.
    pub fn activate(
        &mut self,
        package_id: &PackageId,
        access_budget_seconds: u64,
        lock_duration_seconds: u64,
        now: DateTime<Local>,
    ) -> EngineResult<AppEntry> {
        let limits = self.config.session;
        validate_duration("access budget", access_budget_seconds, limits.max_access_seconds)?;
        validate_duration("lock duration", lock_duration_seconds, limits.max_lock_seconds)?;

        self.run_command(now, |engine, events| {
            engine.activate_inner(
                package_id,
                access_budget_seconds,
                lock_duration_seconds,
                now,
                events,
            )
        })
    }

    fn activate_inner(
        &mut self,
        package_id: &PackageId,
        access_budget_seconds: u64,
        lock_duration_seconds: u64,
        now: DateTime<Local>,
        events: &mut Vec<CoreEvent>,
    ) -> EngineResult<AppEntry> {
        let existing = self.entry_or_unknown(package_id)?;
        if existing.state != AppState::Pending {
            return Err(EngineError::InvalidStateTransition {
                package_id: package_id.clone(),
                state: existing.state,
                action: "activate",
            });
        }

        self.gate.require_enforceable()?;

        let entry = AppEntry {
            access_budget_seconds,
            lock_duration_seconds,
            state: AppState::Active,
            remaining_seconds: access_budget_seconds,
            cycle_started_at: Some(now),
            locked_at: None,
            ..existing
        };

        let mut next = self.document.clone();
        next.entries.insert(package_id.clone(), entry.clone());
        events.extend(self.commit(next, now)?);

        info!(
            package_id = %package_id,
            access_budget_seconds,
            lock_duration_seconds,
            "Access window started"
        );
        events.push(CoreEvent::StateChanged {
            package_id: package_id.clone(),
            from_state: Some(AppState::Pending),
            to_state: Some(AppState::Active),
        });
        Ok(entry)
    }

    /// End an access window early. The lock starts now.
    ///
    /// Ending an app that is already Locked is a no-op.
    pub fn force_end(
        &mut self,
        package_id: &PackageId,
        now: DateTime<Local>,
    ) -> EngineResult<AppEntry> {
        self.run_command(now, |engine, events| {
            engine.force_end_inner(package_id, now, events)
        })
    }

    fn force_end_inner(
        &mut self,
        package_id: &PackageId,
        now: DateTime<Local>,
        events: &mut Vec<CoreEvent>,
    ) -> EngineResult<AppEntry> {
        let existing = self.entry_or_unknown(package_id)?;
        match existing.state {
            AppState::Locked => return Ok(existing),
            AppState::Active => {}
            state => {
                return Err(EngineError::InvalidStateTransition {
                    package_id: package_id.clone(),
                    state,
                    action: "force end",
                });
            }
        }

        let used = access_used(&existing, now);
        let entry = AppEntry {
            state: AppState::Locked,
            remaining_seconds: existing.lock_duration_seconds,
            locked_at: Some(now),
            ..existing
        };

        let mut next = self.document.clone();
        next.entries.insert(package_id.clone(), entry.clone());
        events.extend(self.commit(next, now)?);
        self.record_usage(package_id, used, now.date_naive());

        info!(package_id = %package_id, used_secs = used, "Access window ended early");
        events.push(CoreEvent::StateChanged {
            package_id: package_id.clone(),
            from_state: Some(AppState::Active),
            to_state: Some(AppState::Locked),
        });
        Ok(entry)
    }

    /// Re-read the store and advance every Active and Locked entry to `now`.
    ///
    /// Returns the events produced; they are also dispatched to listeners.
    pub fn tick_all(&mut self, now: DateTime<Local>) -> Vec<CoreEvent> {
        let events = self.prepare(now);
        self.dispatcher.dispatch_all(&events);
        events
    }

    /// Decide an observed launch against the current document.
    ///
    /// Before any document has been read every non-exempt launch is blocked:
    /// an empty default must not unlock apps that are Locked on disk.
    pub fn evaluate_launch(&mut self, package_id: &PackageId, now: DateTime<Local>) -> LaunchVerdict {
        let mut events = self.prepare(now);
        let verdict = if self.state_known {
            launch_verdict(&self.document, package_id, &self.config.monitor)
        } else {
            warn!(package_id = %package_id, "Lock state unknown, blocking launch");
            unverified_launch_verdict(package_id, &self.config.monitor)
        };

        if let LaunchVerdict::Block {
            package_id,
            display_name,
            remaining_seconds,
        } = &verdict
        {
            info!(package_id = %package_id, remaining_seconds, "Launch blocked");
            events.push(CoreEvent::AppLaunchBlocked {
                package_id: package_id.clone(),
                display_name: display_name.clone(),
                remaining_seconds: *remaining_seconds,
            });
        }

        self.dispatcher.dispatch_all(&events);
        verdict
    }

    /// Adopt a document published by the other context.
    ///
    /// Returns false when the payload's revision is not newer than ours.
    pub fn apply_remote(&mut self, payload: SyncPayload) -> bool {
        if !is_newer(self.document.revision, &payload) {
            debug!(
                local_revision = self.document.revision,
                payload_revision = payload.revision,
                origin = %payload.origin,
                "Stale sync payload discarded"
            );
            return false;
        }

        debug!(
            from_revision = self.document.revision,
            to_revision = payload.revision,
            origin = %payload.origin,
            "Sync payload applied"
        );
        self.document = payload.document;
        self.document.revision = payload.revision;
        self.state_known = true;

        let mut events = vec![CoreEvent::DocumentChanged {
            revision: self.document.revision,
        }];
        events.extend(self.update_monitoring());
        self.dispatcher.dispatch_all(&events);
        true
    }

    /// Publish the current document unchanged so a receiver that missed an
    /// update catches up.
    pub fn republish(&mut self, now: DateTime<Local>) -> Vec<CoreEvent> {
        let events = self.publish(now);
        self.dispatcher.dispatch_all(&events);
        events
    }

    /// Read-only view with remaining times computed for `now`
    pub fn snapshot(&self, now: DateTime<Local>) -> SessionSnapshot {
        let mut document = self.document.clone();
        for entry in document.entries.values_mut() {
            if entry.is_running() {
                *entry = tick_to_now(entry, now).entry;
            }
        }

        SessionSnapshot {
            api_version: API_VERSION,
            taken_at: now,
            document,
            degraded: self.degraded_reasons(),
        }
    }

    /// Persist the current document, failing if the store is unreachable
    pub fn flush(&mut self) -> EngineResult<()> {
        let events = self.persist();
        self.dispatcher.dispatch_all(&events);
        match &self.store_failure {
            Some(detail) => Err(EngineError::StoreUnavailable(detail.clone())),
            None => Ok(()),
        }
    }

    /// `SyncUnavailable` if the last publish attempt gave up
    pub fn sync_status(&self) -> EngineResult<()> {
        match self.outbox.health().failure() {
            Some(detail) => Err(EngineError::SyncUnavailable(detail)),
            None => Ok(()),
        }
    }

    fn entry_or_unknown(&self, package_id: &PackageId) -> EngineResult<AppEntry> {
        self.document
            .get(package_id)
            .cloned()
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown app '{}'", package_id)))
    }

    /// Run a command on a freshly prepared document. A command whose commit
    /// lost the race for its revision is re-run on the newer document.
    fn run_command<T>(
        &mut self,
        now: DateTime<Local>,
        mut command: impl FnMut(&mut Self, &mut Vec<CoreEvent>) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut events = Vec::new();
        let mut attempt = 1;
        let result = loop {
            events.extend(self.prepare(now));
            match command(self, &mut events) {
                Err(EngineError::ConcurrentUpdate { revision }) if attempt < COMMIT_ATTEMPTS => {
                    debug!(revision, attempt, "Revision taken by the other context, retrying");
                    attempt += 1;
                }
                result => break result,
            }
        };
        self.dispatcher.dispatch_all(&events);
        result
    }

    /// Refresh from the store, then advance timers to `now`
    fn prepare(&mut self, now: DateTime<Local>) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        for attempt in 1..=COMMIT_ATTEMPTS {
            self.refresh(&mut events);
            match self.advance(now) {
                Ok(advanced) => {
                    events.extend(advanced);
                    break;
                }
                // The other context committed first; its document carries the expiry
                Err(e) => debug!(error = %e, attempt, "Expiry commit superseded, re-reading"),
            }
        }
        events
    }

    fn refresh(&mut self, events: &mut Vec<CoreEvent>) {
        let stored = match self.load_stored() {
            Ok(stored) => stored,
            Err(e) => {
                events.extend(self.store_failed(&e));
                return;
            }
        };
        events.extend(self.store_ok());
        self.state_known = true;

        let local = self.document.revision;
        if stored.revision > local || (stored.revision == local && stored != self.document) {
            if stored.revision != local {
                debug!(from_revision = local, to_revision = stored.revision, "Adopted stored document");
                events.push(CoreEvent::DocumentChanged {
                    revision: stored.revision,
                });
            }
            self.document = stored;
            events.extend(self.update_monitoring());
        } else if stored.revision < local {
            // Changes made while the store was unreachable
            info!(stored_revision = stored.revision, local_revision = local, "Writing back in-memory document");
            events.extend(self.persist());
        }
    }

    /// Apply due transitions. Commits only when a state actually changed.
    fn advance(&mut self, now: DateTime<Local>) -> EngineResult<Vec<CoreEvent>> {
        let mut next = self.document.clone();
        let mut transitions = Vec::new();

        for entry in next.entries.values_mut().filter(|e| e.is_running()) {
            let outcome = tick_to_now(entry, now);
            *entry = outcome.entry;
            transitions.extend(outcome.transitions);
        }

        if transitions.is_empty() {
            self.document = next;
            return Ok(Vec::new());
        }

        let committed = self.commit(next, now)?;

        let mut events = Vec::new();
        for transition in &transitions {
            info!(
                package_id = %transition.package_id,
                from = %transition.from_state,
                to = %transition.to_state,
                at = %transition.at,
                "Timer expired"
            );
            if transition.from_state == AppState::Active
                && let Some(entry) = self.document.get(&transition.package_id)
            {
                self.record_usage(
                    &transition.package_id,
                    entry.access_budget_seconds,
                    transition.at.date_naive(),
                );
            }
            events.push(CoreEvent::TimeExpired {
                package_id: transition.package_id.clone(),
                from_state: transition.from_state,
                to_state: transition.to_state,
                at: transition.at,
            });
        }

        events.extend(committed);
        Ok(events)
    }

    /// Store `next` as the following revision, then publish it.
    ///
    /// `ConcurrentUpdate` when the store already holds that revision; the
    /// local document is left as it was. An unreachable store does not fail
    /// the commit.
    fn commit(
        &mut self,
        mut next: SessionDocument,
        now: DateTime<Local>,
    ) -> EngineResult<Vec<CoreEvent>> {
        next.revision = self.document.revision + 1;

        let mut events = vec![CoreEvent::DocumentChanged {
            revision: next.revision,
        }];
        match self.save(&next) {
            Ok(SaveOutcome::Saved) => events.extend(self.store_ok()),
            Ok(SaveOutcome::Superseded { stored_revision }) => {
                info!(
                    revision = next.revision,
                    stored_revision,
                    "Revision already committed by the other context"
                );
                return Err(EngineError::ConcurrentUpdate {
                    revision: next.revision,
                });
            }
            Err(e) => events.extend(self.store_failed(&e)),
        }

        self.document = next;
        events.extend(self.publish(now));
        events.extend(self.update_monitoring());
        Ok(events)
    }

    /// Write the local document back if the store has nothing newer
    fn persist(&mut self) -> Vec<CoreEvent> {
        match self.save(&self.document) {
            Ok(SaveOutcome::Saved) => self.store_ok().into_iter().collect(),
            Ok(SaveOutcome::Superseded { stored_revision }) => {
                debug!(
                    local_revision = self.document.revision,
                    stored_revision,
                    "Store holds a newer document, adopting it on next refresh"
                );
                self.store_ok().into_iter().collect()
            }
            Err(e) => self.store_failed(&e).into_iter().collect(),
        }
    }

    fn save(&self, document: &SessionDocument) -> Result<SaveOutcome, RetryExhausted<StoreError>> {
        self.config
            .retry
            .run_blocking(|| self.store.save_document_if_newer(document))
    }

    fn publish(&mut self, now: DateTime<Local>) -> Vec<CoreEvent> {
        let health = self.outbox.health();
        let was_healthy = health.failure().is_none();
        let payload = SyncPayload::new(self.document.clone(), self.role, now);

        match self.outbox.send(payload) {
            Ok(()) => Vec::new(),
            Err(e) => {
                warn!(revision = self.document.revision, error = %e, "Could not queue sync payload");
                if was_healthy {
                    vec![CoreEvent::Degraded(DegradedReason::SyncUnavailable {
                        detail: e.to_string(),
                    })]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn update_monitoring(&mut self) -> Option<CoreEvent> {
        let running = self.document.has_running();
        if running == self.monitoring_required {
            return None;
        }
        self.monitoring_required = running;
        if running {
            info!("Monitoring required");
            Some(CoreEvent::MonitoringRequired)
        } else {
            info!("No app mid-cycle, monitoring may stop");
            Some(CoreEvent::MonitoringIdle)
        }
    }

    fn load_stored(&self) -> Result<SessionDocument, RetryExhausted<StoreError>> {
        self.config.retry.run_blocking(|| self.store.load_document())
    }

    fn store_failed(&mut self, error: &RetryExhausted<StoreError>) -> Option<CoreEvent> {
        let detail = error.to_string();
        warn!(error = %detail, "Store unavailable, continuing in memory");
        let newly = self.store_failure.is_none();
        self.store_failure = Some(detail.clone());
        newly.then_some(CoreEvent::Degraded(DegradedReason::StoreUnavailable {
            detail,
        }))
    }

    fn store_ok(&mut self) -> Option<CoreEvent> {
        self.store_failure.take().map(|_| {
            info!("Store recovered");
            CoreEvent::Recovered
        })
    }

    fn save_catalog(&self) {
        if let Err(e) = self.store.save_catalog_from(&self.document) {
            warn!(error = %e, "Failed to save controlled apps catalog");
        }
    }

    fn record_usage(&self, package_id: &PackageId, seconds: u64, day: NaiveDate) {
        if seconds == 0 {
            return;
        }
        if let Err(e) = self.store.add_daily_usage(package_id, day, seconds) {
            warn!(package_id = %package_id, error = %e, "Failed to record daily usage");
        }
    }
}

fn validate_duration(what: &str, seconds: u64, max: u64) -> EngineResult<()> {
    if seconds == 0 {
        return Err(EngineError::InvalidArgument(format!(
            "{} must be greater than zero",
            what
        )));
    }
    if seconds > max {
        return Err(EngineError::InvalidArgument(format!(
            "{} of {}s exceeds the {}s limit",
            what, seconds, max
        )));
    }
    Ok(())
}
