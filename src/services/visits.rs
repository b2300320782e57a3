//! Visit submission and history
//!
//! Headers are synchronized strictly one request at a time: every detail of a
//! header first, then the header itself. The first failure aborts the whole
//! batch; records the remote already accepted stay accepted.

use crate::{
    api_client::VisitApi,
    connectivity::{ConnectivityProbe, ConnectivityState, Subscription},
    error::{Error, Result, ValidationErrors},
    models::{VisitDetail, VisitHeader, VisitRecord},
    store::LocalStore,
};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::{cmp::Reverse, sync::Arc};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver},
    task::JoinHandle,
};
use uuid::Uuid;

pub type HistoryResult = Result<Vec<VisitRecord>>;

pub struct VisitSubmissionPipeline<Api, Probe>
where
    Api: VisitApi,
    Probe: ConnectivityProbe,
{
    api: Api,
    probe: Probe,
    store: LocalStore,
}

impl<Api, Probe> VisitSubmissionPipeline<Api, Probe>
where
    Api: VisitApi,
    Probe: ConnectivityProbe,
{
    pub fn new(api: Api, probe: Probe, store: LocalStore) -> Self {
        Self { api, probe, store }
    }

    /// A new header pre-filled for the current device, employee and time
    pub async fn draft_header(&self) -> VisitHeader {
        debug!("draft_header() called");

        let device_id = self.store.device_id_or_create().await;
        let last_employee_code = self.store.last_employee_code().await;
        let connected = self.probe.current_state().await.connected;
        let now = Utc::now();

        VisitHeader {
            id: Uuid::new_v4(),
            employee_code: last_employee_code.clone().unwrap_or_default(),
            device_id,
            visit_date: now,
            entry_time: now,
            exit_time: now,
            comment: String::new(),
            is_sync: connected,
            date_sync: connected.then_some(now),
            visit_details: vec![VisitDetail::blank(last_employee_code)],
        }
    }

    /// Synchronize `headers` in order, aborting on the first failed request
    pub async fn submit(&self, headers: &[VisitHeader]) -> Result<()> {
        debug!("submit() called with {} header(s)", headers.len());

        self.submit_all(headers)
            .await
            .inspect_err(|e| error!("visit submission aborted: {e}"))
    }

    async fn submit_all(&self, headers: &[VisitHeader]) -> Result<()> {
        validate_batch(headers)?;
        self.require_connectivity().await?;

        for header in headers {
            for detail in &header.visit_details {
                let payload = detail.to_payload(header, Utc::now())?;
                self.api.post_visit_detail(&payload).await?;
            }

            self.api
                .post_visit_header(&header.to_payload(Utc::now()))
                .await?;
            info!(
                "visit {} synchronized with {} detail(s)",
                header.id,
                header.visit_details.len()
            );
        }

        if let Some(first) = headers.first()
            && !self.store.set_last_employee_code(&first.employee_code).await
        {
            warn!("last employee code {} not stored", first.employee_code);
        }

        Ok(())
    }

    /// All visit records of `employee_code`, newest first
    pub async fn fetch_history(&self, employee_code: &str) -> HistoryResult {
        debug!("fetch_history() called for {employee_code}");

        self.require_connectivity().await?;

        let mut records = self.api.visit_details_for(employee_code).await?;
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn require_connectivity(&self) -> Result<()> {
        if self.probe.current_state().await.connected {
            Ok(())
        } else {
            Err(Error::Connectivity)
        }
    }
}

impl<Api, Probe> VisitSubmissionPipeline<Api, Probe>
where
    Api: VisitApi + Send + Sync + 'static,
    Probe: ConnectivityProbe + Send + Sync + 'static,
{
    /// Re-fetch history every time connectivity comes back
    ///
    /// Results arrive on the returned receiver until the [`HistoryWatch`] is
    /// dropped or the receiver is closed.
    pub fn watch_history(
        self: &Arc<Self>,
        employee_code: impl Into<String>,
    ) -> (HistoryWatch, UnboundedReceiver<HistoryResult>) {
        let employee_code = employee_code.into();
        let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let subscription = self
            .probe
            .subscribe(Arc::new(move |state: ConnectivityState| {
                if state.connected {
                    let _ = trigger_tx.send(());
                }
            }));

        let pipeline = Arc::clone(self);
        let task = tokio::spawn(async move {
            while trigger_rx.recv().await.is_some() {
                info!("connectivity restored, refreshing history of {employee_code}");
                let result = pipeline.fetch_history(&employee_code).await;
                if results_tx.send(result).is_err() {
                    break;
                }
            }
        });

        (
            HistoryWatch {
                _subscription: subscription,
                task,
            },
            results_rx,
        )
    }
}

/// Keeps a history watch alive. Dropping it unsubscribes and stops re-fetching.
pub struct HistoryWatch {
    _subscription: Subscription,
    task: JoinHandle<()>,
}

impl Drop for HistoryWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn validate_batch(headers: &[VisitHeader]) -> Result<()> {
    let mut errors = ValidationErrors::default();

    if headers.is_empty() {
        errors.push("visitHeaders", "At least one visit header is required.");
    }
    for header in headers {
        header.validate(&mut errors);
    }

    errors.into_result()
}

/// Stable, so records with equal timestamps keep their received order.
/// Records without a timestamp go last.
pub fn sort_newest_first(records: &mut [VisitRecord]) {
    records.sort_by_key(|record| Reverse(record.transaction_date));
}
