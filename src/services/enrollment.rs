//! Enrollment gate
//!
//! Decides once at startup whether the session begins at enrollment or goes
//! straight to the visitor flow, and performs the one-time enrollment.
//! A failed remote enrollment still unlocks the visitor flow: availability
//! wins over remote consistency, and the outcome reports what happened.

use crate::{
    api_client::VisitApi,
    connectivity::ConnectivityProbe,
    error::{Error, Result},
    models::EnrollmentForm,
    services::visits::VisitSubmissionPipeline,
    store::{LocalStore, StoreKey},
};
use chrono::Utc;
use log::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unenrolled,
    Enrolled,
}

/// Presence of any stored enrollment means the device is enrolled.
pub fn initial_state(stored_enrollment: Option<&str>) -> SessionState {
    match stored_enrollment {
        Some(_) => SessionState::Enrolled,
        None => SessionState::Unenrolled,
    }
}

/// Session context handed to the visitor flow.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VisitorContext {
    /// `employeeCodeIdFromPreviousScreen`
    pub employee_code: Option<String>,
}

impl VisitorContext {
    pub const UNKNOWN_EMPLOYEE: &str = "Unknown Employee";

    pub fn display_code(&self) -> &str {
        self.employee_code
            .as_deref()
            .unwrap_or(Self::UNKNOWN_EMPLOYEE)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    Enrollment,
    Visitors(VisitorContext),
}

#[derive(Debug)]
pub enum RemoteEnrollment {
    Accepted,
    /// The remote call failed; nothing was stored locally.
    Failed(Error),
    /// The device was already enrolled; no call was made.
    Skipped,
}

#[derive(Debug)]
pub struct EnrollmentOutcome {
    pub route: Route,
    pub remote: RemoteEnrollment,
}

impl EnrollmentOutcome {
    pub fn remote_accepted(&self) -> bool {
        matches!(self.remote, RemoteEnrollment::Accepted)
    }
}

pub struct EnrollmentGate<Api, Probe>
where
    Api: VisitApi,
    Probe: ConnectivityProbe,
{
    api: Api,
    probe: Probe,
    store: LocalStore,
    state: SessionState,
}

impl<Api, Probe> EnrollmentGate<Api, Probe>
where
    Api: VisitApi,
    Probe: ConnectivityProbe,
{
    /// Evaluate the stored enrollment once and build the gate in the resulting state
    pub async fn start(api: Api, probe: Probe, store: LocalStore) -> Self {
        let stored = store.get(StoreKey::DeviceEnrollment).await;
        let state = initial_state(stored.as_deref());
        info!("session starts {state:?}");

        Self {
            api,
            probe,
            store,
            state,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Where the session begins; an already enrolled device carries no employee code.
    pub fn initial_route(&self) -> Route {
        match self.state {
            SessionState::Unenrolled => Route::Enrollment,
            SessionState::Enrolled => Route::Visitors(VisitorContext::default()),
        }
    }

    /// Validate, check connectivity, submit and hand over to the visitor flow
    ///
    /// # Returns
    /// * `Err(Validation)` / `Err(Connectivity)` - nothing was sent, the gate stays unenrolled
    /// * `Ok(outcome)` - the visitor route, whatever the remote answered
    pub async fn submit_enrollment(&mut self, form: EnrollmentForm) -> Result<EnrollmentOutcome> {
        debug!("submit_enrollment() called");

        if self.state == SessionState::Enrolled {
            warn!("device is already enrolled, re-enrollment is not supported");
            return Ok(EnrollmentOutcome {
                route: Route::Visitors(VisitorContext::default()),
                remote: RemoteEnrollment::Skipped,
            });
        }

        form.validate()?;

        let connectivity = self.probe.current_state().await;
        if !connectivity.connected {
            return Err(Error::Connectivity);
        }

        let enrollment = form.into_enrollment(connectivity.connected, Utc::now());

        let remote = match self.api.enroll_device(&enrollment).await {
            Ok(()) => {
                if !self.store.save_enrollment(&enrollment).await {
                    warn!("enrollment accepted remotely but not stored locally");
                }
                RemoteEnrollment::Accepted
            }
            Err(e) => {
                error!("enrollment failed, continuing without local record: {e}");
                RemoteEnrollment::Failed(e)
            }
        };

        self.state = SessionState::Enrolled;
        info!(
            "continuing to visitor flow with employee code {}",
            enrollment.employee_code
        );

        Ok(EnrollmentOutcome {
            route: Route::Visitors(VisitorContext {
                employee_code: Some(enrollment.employee_code),
            }),
            remote,
        })
    }

    /// Hand the collaborators over to the visitor flow; `None` while unenrolled
    pub fn into_pipeline(self) -> Option<VisitSubmissionPipeline<Api, Probe>> {
        match self.state {
            SessionState::Enrolled => Some(VisitSubmissionPipeline::new(
                self.api, self.probe, self.store,
            )),
            SessionState::Unenrolled => None,
        }
    }
}
