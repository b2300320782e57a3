//! Business logic services
//!
//! The enrollment gate and the visit pipeline depend only on the
//! [`VisitApi`](crate::api_client::VisitApi) and
//! [`ConnectivityProbe`](crate::connectivity::ConnectivityProbe) seams, so
//! both run unchanged against mocks in tests.

pub mod enrollment;
pub mod visits;
