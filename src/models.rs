use crate::error::{Error, Result, ValidationErrors};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Enrollment
// ============================================================================

/// Raw enrollment input as typed by the user.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentForm {
    pub employee_code: String,
    pub first_name: String,
    pub last_name: String,
    pub designation: String,
}

impl EnrollmentForm {
    /// Checks that every required field is non-blank, reporting all missing fields at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = ValidationErrors::default();

        if self.employee_code.trim().is_empty() {
            errors.push("employeeCode", "Employee Code is required.");
        }
        if self.first_name.trim().is_empty() {
            errors.push("firstName", "First Name is required.");
        }
        if self.last_name.trim().is_empty() {
            errors.push("lastName", "Last Name is required.");
        }
        if self.designation.trim().is_empty() {
            errors.push("designation", "Designation is required.");
        }

        errors.into_result()
    }

    pub fn into_enrollment(self, connected: bool, now: DateTime<Utc>) -> Enrollment {
        Enrollment {
            employee_code: self.employee_code.trim().to_string(),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            designation: self.designation.trim().to_string(),
            date_enrolled: now,
            status: connected,
            last_sync: now,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub employee_code: String,
    pub first_name: String,
    pub last_name: String,
    pub designation: String,
    pub date_enrolled: DateTime<Utc>,
    /// Connectivity at enrollment time.
    pub status: bool,
    pub last_sync: DateTime<Utc>,
}

// ============================================================================
// Enumerations
// ============================================================================

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Priority {
    Urgent,
    High,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Urgent => "Urgent",
            Priority::High => "High",
            Priority::Low => "Low",
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Shaft {
    #[serde(rename = "SOB")]
    Sob,
    #[serde(rename = "Central Shaft")]
    CentralShaft,
    #[serde(rename = "MSV")]
    Msv,
    #[serde(rename = "SYNC")]
    Sync,
}

impl Shaft {
    pub fn as_str(&self) -> &'static str {
        match self {
            Shaft::Sob => "SOB",
            Shaft::CentralShaft => "Central Shaft",
            Shaft::Msv => "MSV",
            Shaft::Sync => "SYNC",
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Location {
    Nkana,
    Mufulira,
}

impl Location {
    pub fn as_str(&self) -> &'static str {
        match self {
            Location::Nkana => "Nkana",
            Location::Mufulira => "Mufulira",
        }
    }
}

macro_rules! impl_display_as_str {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )*
    };
}

impl_display_as_str!(Priority, Shaft, Location);

// ============================================================================
// Visits
// ============================================================================

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitHeader {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub employee_code: String,
    #[serde(default)]
    pub device_id: String,
    pub visit_date: DateTime<Utc>,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub is_sync: bool,
    #[serde(default)]
    pub date_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub visit_details: Vec<VisitDetail>,
}

impl VisitHeader {
    pub(crate) fn validate(&self, errors: &mut ValidationErrors) {
        if self.visit_details.is_empty() {
            errors.push("visitDetails", "At least one visit detail is required.");
        }
        for detail in &self.visit_details {
            detail.validate(errors);
        }
    }

    pub fn to_payload(&self, now: DateTime<Utc>) -> VisitHeaderPayload {
        VisitHeaderPayload {
            device_id: self.device_id.clone(),
            visit_date: self.visit_date,
            entry_time: self.entry_time,
            exit_time: self.exit_time,
            comment: self.comment.clone(),
            transaction_date: now,
            is_sync: true,
            date_sync: now,
            employee_code: self.employee_code.clone(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitDetail {
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shaft: Option<Shaft>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default)]
    pub full_comment: String,
    #[serde(default)]
    pub image_path: String,
    #[serde(default = "Utc::now")]
    pub transaction_date: DateTime<Utc>,
    /// Falls back to the owning header's code when unset or empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_code: Option<String>,
}

impl VisitDetail {
    pub fn blank(employee_code: Option<String>) -> Self {
        VisitDetail {
            category: String::new(),
            priority: None,
            shaft: None,
            location: None,
            full_comment: String::new(),
            image_path: String::new(),
            transaction_date: Utc::now(),
            employee_code,
        }
    }

    pub(crate) fn validate(&self, errors: &mut ValidationErrors) {
        if self.priority.is_none() {
            errors.push("priority", "Priority is required.");
        }
        if self.shaft.is_none() {
            errors.push("shaft", "Shaft is required.");
        }
        if self.location.is_none() {
            errors.push("location", "Location is required.");
        }
    }

    pub fn resolved_employee_code<'a>(&'a self, header: &'a VisitHeader) -> &'a str {
        self.employee_code
            .as_deref()
            .filter(|code| !code.is_empty())
            .unwrap_or(&header.employee_code)
    }

    pub fn to_payload(&self, header: &VisitHeader, now: DateTime<Utc>) -> Result<VisitDetailPayload> {
        let (Some(priority), Some(shaft), Some(location)) =
            (self.priority, self.shaft, self.location)
        else {
            let mut errors = ValidationErrors::default();
            self.validate(&mut errors);
            return Err(Error::Validation(errors));
        };

        Ok(VisitDetailPayload {
            category: self.category.clone(),
            priority,
            shaft,
            location,
            full_comment: self.full_comment.clone(),
            image_path: self.image_path.clone(),
            transaction_date: now,
            employee_code: self.resolved_employee_code(header).to_string(),
        })
    }
}

/// Body of `POST /api/VisitDetails`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitDetailPayload {
    pub category: String,
    pub priority: Priority,
    pub shaft: Shaft,
    pub location: Location,
    pub full_comment: String,
    pub image_path: String,
    pub transaction_date: DateTime<Utc>,
    pub employee_code: String,
}

/// Body of `POST /api/VisitHeader`, scalar fields only.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitHeaderPayload {
    pub device_id: String,
    pub visit_date: DateTime<Utc>,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub comment: String,
    pub transaction_date: DateTime<Utc>,
    pub is_sync: bool,
    pub date_sync: DateTime<Utc>,
    pub employee_code: String,
}

/// A visit-detail record as returned by the history endpoint.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRecord {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub shaft: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub full_comment: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    /// `None` when the server sent no timestamp for the record.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub transaction_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub employee_code: Option<String>,
}

/// Accepts RFC 3339 timestamps as well as offset-less ISO timestamps, the latter taken as UTC.
/// `null` reads as absent.
fn lenient_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }

    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(|e| serde::de::Error::custom(format!("invalid transactionDate {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn header(code: &str, details: Vec<VisitDetail>) -> VisitHeader {
        let now = Utc::now();
        VisitHeader {
            id: Uuid::new_v4(),
            employee_code: code.to_string(),
            device_id: "DEV-1-1".to_string(),
            visit_date: now,
            entry_time: now,
            exit_time: now,
            comment: "shift inspection".to_string(),
            is_sync: false,
            date_sync: None,
            visit_details: details,
        }
    }

    fn complete_detail(code: Option<&str>) -> VisitDetail {
        VisitDetail {
            priority: Some(Priority::High),
            shaft: Some(Shaft::CentralShaft),
            location: Some(Location::Nkana),
            ..VisitDetail::blank(code.map(String::from))
        }
    }

    mod enrollment_form {
        use super::*;

        #[test]
        fn reports_every_blank_field() {
            let form = EnrollmentForm {
                employee_code: "E1".to_string(),
                first_name: "  ".to_string(),
                last_name: String::new(),
                designation: String::new(),
            };

            let Err(Error::Validation(errors)) = form.validate() else {
                panic!("expected validation error");
            };
            assert_eq!(errors.fields(), vec!["firstName", "lastName", "designation"]);
        }

        #[test]
        fn trims_values_into_enrollment() {
            let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
            let form = EnrollmentForm {
                employee_code: " E1 ".to_string(),
                first_name: "A ".to_string(),
                last_name: " B".to_string(),
                designation: "Clerk".to_string(),
            };

            assert!(form.validate().is_ok());
            let enrollment = form.into_enrollment(true, now);

            assert_eq!(enrollment.employee_code, "E1");
            assert_eq!(enrollment.first_name, "A");
            assert_eq!(enrollment.last_name, "B");
            assert_eq!(enrollment.date_enrolled, now);
            assert_eq!(enrollment.last_sync, now);
            assert!(enrollment.status);
        }

        #[test]
        fn enrollment_serializes_camel_case() {
            let now = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
            let enrollment = EnrollmentForm {
                employee_code: "E1".to_string(),
                first_name: "A".to_string(),
                last_name: "B".to_string(),
                designation: "Clerk".to_string(),
            }
            .into_enrollment(true, now);

            let json = serde_json::to_value(&enrollment).unwrap();
            assert_eq!(json["employeeCode"], "E1");
            assert_eq!(json["dateEnrolled"], "2024-05-01T08:30:00Z");
            assert_eq!(json["status"], true);
        }
    }

    mod enumerations {
        use super::*;

        #[test]
        fn serialize_as_display_strings() {
            assert_eq!(
                serde_json::to_string(&Shaft::CentralShaft).unwrap(),
                "\"Central Shaft\""
            );
            assert_eq!(serde_json::to_string(&Shaft::Sob).unwrap(), "\"SOB\"");
            assert_eq!(serde_json::to_string(&Priority::Urgent).unwrap(), "\"Urgent\"");
            assert_eq!(Location::Mufulira.to_string(), "Mufulira");
        }

        #[test]
        fn rejects_values_outside_the_set() {
            assert!(serde_json::from_str::<Shaft>("\"Main Shaft\"").is_err());
            assert!(serde_json::from_str::<Location>("\"Kitwe\"").is_err());
        }

        #[test]
        fn deserialize_from_display_strings() {
            assert_eq!(
                serde_json::from_str::<Shaft>("\"MSV\"").unwrap(),
                Shaft::Msv
            );
            assert_eq!(
                serde_json::from_str::<Priority>("\"Low\"").unwrap(),
                Priority::Low
            );
        }
    }

    mod payloads {
        use super::*;

        #[test]
        fn detail_inherits_header_employee_code() {
            let header = header("E7", vec![complete_detail(None), complete_detail(Some(""))]);
            let now = Utc::now();

            for detail in &header.visit_details {
                let payload = detail.to_payload(&header, now).unwrap();
                assert_eq!(payload.employee_code, "E7");
                assert_eq!(payload.transaction_date, now);
            }
        }

        #[test]
        fn detail_keeps_its_own_employee_code() {
            let header = header("E7", vec![complete_detail(Some("E9"))]);
            let payload = header.visit_details[0]
                .to_payload(&header, Utc::now())
                .unwrap();
            assert_eq!(payload.employee_code, "E9");
        }

        #[test]
        fn incomplete_detail_has_no_payload() {
            let header = header("E7", vec![VisitDetail::blank(None)]);
            let Err(Error::Validation(errors)) = header.visit_details[0].to_payload(&header, Utc::now())
            else {
                panic!("expected validation error");
            };
            assert_eq!(errors.fields(), vec!["priority", "shaft", "location"]);
        }

        #[test]
        fn header_payload_is_marked_synced_without_details() {
            let header = header("E7", vec![complete_detail(None)]);
            let now = Utc::now();
            let payload = header.to_payload(now);

            assert!(payload.is_sync);
            assert_eq!(payload.date_sync, now);

            let json = serde_json::to_value(&payload).unwrap();
            assert!(json.get("visitDetails").is_none());
            assert_eq!(json["deviceId"], "DEV-1-1");
            assert_eq!(json["isSync"], true);
        }

        #[test]
        fn header_without_details_is_invalid() {
            let mut errors = ValidationErrors::default();
            header("E7", vec![]).validate(&mut errors);
            assert_eq!(errors.fields(), vec!["visitDetails"]);
        }
    }

    mod visit_record {
        use super::*;

        #[test]
        fn accepts_offsetless_timestamps_as_utc() {
            let record: VisitRecord = serde_json::from_str(
                r#"{"id":12,"category":"Safety","priority":"High","transactionDate":"2024-03-01T10:15:00.123","employeeCode":null}"#,
            )
            .unwrap();

            assert_eq!(
                record.transaction_date,
                Some(
                    Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap()
                        + chrono::Duration::milliseconds(123)
                )
            );
            assert_eq!(record.category.as_deref(), Some("Safety"));
            assert!(record.employee_code.is_none());
        }

        #[test]
        fn accepts_rfc3339_timestamps() {
            let record: VisitRecord =
                serde_json::from_str(r#"{"transactionDate":"2024-03-01T12:00:00+02:00"}"#).unwrap();
            assert_eq!(
                record.transaction_date,
                Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
            );
        }

        #[test]
        fn null_or_missing_timestamp_is_absent() {
            let null: VisitRecord =
                serde_json::from_str(r#"{"category":"b","transactionDate":null}"#).unwrap();
            let missing: VisitRecord = serde_json::from_str(r#"{"category":"c"}"#).unwrap();

            assert!(null.transaction_date.is_none());
            assert!(missing.transaction_date.is_none());
        }

        #[test]
        fn rejects_garbage_timestamps() {
            assert!(serde_json::from_str::<VisitRecord>(r#"{"transactionDate":"yesterday"}"#).is_err());
        }
    }
}
