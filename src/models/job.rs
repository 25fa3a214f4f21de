use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{CoordinatorError, FieldErrors, Result};
use crate::models::config::SubmissionLimits;
use crate::models::progress::ProgressState;

/// Sorter buffer size used when a submission leaves it out.
pub const DEFAULT_SORTER_IN_MEMORY_RECORDS: u32 = 10_000;

/// Registry-issued job handle. Never reused, even after deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self> {
        s.trim().parse::<u64>().map(JobId).map_err(|_| {
            CoordinatorError::invalid("id", format!("'{}' is not a non-negative integer", s))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageKind {
    Local,
    Ceph,
    S3,
    YandexCloud,
}

impl StorageKind {
    /// Derive the storage kind from a connection string's scheme prefix.
    ///
    /// `local` (bare or as `local:...`) is local storage; `s3:`, `ceph:`/`minio:`
    /// and `yandex_cloud:`/`yandex:` select the remote kinds.
    pub fn from_connection_string(conn: &str) -> Option<Self> {
        let trimmed = conn.trim();
        let scheme = match trimmed.split_once(':') {
            Some((scheme, _)) => scheme,
            None => trimmed,
        };
        match scheme.to_ascii_lowercase().as_str() {
            "local" => Some(StorageKind::Local),
            "s3" => Some(StorageKind::S3),
            "ceph" | "minio" => Some(StorageKind::Ceph),
            "yandex_cloud" | "yandex" => Some(StorageKind::YandexCloud),
            _ => None,
        }
    }
}

/// Submission body as sent by consoles. Every field is optional here so a
/// missing one is reported by name instead of as a decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadJobRequest {
    /// Ignored: ids are always assigned by the registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<u64>,
    #[serde(default, alias = "jobName")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_path: Option<String>,
    #[serde(default)]
    pub job_storage_connection_string: Option<String>,
    #[serde(default)]
    pub data_storage_connection_string: Option<String>,
    #[serde(default)]
    pub inputs_path: Option<String>,
    #[serde(default)]
    pub mappers_outputs_path: Option<String>,
    #[serde(default)]
    pub reducers_outputs_path: Option<String>,
    #[serde(default)]
    pub mappers_count: Option<i64>,
    #[serde(default)]
    pub reducers_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sorter_in_memory_records: Option<i64>,
}

impl UploadJobRequest {
    /// Check every field in declaration order and collect all failures.
    pub fn validate(self, limits: &SubmissionLimits) -> Result<NewJob> {
        let mut errors = FieldErrors::default();

        let name = check_name(self.name, limits, &mut errors);
        let job_storage = check_connection(
            "jobStorageConnectionString",
            self.job_storage_connection_string,
            &mut errors,
        );
        let data_storage = check_connection(
            "dataStorageConnectionString",
            self.data_storage_connection_string,
            &mut errors,
        );
        let inputs_path = check_path("inputsPath", self.inputs_path, &mut errors);
        let mappers_outputs_path =
            check_path("mappersOutputsPath", self.mappers_outputs_path, &mut errors);
        let reducers_outputs_path =
            check_path("reducersOutputsPath", self.reducers_outputs_path, &mut errors);
        let mappers_count = check_count("mappersCount", self.mappers_count, 1, &mut errors);
        let reducers_count = check_count("reducersCount", self.reducers_count, 1, &mut errors);
        let sorter_in_memory_records = check_count(
            "sorterInMemoryRecords",
            Some(
                self.sorter_in_memory_records
                    .unwrap_or(i64::from(DEFAULT_SORTER_IN_MEMORY_RECORDS)),
            ),
            limits.min_sorter_in_memory_records,
            &mut errors,
        );

        errors.into_result()?;

        // Every value is Some once no field was rejected.
        match (
            name,
            job_storage,
            data_storage,
            inputs_path,
            mappers_outputs_path,
            reducers_outputs_path,
            mappers_count,
            reducers_count,
            sorter_in_memory_records,
        ) {
            (
                Some(name),
                Some(job_storage_connection_string),
                Some(data_storage_connection_string),
                Some(inputs_path),
                Some(mappers_outputs_path),
                Some(reducers_outputs_path),
                Some(mappers_count),
                Some(reducers_count),
                Some(sorter_in_memory_records),
            ) => Ok(NewJob {
                name,
                job_path: self.job_path.filter(|p| !p.trim().is_empty()),
                job_storage_connection_string,
                data_storage_connection_string,
                inputs_path,
                mappers_outputs_path,
                reducers_outputs_path,
                mappers_count,
                reducers_count,
                sorter_in_memory_records,
            }),
            _ => Err(CoordinatorError::Fatal(
                "submission validated but a field is missing".to_string(),
            )),
        }
    }
}

fn check_name(
    value: Option<String>,
    limits: &SubmissionLimits,
    errors: &mut FieldErrors,
) -> Option<String> {
    let Some(raw) = value else {
        errors.push("name", "is required");
        return None;
    };
    let name = raw.trim().to_string();
    if name.is_empty() {
        errors.push("name", "cannot be empty");
        return None;
    }
    let len = name.chars().count();
    if len > limits.max_job_name_len {
        errors.push(
            "name",
            format!(
                "must be at most {} characters (got {})",
                limits.max_job_name_len, len
            ),
        );
        return None;
    }
    Some(name)
}

fn check_connection(
    field: &str,
    value: Option<String>,
    errors: &mut FieldErrors,
) -> Option<String> {
    let conn = check_path(field, value, errors)?;
    if StorageKind::from_connection_string(&conn).is_none() {
        errors.push(
            field,
            format!(
                "unknown storage scheme in '{}' (expected local, s3:, ceph:, yandex_cloud:)",
                conn
            ),
        );
        return None;
    }
    Some(conn)
}

fn check_path(field: &str, value: Option<String>, errors: &mut FieldErrors) -> Option<String> {
    match value {
        None => {
            errors.push(field, "is required");
            None
        }
        Some(v) if v.trim().is_empty() => {
            errors.push(field, "cannot be empty");
            None
        }
        Some(v) => Some(v.trim().to_string()),
    }
}

fn check_count(field: &str, value: Option<i64>, min: u32, errors: &mut FieldErrors) -> Option<u32> {
    let Some(v) = value else {
        errors.push(field, "is required");
        return None;
    };
    if v < i64::from(min) {
        errors.push(field, format!("must be at least {} (got {})", min, v));
        return None;
    }
    match u32::try_from(v) {
        Ok(v) => Some(v),
        Err(_) => {
            errors.push(field, format!("must be at most {} (got {})", u32::MAX, v));
            None
        }
    }
}

/// A validated submission, ready for the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub name: String,
    pub job_path: Option<String>,
    pub job_storage_connection_string: String,
    pub data_storage_connection_string: String,
    pub inputs_path: String,
    pub mappers_outputs_path: String,
    pub reducers_outputs_path: String,
    pub mappers_count: u32,
    pub reducers_count: u32,
    pub sorter_in_memory_records: u32,
}

impl NewJob {
    /// Re-check the record invariants. Stores call this before issuing an id.
    pub fn check(&self, limits: &SubmissionLimits) -> Result<()> {
        let mut errors = FieldErrors::default();
        if self.name.trim().is_empty() {
            errors.push("name", "cannot be empty");
        } else if self.name.chars().count() > limits.max_job_name_len {
            errors.push(
                "name",
                format!("must be at most {} characters", limits.max_job_name_len),
            );
        }
        if StorageKind::from_connection_string(&self.job_storage_connection_string).is_none() {
            errors.push("jobStorageConnectionString", "unknown storage scheme");
        }
        if StorageKind::from_connection_string(&self.data_storage_connection_string).is_none() {
            errors.push("dataStorageConnectionString", "unknown storage scheme");
        }
        if self.mappers_count < 1 {
            errors.push("mappersCount", "must be at least 1");
        }
        if self.reducers_count < 1 {
            errors.push("reducersCount", "must be at least 1");
        }
        if self.sorter_in_memory_records < limits.min_sorter_in_memory_records {
            errors.push(
                "sorterInMemoryRecords",
                format!("must be at least {}", limits.min_sorter_in_memory_records),
            );
        }
        errors.into_result()
    }

    pub fn into_record(self, id: JobId, created_at: DateTime<Utc>) -> JobRecord {
        JobRecord {
            id,
            name: self.name,
            job_path: self.job_path,
            job_storage_connection_string: self.job_storage_connection_string,
            data_storage_connection_string: self.data_storage_connection_string,
            inputs_path: self.inputs_path,
            mappers_outputs_path: self.mappers_outputs_path,
            reducers_outputs_path: self.reducers_outputs_path,
            mappers_count: self.mappers_count,
            reducers_count: self.reducers_count,
            sorter_in_memory_records: self.sorter_in_memory_records,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_path: Option<String>,
    pub job_storage_connection_string: String,
    pub data_storage_connection_string: String,
    pub inputs_path: String,
    pub mappers_outputs_path: String,
    pub reducers_outputs_path: String,
    pub mappers_count: u32,
    pub reducers_count: u32,
    pub sorter_in_memory_records: u32,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            name: self.name.clone(),
            submission_time: self.created_at,
        }
    }

    pub fn total_tasks(&self) -> u32 {
        self.mappers_count.saturating_add(self.reducers_count)
    }
}

/// Row of `GET /jobs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: JobId,
    pub name: String,
    pub submission_time: DateTime<Utc>,
}

/// Body of `GET /jobs/{id}`: the record plus derived storage kinds and live progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    #[serde(flatten)]
    pub record: JobRecord,
    pub job_storage_type: StorageKind,
    pub data_storage_type: StorageKind,
    pub progress_info: ProgressState,
}

impl JobInfo {
    pub fn new(record: JobRecord, progress_info: ProgressState) -> Self {
        let job_storage_type =
            StorageKind::from_connection_string(&record.job_storage_connection_string)
                .unwrap_or(StorageKind::Local);
        let data_storage_type =
            StorageKind::from_connection_string(&record.data_storage_connection_string)
                .unwrap_or(StorageKind::Local);
        Self {
            record,
            job_storage_type,
            data_storage_type,
            progress_info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_request(name: &str, mappers: i64, reducers: i64) -> UploadJobRequest {
        UploadJobRequest {
            name: Some(name.to_string()),
            job_storage_connection_string: Some("local".to_string()),
            data_storage_connection_string: Some("S3: http://minio:9000".to_string()),
            inputs_path: Some("/in".to_string()),
            mappers_outputs_path: Some("/tmp/map".to_string()),
            reducers_outputs_path: Some("/out".to_string()),
            mappers_count: Some(mappers),
            reducers_count: Some(reducers),
            ..Default::default()
        }
    }

    fn field_errors(err: CoordinatorError) -> FieldErrors {
        match err {
            CoordinatorError::Validation(errors) => errors,
            other => panic!("Expected Validation, got: {:?}", other),
        }
    }

    #[test]
    fn test_valid_request_produces_new_job() {
        let job = make_request("wc", 2, 1)
            .validate(&SubmissionLimits::default())
            .expect("valid");
        assert_eq!(job.name, "wc");
        assert_eq!(job.mappers_count, 2);
        assert_eq!(job.reducers_count, 1);
        assert_eq!(job.sorter_in_memory_records, DEFAULT_SORTER_IN_MEMORY_RECORDS);
        assert!(job.job_path.is_none());
    }

    #[test]
    fn test_zero_mappers_rejected_naming_field() {
        let err = make_request("wc", 0, 1)
            .validate(&SubmissionLimits::default())
            .unwrap_err();
        let errors = field_errors(err);
        assert_eq!(errors.first_field(), Some("mappersCount"));
    }

    #[test]
    fn test_all_failures_reported_in_declaration_order() {
        let request = UploadJobRequest {
            mappers_count: Some(0),
            reducers_count: Some(-3),
            ..Default::default()
        };
        let errors = field_errors(request.validate(&SubmissionLimits::default()).unwrap_err());
        let fields: Vec<&str> = errors.0.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "name",
                "jobStorageConnectionString",
                "dataStorageConnectionString",
                "inputsPath",
                "mappersOutputsPath",
                "reducersOutputsPath",
                "mappersCount",
                "reducersCount",
            ]
        );
    }

    #[test]
    fn test_name_length_bounded() {
        let long = "x".repeat(41);
        let errors = field_errors(
            make_request(&long, 1, 1)
                .validate(&SubmissionLimits::default())
                .unwrap_err(),
        );
        assert!(errors.contains("name"));
    }

    #[test]
    fn test_blank_name_rejected() {
        let errors = field_errors(
            make_request("   ", 1, 1)
                .validate(&SubmissionLimits::default())
                .unwrap_err(),
        );
        assert!(errors.contains("name"));
    }

    #[test]
    fn test_sorter_below_minimum_rejected() {
        let mut request = make_request("wc", 1, 1);
        request.sorter_in_memory_records = Some(9_999);
        let errors = field_errors(request.validate(&SubmissionLimits::default()).unwrap_err());
        assert_eq!(errors.first_field(), Some("sorterInMemoryRecords"));
    }

    #[test]
    fn test_unknown_storage_scheme_rejected() {
        let mut request = make_request("wc", 1, 1);
        request.job_storage_connection_string = Some("ftp://host".to_string());
        let errors = field_errors(request.validate(&SubmissionLimits::default()).unwrap_err());
        assert_eq!(errors.first_field(), Some("jobStorageConnectionString"));
    }

    #[test]
    fn test_job_name_alias_accepted() {
        let json = r#"{"jobName":"wc","jobStorageConnectionString":"local",
            "dataStorageConnectionString":"local","inputsPath":"/in",
            "mappersOutputsPath":"/m","reducersOutputsPath":"/r",
            "mappersCount":1,"reducersCount":1,"jobId":42}"#;
        let request: UploadJobRequest = serde_json::from_str(json).expect("deserialize");
        assert_eq!(request.name.as_deref(), Some("wc"));
        assert_eq!(request.job_id, Some(42));
        assert!(request.validate(&SubmissionLimits::default()).is_ok());
    }

    #[test]
    fn test_storage_kind_parsing() {
        assert_eq!(StorageKind::from_connection_string("local"), Some(StorageKind::Local));
        assert_eq!(StorageKind::from_connection_string("LOCAL"), Some(StorageKind::Local));
        assert_eq!(
            StorageKind::from_connection_string("S3: http://s3.local"),
            Some(StorageKind::S3)
        );
        assert_eq!(
            StorageKind::from_connection_string("MINIO: http://minio:9000"),
            Some(StorageKind::Ceph)
        );
        assert_eq!(
            StorageKind::from_connection_string("yandex_cloud:bucket"),
            Some(StorageKind::YandexCloud)
        );
        assert_eq!(StorageKind::from_connection_string("gcs:bucket"), None);
    }

    #[test]
    fn test_storage_kind_serializes_screaming_case() {
        let json = serde_json::to_string(&StorageKind::YandexCloud).expect("serialize");
        assert_eq!(json, "\"YANDEX_CLOUD\"");
    }

    #[test]
    fn test_job_id_parse() {
        assert_eq!("17".parse::<JobId>().expect("parse"), JobId(17));
        assert!("-1".parse::<JobId>().is_err());
        assert!("abc".parse::<JobId>().is_err());
    }

    #[test]
    fn test_new_job_check_rejects_zero_reducers() {
        let mut job = make_request("wc", 1, 1)
            .validate(&SubmissionLimits::default())
            .expect("valid");
        job.reducers_count = 0;
        let errors = field_errors(job.check(&SubmissionLimits::default()).unwrap_err());
        assert_eq!(errors.first_field(), Some("reducersCount"));
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let job = make_request("wc", 2, 1)
            .validate(&SubmissionLimits::default())
            .expect("valid");
        let record = job.into_record(JobId(3), Utc::now());
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["id"], 3);
        assert_eq!(json["mappersCount"], 2);
        assert!(json["createdAt"].is_string());
        assert!(json.get("jobPath").is_none());
        assert_eq!(record.total_tasks(), 3);
    }
}
