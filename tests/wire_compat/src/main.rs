fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use stevedore_protocol::*;

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Normalizes JSON values so that integer-valued floats compare equal.
    ///
    /// Browser clients send `50` where Rust serializes `50.0`.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => serde_json::json!(f),
                None => v.clone(),
            },
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect(),
            ),
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values.
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  Rust:    {reserialized}"
        );
        parsed
    }

    // --- Requests ---

    #[test]
    fn fixture_transfer_request() {
        let req = roundtrip_test::<TransferRequest>("transfer_request.json");
        assert_eq!(req.source.kind, EndpointType::S3);
        assert_eq!(req.items[1].kind, ItemKind::Directory);
        assert_eq!(req.conflict_resolution, ConflictResolution::Rename);
    }

    #[test]
    fn fixture_check_conflicts_request() {
        roundtrip_test::<CheckConflictsRequest>("check_conflicts_request.json");
    }

    #[test]
    fn fixture_huggingface_import_request() {
        let req = roundtrip_test::<HuggingFaceImportRequest>("huggingface_import_request.json");
        assert_eq!(req.revision.as_deref(), Some("v1.2"));
        assert_eq!(req.files.len(), 2);
    }

    #[test]
    fn fixture_ticket_request() {
        let req = roundtrip_test::<TicketRequest>("ticket_request.json");
        assert_eq!(req.resource_type, ResourceType::Upload);
    }

    // --- Responses ---

    #[test]
    fn fixture_check_conflicts_response() {
        roundtrip_test::<CheckConflictsResponse>("check_conflicts_response.json");
    }

    #[test]
    fn fixture_transfer_started() {
        roundtrip_test::<TransferStarted>("transfer_started.json");
    }

    #[test]
    fn fixture_job_files_response() {
        let resp = roundtrip_test::<JobFilesResponse>("job_files_response.json");
        assert_eq!(resp.status, JobStatus::Failed);
        assert_eq!(resp.files[1].error.as_deref(), Some("access denied"));
    }

    #[test]
    fn fixture_cancel_response() {
        roundtrip_test::<CancelResponse>("cancel_response.json");
    }

    #[test]
    fn fixture_cleanup_response() {
        roundtrip_test::<CleanupResponse>("cleanup_response.json");
    }

    #[test]
    fn fixture_ticket_response() {
        let resp = roundtrip_test::<TicketResponse>("ticket_response.json");
        assert_eq!(resp.expires_in, 30);
        assert!(resp.sse_url.ends_with(&resp.ticket));
    }

    #[test]
    fn fixture_locations() {
        roundtrip_test::<Vec<LocationInfo>>("locations.json");
    }

    #[test]
    fn fixture_objects() {
        let objects = roundtrip_test::<Vec<ObjectInfo>>("objects.json");
        assert!(!objects[0].is_dir_marker);
        assert!(objects[1].is_dir_marker);
    }

    #[test]
    fn fixture_upload_response() {
        roundtrip_test::<UploadResponse>("upload_response.json");
    }

    #[test]
    fn fixture_error_response() {
        roundtrip_test::<ErrorResponse>("error_response.json");
    }

    // --- Progress stream ---

    #[test]
    fn fixture_progress_event() {
        let event = roundtrip_test::<ProgressEvent>("progress_event.json");
        assert_eq!(event.status, JobStatus::Running);
        assert_eq!(event.files[2].total, None);
        assert_eq!(event.files[3].status, TaskStatus::Failed);
    }

    #[test]
    fn progress_event_keeps_null_total() {
        let event = ProgressEvent {
            job_id: "j".into(),
            status: JobStatus::Queued,
            progress: 0.0,
            files: vec![FileProgress {
                file: "a".into(),
                loaded: 0,
                total: None,
                status: TaskStatus::Pending,
                error: None,
            }],
        };
        let v = serde_json::to_value(&event).unwrap();
        assert!(v["files"][0]["total"].is_null());
        assert!(v["files"][0].get("error").is_none());
    }

    // --- Compatibility aliases ---

    #[test]
    fn legacy_endpoint_names_are_accepted() {
        let json = r#"{
            "source": {"type": "filesystem", "locationId": "scratch"},
            "destination": {"type": "object", "locationId": "archive", "path": "x"},
            "items": [{"path": "a.txt", "type": "file"}]
        }"#;
        let req: TransferRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.source.kind, EndpointType::Local);
        assert_eq!(req.source.path, "");
        assert_eq!(req.destination.kind, EndpointType::S3);
        assert_eq!(req.conflict_resolution, ConflictResolution::Overwrite);

        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["source"]["type"], "local");
        assert_eq!(v["destination"]["type"], "s3");
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let json = r#"{
            "source": {"type": "local", "locationId": "a"},
            "destination": {"type": "local", "locationId": "b"},
            "items": [],
            "conflictResolution": "merge"
        }"#;
        assert!(serde_json::from_str::<TransferRequest>(json).is_err());
    }
}
