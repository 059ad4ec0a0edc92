// Secrets resolution on dispatch.
//
// Submission-time validation (every referenced path must resolve) lives in
// `dispatch::submit_job`. This module handles the second, separate moment:
// when an agent pops the job, each referenced path is resolved again and
// substituted inline. A path that fails to resolve at pop time becomes the
// empty string rather than failing the pop, matching CI-platform convention
// (the job still runs; a missing secret surfaces as an empty credential the
// phase script will itself reject).

use crate::domain::Job;
use crate::port::SecretsStore;
use std::sync::Arc;

/// Resolve every path under `test_data.secrets` against `store`, in place.
/// No-op if the job has no secrets section or no owning client.
pub async fn resolve_secrets_for_dispatch(job: &mut Job, store: &Arc<dyn SecretsStore>) {
    let Some(client_id) = job.client_id.clone() else {
        return;
    };
    let Some(test_data) = job.spec.test_data.as_mut() else {
        return;
    };
    let Some(secrets) = test_data.get_mut("secrets").and_then(|s| s.as_object_mut()) else {
        return;
    };

    let paths: Vec<(String, String)> = secrets
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|p| (k.clone(), p.to_string())))
        .collect();

    for (key, path) in paths {
        let resolved = store.read(&client_id, &path).await.unwrap_or_default();
        secrets.insert(key, serde_json::Value::String(resolved));
    }
}
