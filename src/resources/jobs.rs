//! Job and CronJob generation for collection snapshots and restores.
//!
//! Both talk to the database REST API with curl from a small utility image.
//! The snapshot CronJob creates a snapshot then prunes the oldest beyond the
//! retention count. The restore Job asks the database to recover a
//! collection from a snapshot location.

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, Job, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{HTTP_PORT, QdrantCluster, QdrantCollection, QdrantRestore, SnapshotScheduleSpec};
use crate::resources::common::{
    API_KEY_SECRET_KEY, MANAGED_BY, api_key_secret_name, client_service_name, owner_reference,
    standard_labels,
};

/// Attempts Kubernetes makes before marking a restore Job failed
const RESTORE_BACKOFF_LIMIT: i32 = 3;
/// Seconds a finished Job lingers so its status can still be read
const JOB_TTL_AFTER_FINISHED: i32 = 3600;

pub fn snapshot_cronjob_name(collection: &QdrantCollection) -> String {
    format!("{}-snapshots", collection.name_any())
}

pub fn restore_job_name(restore: &QdrantRestore) -> String {
    format!("{}-restore", restore.name_any())
}

fn database_url(cluster_name: &str, namespace: &str) -> String {
    format!("http://{cluster_name}.{namespace}.svc.cluster.local:{HTTP_PORT}")
}

/// Environment shared by every job container: base URL plus the optional key.
fn job_env(base_url: String, api_key_secret: Option<String>) -> Vec<EnvVar> {
    let mut env = vec![EnvVar {
        name: "QDRANT_URL".to_string(),
        value: Some(base_url),
        ..Default::default()
    }];
    if let Some(secret) = api_key_secret {
        env.push(EnvVar {
            name: "QDRANT_API_KEY".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret,
                    key: API_KEY_SECRET_KEY.to_string(),
                    // A cluster without an API key still works
                    optional: Some(true),
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    env
}

fn job_pod_template(image: &str, script: String, env: Vec<EnvVar>) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name: "qdrant-job".to_string(),
                image: Some(image.to_string()),
                command: Some(vec!["/bin/sh".to_string(), "-ec".to_string()]),
                args: Some(vec![script]),
                env: Some(env),
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

const CURL: &str = "curl -fsS -H \"api-key: ${QDRANT_API_KEY:-}\"";

/// Shell script that snapshots `collection` and keeps the newest `retention`.
/// Snapshot names embed their creation time, so a reverse sort is newest first.
pub fn snapshot_script(collection: &str, retention: i32) -> String {
    format!(
        "{CURL} -X POST \"$QDRANT_URL/collections/{collection}/snapshots?wait=true\"\n\
         {CURL} \"$QDRANT_URL/collections/{collection}/snapshots\" \
         | grep -o '\"name\":\"[^\"]*\"' | cut -d'\"' -f4 | sort -r | tail -n +{keep} \
         | while read -r snapshot; do \
         {CURL} -X DELETE \"$QDRANT_URL/collections/{collection}/snapshots/$snapshot\"; done",
        keep = retention.max(1) + 1,
    )
}

/// Shell script that recovers `collection` from `location`.
pub fn restore_script(collection: &str, location: &str, priority: Option<&str>) -> String {
    let body = serde_json::json!({
        "location": location,
        "priority": priority.unwrap_or("snapshot"),
    });
    format!(
        "{CURL} -X PUT -H 'Content-Type: application/json' \
         \"$QDRANT_URL/collections/{collection}/snapshots/recover?wait=true\" \
         -d '{body}'"
    )
}

/// Generate the periodic snapshot CronJob for a collection.
pub fn generate_snapshot_cronjob(
    collection: &QdrantCollection,
    cluster: &QdrantCluster,
    schedule: &SnapshotScheduleSpec,
    image: &str,
) -> CronJob {
    let namespace = collection.namespace().unwrap_or_default();
    let api_key_secret = cluster
        .spec
        .api_key
        .enabled
        .then(|| api_key_secret_name(cluster));
    let env = job_env(
        database_url(&client_service_name(cluster), &namespace),
        api_key_secret,
    );
    let script = snapshot_script(&collection.name_any(), schedule.retention);

    CronJob {
        metadata: ObjectMeta {
            name: Some(snapshot_cronjob_name(collection)),
            namespace: collection.namespace(),
            labels: Some(standard_labels(cluster)),
            owner_references: Some(vec![owner_reference(collection)]),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule: schedule.schedule.clone(),
            concurrency_policy: Some("Forbid".to_string()),
            successful_jobs_history_limit: Some(1),
            failed_jobs_history_limit: Some(3),
            job_template: JobTemplateSpec {
                metadata: None,
                spec: Some(JobSpec {
                    backoff_limit: Some(1),
                    template: job_pod_template(image, script, env),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the one-shot restore Job for a QdrantRestore.
pub fn generate_restore_job(restore: &QdrantRestore, image: &str) -> Job {
    let spec = &restore.spec;
    let namespace = restore.namespace().unwrap_or_default();

    // The cluster may not be readable here, so the key is referenced
    // optionally by its conventional name.
    let env = job_env(
        database_url(&spec.cluster_ref, &namespace),
        Some(format!("{}-api-key", spec.cluster_ref)),
    );
    let script = restore_script(
        &spec.collection,
        &spec.snapshot_location,
        spec.priority.as_deref(),
    );

    let mut labels = std::collections::BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/instance".to_string(),
        spec.cluster_ref.clone(),
    );
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        "restore".to_string(),
    );

    Job {
        metadata: ObjectMeta {
            name: Some(restore_job_name(restore)),
            namespace: restore.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(restore)]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(RESTORE_BACKOFF_LIMIT),
            ttl_seconds_after_finished: Some(JOB_TTL_AFTER_FINISHED),
            template: job_pod_template(image, script, env),
            ..Default::default()
        }),
        ..Default::default()
    }
}
