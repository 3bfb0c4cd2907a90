//! Wire-level constants shared by the pipeline and its adapters

/// Header carrying the per-request idempotency key
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Probe path used to detect whether the newer protocol is served
pub const VERSION_PROBE_PATH: &str = "/api/v1.1.0/version";

/// Environment variable that pins the API version and skips detection
pub const API_VERSION_ENV: &str = "CLOUDCONNEXA_API_VERSION";

/// Resource families served by the remote API
pub const FAMILY_NETWORKS: &str = "networks";
pub const FAMILY_USERS: &str = "users";
pub const FAMILY_USER_GROUPS: &str = "user-groups";
pub const FAMILY_DNS_RECORDS: &str = "dns-records";
pub const FAMILY_IP_SERVICES: &str = "ip-services";
pub const FAMILY_ROUTES: &str = "routes";

/// Metadata fields ignored when diffing local and remote resource snapshots
pub const METADATA_FIELDS: &[&str] = &["id", "created_at", "updated_at", "version", "status"];

/// Field holding a resource's last-modified timestamp
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// Field holding a resource's revision counter, when the server provides one
pub const VERSION_FIELD: &str = "version";
