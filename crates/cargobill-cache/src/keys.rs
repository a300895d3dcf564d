//! Cache key layout. Every key written by this application starts with
//! [`NAMESPACE`]; anything else in the cache belongs to someone else.

pub const NAMESPACE: &str = "cargobill:";
pub const DATASET_PREFIX: &str = "cargobill:dataset:";
pub const FILE_PREFIX: &str = "cargobill:file:";
pub const UPLOAD_SESSION_PREFIX: &str = "cargobill:upload_session:";
pub const COLUMN_MAPPING_PREFIX: &str = "cargobill:column_mapping:";

pub fn dataset_key(id: &str) -> String {
    format!("{DATASET_PREFIX}{id}")
}

pub fn file_key(name: &str) -> String {
    format!("{FILE_PREFIX}{name}")
}

pub fn upload_session_key(id: &str) -> String {
    format!("{UPLOAD_SESSION_PREFIX}{id}")
}

pub fn column_mapping_key(name: &str) -> String {
    format!("{COLUMN_MAPPING_PREFIX}{name}")
}

pub fn is_namespaced(key: &str) -> bool {
    key.starts_with(NAMESPACE)
}
