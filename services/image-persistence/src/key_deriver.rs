use uuid::Uuid;

/// Storage identity of one persisted image
///
/// Format: `{attribution}-{uuid_simple}.{extension}`. The configured object
/// key prefix is not part of the identity and is applied at upload time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObjectIdentity {
    /// Sanitized attribution the key starts with
    pub attribution: String,
    /// Random part plus extension, also written as the object's title
    pub object_name: String,
    /// `{attribution}-{object_name}`
    pub key: String,
}

impl StorageObjectIdentity {
    /// Full object key under the given prefix
    pub fn prefixed_key(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.key)
    }
}

/// Derive a fresh storage identity for an image attributed to `attribution`
pub fn derive_key(attribution: &str, extension: &str) -> StorageObjectIdentity {
    let attribution = sanitize_path_component(attribution);
    let object_name = format!("{}.{}", Uuid::new_v4().simple(), extension);
    let key = format!("{}-{}", attribution, object_name);

    StorageObjectIdentity {
        attribution,
        object_name,
        key,
    }
}

/// Sanitize a path component to prevent path traversal
fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}
