use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Data-package license entry, following the frictionless-data shape.
///
/// `name` must be an Open Definition license id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPackageLicense {
    pub name: String,
    pub path: String,
    pub title: String,
}

impl DataPackageLicense {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            title: title.into(),
        }
    }
}

/// Upstream source attribution for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPackageSource {
    pub title: String,
    pub path: String,
}

/// One successfully packaged dataset-version: a resource entry for the
/// boundary's datapackage document and for the job result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPackageResource {
    pub name: String,
    pub version: String,
    /// Final URIs of the output data on the storage backend.
    pub path: Vec<String>,
    pub description: String,
    #[serde(rename = "format")]
    pub dataset_format: String,
    #[serde(rename = "bytes")]
    pub dataset_size_bytes: u64,
    #[serde(rename = "hashes")]
    pub dataset_hashes: Vec<String>,
    pub sources: Vec<DataPackageSource>,
    pub license: DataPackageLicense,
}

impl DataPackageResource {
    /// Identity used for dedupe within a datapackage document.
    pub fn name_version(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

/// Seed datapackage document written during boundary setup.
pub fn empty_datapackage(boundary_name: &str) -> Value {
    json!({
        "name": boundary_name,
        "title": boundary_name,
        "licenses": [],
        "resources": [],
    })
}

/// Merges a resource into the document's `resources` array, deduplicating by
/// name-version, and folds its license into `licenses`, deduplicating by
/// license name. Returns whether the resource was appended.
pub fn add_resource(datapackage: &mut Value, resource: &DataPackageResource) -> bool {
    let resources = ensure_array(datapackage, "resources");
    let exists = resources.iter().any(|entry| {
        entry.get("name").and_then(Value::as_str) == Some(resource.name.as_str())
            && entry.get("version").and_then(Value::as_str) == Some(resource.version.as_str())
    });

    let mut appended = false;
    if !exists {
        if let Ok(entry) = serde_json::to_value(resource) {
            resources.push(entry);
            appended = true;
        }
    }

    add_license(datapackage, &resource.license);
    appended
}

fn add_license(datapackage: &mut Value, license: &DataPackageLicense) {
    let licenses = ensure_array(datapackage, "licenses");
    let exists = licenses
        .iter()
        .any(|entry| entry.get("name").and_then(Value::as_str) == Some(license.name.as_str()));
    if !exists {
        if let Ok(entry) = serde_json::to_value(license) {
            licenses.push(entry);
        }
    }
}

fn ensure_array<'a>(document: &'a mut Value, key: &str) -> &'a mut Vec<Value> {
    if !document.is_object() {
        *document = json!({});
    }
    let object = document.as_object_mut().expect("document is an object");
    object
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    match object.get_mut(key) {
        Some(Value::Array(array)) => array,
        Some(other) => {
            *other = Value::Array(Vec::new());
            other.as_array_mut().expect("value replaced with array")
        }
        None => unreachable!("entry inserted above"),
    }
}
