// Job invocation descriptors and the catalog of methods they can point at
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

type Result<T, E = crate::Error> = anyhow::Result<T, E>;

/// A job method that can be loaded by the processing side.
/// Register one with `inventory::submit!` so the rocket stage picks it up,
/// or build a `JobCatalog` by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobMethod {
    pub type_name: &'static str,
    pub method: &'static str,
    pub parameter_types: &'static [&'static str],
}

impl JobMethod {
    pub const fn new(
        type_name: &'static str,
        method: &'static str,
        parameter_types: &'static [&'static str],
    ) -> Self {
        Self {
            type_name,
            method,
            parameter_types,
        }
    }
}

inventory::collect!(JobMethod);

// Why a descriptor could not be resolved. Never escapes `decode_job`.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub(crate) enum JobLoadError {
    #[error("job has no invocation data")]
    MissingInvocationData,
    #[error("type {0:?} could not be loaded")]
    UnknownType(String),
    #[error("method {1:?} with parameters {2:?} not found on type {0:?}")]
    UnknownMethod(String, String, Vec<String>),
    #[error("method expects {0} arguments but {1} were stored")]
    ArgumentCountMismatch(usize, usize),
}

/// Methods known to be loadable, keyed by type then method name
#[derive(Debug, Default, Clone)]
pub struct JobCatalog {
    methods: HashMap<String, HashMap<String, Vec<JobMethod>>>,
}

impl JobCatalog {
    pub fn new(methods: impl IntoIterator<Item = JobMethod>) -> Self {
        let mut catalog = Self::default();
        for method in methods {
            catalog.register(method);
        }
        catalog
    }

    // Everything registered through `inventory::submit!`
    pub fn from_inventory() -> Self {
        Self::new(inventory::iter::<JobMethod>.into_iter().copied())
    }

    pub fn register(&mut self, method: JobMethod) {
        self.methods
            .entry(method.type_name.to_owned())
            .or_default()
            .entry(method.method.to_owned())
            .or_default()
            .push(method);
    }

    pub fn len(&self) -> usize {
        self.methods
            .values()
            .flat_map(HashMap::values)
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resolve(
        &self,
        type_name: &str,
        method: &str,
        parameter_types: &[String],
    ) -> Result<&JobMethod, JobLoadError> {
        let overloads = self
            .methods
            .get(type_name)
            .ok_or_else(|| JobLoadError::UnknownType(type_name.to_owned()))?
            .get(method);
        overloads
            .and_then(|overloads| {
                overloads
                    .iter()
                    .find(|candidate| candidate.parameter_types == parameter_types)
            })
            .ok_or_else(|| {
                JobLoadError::UnknownMethod(
                    type_name.to_owned(),
                    method.to_owned(),
                    parameter_types.to_vec(),
                )
            })
    }
}

// Serialized form of the descriptor. Parameter types are a JSON array stored as a string.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InvocationData {
    #[serde(rename = "Type")]
    type_name: String,
    method: String,
    #[serde(default)]
    parameter_types: Option<String>,
}

/// A job description that resolved against the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub type_name: String,
    pub method: String,
    pub parameter_types: Vec<String>,
    // Each argument in its serialized form
    pub arguments: Vec<String>,
}

impl Job {
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.type_name, self.method)
    }
}

fn decode_string_array(blob: Option<&str>) -> Result<Vec<String>> {
    match blob.filter(|blob| !blob.trim().is_empty()) {
        Some(blob) => Ok(serde_json::from_str::<Option<Vec<String>>>(blob)?.unwrap_or_default()),
        None => Ok(vec![]),
    }
}

fn load_job(
    catalog: &JobCatalog,
    invocation_data: Option<&str>,
    arguments: Option<&str>,
) -> Result<Result<Job, JobLoadError>> {
    let Some(invocation_data) = invocation_data.filter(|data| !data.trim().is_empty()) else {
        return Ok(Err(JobLoadError::MissingInvocationData));
    };
    let invocation: InvocationData = serde_json::from_str(invocation_data)?;
    let parameter_types = decode_string_array(invocation.parameter_types.as_deref())?;
    let arguments = decode_string_array(arguments)?;
    if let Err(e) = catalog.resolve(&invocation.type_name, &invocation.method, &parameter_types)
    {
        return Ok(Err(e));
    }
    if arguments.len() != parameter_types.len() {
        return Ok(Err(JobLoadError::ArgumentCountMismatch(
            parameter_types.len(),
            arguments.len(),
        )));
    }
    Ok(Ok(Job {
        type_name: invocation.type_name,
        method: invocation.method,
        parameter_types,
        arguments,
    }))
}

/// Decodes a stored descriptor and its arguments.
/// A descriptor that cannot be loaded gives `Ok(None)` so the caller can show a
/// placeholder; a descriptor that cannot be parsed at all is an error.
pub fn decode_job(
    catalog: &JobCatalog,
    invocation_data: Option<&str>,
    arguments: Option<&str>,
) -> Result<Option<Job>> {
    match load_job(catalog, invocation_data, arguments)? {
        Ok(job) => Ok(Some(job)),
        Err(e) => {
            tracing::debug!("could not load job: {e}");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    inventory::submit! {
        JobMethod::new("Inventory.Jobs", "Registered", &[])
    }

    fn catalog() -> JobCatalog {
        JobCatalog::new([
            JobMethod::new("Mailer", "Send", &["System.String", "System.Int32"]),
            JobMethod::new("Mailer", "Send", &["System.String"]),
            JobMethod::new("Reports", "Build", &[]),
        ])
    }

    const SEND: &str =
        r#"{"Type":"Mailer","Method":"Send","ParameterTypes":"[\"System.String\"]"}"#;

    #[test]
    fn decodes_a_known_method() {
        let job = decode_job(&catalog(), Some(SEND), Some(r#"["\"hi@example.com\""]"#))
            .unwrap()
            .unwrap();
        assert_eq!(job.type_name, "Mailer");
        assert_eq!(job.method, "Send");
        assert_eq!(job.parameter_types, vec!["System.String"]);
        assert_eq!(job.arguments, vec!["\"hi@example.com\""]);
        assert_eq!(job.display_name(), "Mailer.Send");
    }

    #[test]
    fn picks_the_overload_by_parameter_types() {
        let descriptor = r#"{"Type":"Mailer","Method":"Send","ParameterTypes":"[\"System.String\",\"System.Int32\"]"}"#;
        let job = decode_job(&catalog(), Some(descriptor), Some(r#"["\"a\"","3"]"#))
            .unwrap()
            .unwrap();
        assert_eq!(job.arguments.len(), 2);
    }

    #[test]
    fn methods_without_parameters_need_no_arguments() {
        let descriptor = r#"{"Type":"Reports","Method":"Build"}"#;
        let job = decode_job(&catalog(), Some(descriptor), None)
            .unwrap()
            .unwrap();
        assert!(job.arguments.is_empty());
        assert!(job.parameter_types.is_empty());
    }

    #[test]
    fn unloadable_descriptors_decode_to_none() {
        let catalog = catalog();
        let deleted_method = r#"{"Type":"Mailer","Method":"Gone","ParameterTypes":"[]"}"#;
        let deleted_type = r#"{"Type":"Billing","Method":"Send","ParameterTypes":"[]"}"#;
        assert_eq!(decode_job(&catalog, Some(deleted_method), None).unwrap(), None);
        assert_eq!(decode_job(&catalog, Some(deleted_type), None).unwrap(), None);
        assert_eq!(decode_job(&catalog, None, None).unwrap(), None);
        // argument count no longer matches the method
        assert_eq!(decode_job(&catalog, Some(SEND), Some("[]")).unwrap(), None);
    }

    #[test]
    fn load_errors_say_what_was_missing() {
        let catalog = catalog();
        let err = load_job(&catalog, Some(r#"{"Type":"Billing","Method":"Run"}"#), None)
            .unwrap()
            .unwrap_err();
        assert_eq!(err, JobLoadError::UnknownType("Billing".to_owned()));
        let err = load_job(&catalog, Some(SEND), Some("[]")).unwrap().unwrap_err();
        assert_eq!(err, JobLoadError::ArgumentCountMismatch(1, 0));
    }

    #[test]
    fn malformed_payloads_are_errors() {
        let catalog = catalog();
        assert!(decode_job(&catalog, Some("{oops"), None).is_err());
        assert!(decode_job(&catalog, Some(r#"{"Method":"Send"}"#), None).is_err());
        assert!(decode_job(&catalog, Some(SEND), Some("not an array")).is_err());
    }

    #[test]
    fn inventory_methods_are_collected() {
        let catalog = JobCatalog::from_inventory();
        assert!(!catalog.is_empty());
        let descriptor = r#"{"Type":"Inventory.Jobs","Method":"Registered"}"#;
        assert!(decode_job(&catalog, Some(descriptor), None)
            .unwrap()
            .is_some());
    }
}
