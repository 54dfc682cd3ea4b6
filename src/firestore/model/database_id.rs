use crate::firestore::constants::DEFAULT_DATABASE_ID;
use crate::firestore::error::{invalid_argument, missing_project_id, FirestoreResult};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DatabaseId {
    project_id: String,
    database: String,
}

impl DatabaseId {
    pub fn new(project_id: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database: database.into(),
        }
    }

    pub fn default(project_id: impl Into<String>) -> Self {
        Self::new(project_id, DEFAULT_DATABASE_ID)
    }

    /// Parses either a bare database name or `projects/{project}/databases/{database}`.
    pub fn parse(project_id: &str, identifier: &str) -> FirestoreResult<Self> {
        if project_id.trim().is_empty() {
            return Err(missing_project_id());
        }
        if identifier.trim().is_empty() {
            return Ok(Self::default(project_id));
        }
        if let Some(rest) = identifier.strip_prefix("projects/") {
            let segments: Vec<_> = rest.split('/').collect();
            if segments.len() == 3 && segments[1] == "databases" {
                return Ok(Self::new(segments[0], segments[2]));
            }
            return Err(invalid_argument(
                "Database identifier must follow projects/{project}/databases/{database}",
            ));
        }
        Ok(Self::new(project_id, identifier))
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_default_database(&self) -> bool {
        self.database == DEFAULT_DATABASE_ID
    }

    /// Fully qualified resource name, e.g. `projects/demo/databases/(default)`.
    pub fn canonical_name(&self) -> String {
        format!("projects/{}/databases/{}", self.project_id, self.database)
    }
}
