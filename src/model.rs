use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "MALE",
            Gender::Female => "FEMALE",
        }
    }

    /// Accepts the enum spelling in any case plus the single-letter forms.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MALE" | "M" => Some(Gender::Male),
            "FEMALE" | "F" => Some(Gender::Female),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClearanceStatus {
    Cleared,
    #[default]
    UnCleared,
}

impl ClearanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ClearanceStatus::Cleared => "CLEARED",
            ClearanceStatus::UnCleared => "UN_CLEARED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let key = s
            .trim()
            .to_ascii_uppercase()
            .replace(['-', ' '], "_");
        match key.as_str() {
            "CLEARED" => Some(ClearanceStatus::Cleared),
            "UN_CLEARED" | "UNCLEARED" | "NOT_CLEARED" => Some(ClearanceStatus::UnCleared),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    Photo,
    Transcript,
    Certificate,
    Supporting,
}

impl DocumentType {
    pub const ALL: [DocumentType; 4] = [
        DocumentType::Photo,
        DocumentType::Transcript,
        DocumentType::Certificate,
        DocumentType::Supporting,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Photo => "PHOTO",
            DocumentType::Transcript => "TRANSCRIPT",
            DocumentType::Certificate => "CERTIFICATE",
            DocumentType::Supporting => "SUPPORTING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let key = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(key))
    }

    /// Archive folder names: the enum name in any case, singular or plural.
    pub fn from_folder(folder: &str) -> Option<Self> {
        let key = folder.trim();
        Self::parse(key).or_else(|| {
            key.strip_suffix('s')
                .or_else(|| key.strip_suffix('S'))
                .and_then(Self::parse)
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Verified => "VERIFIED",
            DocumentStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(DocumentStatus::Pending),
            "VERIFIED" => Some(DocumentStatus::Verified),
            "REJECTED" => Some(DocumentStatus::Rejected),
            _ => None,
        }
    }
}

/// Canonical student shape, used for CSV candidates, single-record creates
/// and rows read back from the workspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentRecord {
    pub registration_id: String,
    pub certificate_id: Option<String>,
    pub full_name: String,
    pub gender: Option<Gender>,
    pub phone_number: Option<String>,
    pub department_id: Option<i64>,
    pub faculty_id: Option<i64>,
    pub academic_year_id: Option<i64>,
    pub gpa: Option<f64>,
    pub grade: Option<String>,
    pub graduation_date: Option<NaiveDate>,
    pub status: ClearanceStatus,
}

impl StudentRecord {
    /// Empty certificate ids are stored as absent.
    pub fn certificate_key(&self) -> Option<&str> {
        self.certificate_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// The two unique keys of an already persisted student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentKeys {
    pub registration_id: String,
    pub certificate_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogKind {
    Faculty,
    Department,
    AcademicYear,
}

impl CatalogKind {
    pub fn table(self) -> &'static str {
        match self {
            CatalogKind::Faculty => "faculties",
            CatalogKind::Department => "departments",
            CatalogKind::AcademicYear => "academic_years",
        }
    }

    /// Column on `students` that references this catalog.
    pub fn student_column(self) -> &'static str {
        match self {
            CatalogKind::Faculty => "faculty_id",
            CatalogKind::Department => "department_id",
            CatalogKind::AcademicYear => "academic_year_id",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CatalogKind::Faculty => "faculty",
            CatalogKind::Department => "department",
            CatalogKind::AcademicYear => "academic year",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceCatalogs {
    pub faculties: Vec<CatalogEntry>,
    pub departments: Vec<CatalogEntry>,
    pub academic_years: Vec<CatalogEntry>,
}

impl ReferenceCatalogs {
    pub fn entries(&self, kind: CatalogKind) -> &[CatalogEntry] {
        match kind {
            CatalogKind::Faculty => &self.faculties,
            CatalogKind::Department => &self.departments,
            CatalogKind::AcademicYear => &self.academic_years,
        }
    }

    /// Trimmed, case-insensitive exact match on the display name.
    pub fn resolve(&self, kind: CatalogKind, name: &str) -> Option<i64> {
        let wanted = name.trim().to_lowercase();
        if wanted.is_empty() {
            return None;
        }
        self.entries(kind)
            .iter()
            .find(|e| e.name.trim().to_lowercase() == wanted)
            .map(|e| e.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldWarning {
    pub line: usize,
    pub field: String,
    pub code: String,
    pub message: String,
}

/// One file pulled from a document archive, keyed to a student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentAssociation {
    pub document_type: DocumentType,
    pub registration_id: String,
    pub bytes: Vec<u8>,
    pub file_name: String,
}
