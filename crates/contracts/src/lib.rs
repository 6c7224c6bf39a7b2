use serde::{Deserialize, Serialize};

pub mod export;
pub mod page;

pub use page::{PageError, PageRange, PageRequest};

pub const NUMBER_LEN: (usize, usize) = (3, 64);
pub const HOLDER_LEN: (usize, usize) = (2, 128);
pub const STATUS_LEN: (usize, usize) = (2, 32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub id: i64,
    pub number: String,
    pub holder: String,
    pub premium: f64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPolicy {
    pub number: String,
    pub holder: String,
    pub premium: f64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}

impl NewPolicy {
    /// Checks field bounds. Lengths count chars, not bytes, and values are
    /// taken as given (no trimming).
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        check_len(&mut errors, "number", &self.number, NUMBER_LEN);
        check_len(&mut errors, "holder", &self.holder, HOLDER_LEN);
        check_len(&mut errors, "status", &self.status, STATUS_LEN);

        if !self.premium.is_finite() {
            errors.push(FieldError {
                field: "premium",
                message: "must be a finite number".to_string(),
            });
        } else if self.premium < 0.0 {
            errors.push(FieldError {
                field: "premium",
                message: "must be >= 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { errors })
        }
    }
}

fn check_len(errors: &mut Vec<FieldError>, field: &'static str, value: &str, bounds: (usize, usize)) {
    let (min, max) = bounds;
    let len = value.chars().count();
    if len < min || len > max {
        errors.push(FieldError {
            field,
            message: format!("length must be between {} and {} characters", min, max),
        });
    }
}

/// Sortable columns. Anything outside this set resolves to `Id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Id,
    Number,
    Holder,
    Premium,
    Status,
}

impl SortKey {
    pub const ALL: [SortKey; 5] = [
        SortKey::Id,
        SortKey::Number,
        SortKey::Holder,
        SortKey::Premium,
        SortKey::Status,
    ];

    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim()) {
            Some("number") => SortKey::Number,
            Some("holder") => SortKey::Holder,
            Some("premium") => SortKey::Premium,
            Some("status") => SortKey::Status,
            _ => SortKey::Id,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            SortKey::Id => "id",
            SortKey::Number => "number",
            SortKey::Holder => "holder",
            SortKey::Premium => "premium",
            SortKey::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    Asc,
    #[default]
    Desc,
}

impl SortDir {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim()) {
            Some(s) if s.eq_ignore_ascii_case("asc") => SortDir::Asc,
            _ => SortDir::Desc,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

/// Filter and ordering shared by the paged listing, the HTML index and the
/// CSV export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanQuery {
    pub search: Option<String>,
    pub sort: SortKey,
    pub dir: SortDir,
}

impl ScanQuery {
    pub fn new(search: Option<&str>, sort: Option<&str>, dir: Option<&str>) -> Self {
        Self {
            search: search.filter(|s| !s.is_empty()).map(|s| s.to_string()),
            sort: SortKey::parse(sort),
            dir: SortDir::parse(dir),
        }
    }
}
