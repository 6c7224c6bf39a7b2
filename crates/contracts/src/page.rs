pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageError {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for PageError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: i64,
    pub limit: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PageRequest {
    pub fn new(offset: Option<i64>, limit: Option<i64>) -> Result<Self, PageError> {
        let offset = offset.unwrap_or(0);
        let limit = limit.unwrap_or(DEFAULT_LIMIT);

        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(PageError {
                field: "limit",
                message: format!("must be between 1 and {}", MAX_LIMIT),
            });
        }

        if offset < 0 {
            return Err(PageError {
                field: "offset",
                message: "must be >= 0".to_string(),
            });
        }

        Ok(Self { offset, limit })
    }
}

/// Position of a page inside the full match set, rendered as
/// `<offset>-<end>/<total>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub offset: i64,
    pub end: i64,
    pub total: i64,
}

impl PageRange {
    /// `end = min(offset + limit - 1, max(total - 1, 0))`. Not clamped to
    /// `offset`: an empty page past the end reports `end < offset`. The sum
    /// saturates, so any accepted offset is safe.
    pub fn new(page: PageRequest, total: i64) -> Self {
        let end = page
            .offset
            .saturating_add(page.limit - 1)
            .min((total - 1).max(0));
        Self {
            offset: page.offset,
            end,
            total,
        }
    }

    pub fn content_range(&self, unit: &str) -> String {
        format!("{} {}", unit, self)
    }
}

impl std::fmt::Display for PageRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}/{}", self.offset, self.end, self.total)
    }
}
