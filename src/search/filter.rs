use super::ResultDescriptor;

/// Document formats delivered when nothing else is configured.
pub const DEFAULT_DOCUMENT_EXTENSIONS: [&str; 5] = ["fb2", "epub", "pdf", "doc", "docx"];

/// Keeps the entries matching `predicate`, in their original order, and
/// truncates the result to at most `limit` entries.
pub fn filter<P>(
    raw: impl IntoIterator<Item = ResultDescriptor>,
    predicate: P,
    limit: usize,
) -> Vec<ResultDescriptor>
where
    P: Fn(&ResultDescriptor) -> bool,
{
    raw.into_iter().filter(|d| predicate(d)).take(limit).collect()
}

/// Allow-list of file extensions, compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFilter {
    allowed: Vec<String>,
}

impl ExtensionFilter {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed: Vec<String> = Vec::new();
        for ext in extensions.into_iter().map(|e| normalize(e.as_ref())) {
            if !ext.is_empty() && !allowed.contains(&ext) {
                allowed.push(ext);
            }
        }
        Self { allowed }
    }

    /// Parses a comma separated list such as `pdf, .epub,DOCX`.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn extensions(&self) -> &[String] {
        &self.allowed
    }

    pub fn allows(&self, descriptor: &ResultDescriptor) -> bool {
        descriptor
            .format
            .as_deref()
            .map(normalize)
            .is_some_and(|ext| self.allowed.iter().any(|a| *a == ext))
    }
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        Self::new(DEFAULT_DOCUMENT_EXTENSIONS)
    }
}

fn normalize(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}
