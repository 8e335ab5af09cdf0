//! Target pages for a run, loaded from `facebook_pages.json`.

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// One destination page. Immutable for the duration of a run.
#[derive(Clone, PartialEq, Eq)]
pub struct PageConfig {
    pub page_id: String,
    pub page_name: String,
    access_token: String,
}

impl PageConfig {
    pub fn new(page_id: &str, page_name: &str, access_token: &str) -> Result<Self> {
        let page = Self {
            page_id: page_id.trim().to_string(),
            page_name: page_name.trim().to_string(),
            access_token: access_token.trim().to_string(),
        };
        if page.page_id.is_empty() {
            return Err(RelayError::Config("page_id must not be empty".into()));
        }
        if page.page_name.is_empty() {
            return Err(RelayError::Config(format!("page {} has an empty page_name", page.page_id)));
        }
        if page.access_token.is_empty() {
            return Err(RelayError::Config(format!("page {} has an empty access_token", page.page_id)));
        }
        Ok(page)
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Short label for log lines.
    pub fn label(&self) -> String {
        format!("{} ({})", self.page_name, self.page_id)
    }
}

impl fmt::Debug for PageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageConfig")
            .field("page_id", &self.page_id)
            .field("page_name", &self.page_name)
            .field("access_token", &redact_token(&self.access_token))
            .finish()
    }
}

#[derive(Deserialize)]
struct RawPage {
    page_id: Option<serde_json::Value>,
    page_name: Option<String>,
    access_token: Option<String>,
}

#[derive(Serialize)]
struct RedactedPage<'a> {
    page_name: &'a str,
    page_id: &'a str,
    access_token: String,
}

/// Load and validate every page. Any malformed entry fails the whole load.
pub fn load(path: &Path) -> Result<Vec<PageConfig>> {
    if !path.exists() {
        return Err(RelayError::Config(format!(
            "Facebook pages config file not found: {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| RelayError::Config(format!("failed to read {}: {}", path.display(), e)))?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<Vec<PageConfig>> {
    let value: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| RelayError::Config(format!("pages config is not valid JSON: {}", e)))?;
    let entries = value
        .as_array()
        .ok_or_else(|| RelayError::Config("invalid pages config format, expected a list".into()))?;
    if entries.is_empty() {
        return Err(RelayError::Config("no Facebook pages configured".into()));
    }

    let mut pages = Vec::with_capacity(entries.len());
    let mut seen = HashSet::new();
    for (idx, entry) in entries.iter().enumerate() {
        let raw: RawPage = serde_json::from_value(entry.clone())
            .map_err(|e| RelayError::Config(format!("page entry {}: {}", idx, e)))?;

        // page ids are numeric strings, but a bare JSON number is accepted too
        let page_id = match raw.page_id {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(_) => {
                return Err(RelayError::Config(format!("page entry {}: page_id must be a string", idx)))
            }
            None => {
                return Err(RelayError::Config(format!(
                    "page entry {}: missing required field 'page_id'",
                    idx
                )))
            }
        };
        let page_name = raw.page_name.ok_or_else(|| {
            RelayError::Config(format!("page entry {}: missing required field 'page_name'", idx))
        })?;
        let access_token = raw.access_token.ok_or_else(|| {
            RelayError::Config(format!("page entry {}: missing required field 'access_token'", idx))
        })?;

        let page = PageConfig::new(&page_id, &page_name, &access_token)?;
        if !seen.insert(page.page_id.clone()) {
            return Err(RelayError::Config(format!("duplicate page_id {}", page.page_id)));
        }
        pages.push(page);
    }
    Ok(pages)
}

/// Mask all but the last four characters of a secret.
pub fn redact_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

/// Page list with tokens masked, safe to keep as a run artifact.
pub fn redacted_json(pages: &[PageConfig]) -> Result<String> {
    let view: Vec<RedactedPage<'_>> = pages
        .iter()
        .map(|p| RedactedPage {
            page_name: &p.page_name,
            page_id: &p.page_id,
            access_token: redact_token(&p.access_token),
        })
        .collect();
    serde_json::to_string_pretty(&view)
        .map_err(|e| RelayError::Config(format!("failed to serialize redacted pages: {}", e)))
}

pub fn write_redacted(pages: &[PageConfig], path: &Path) -> Result<()> {
    let json = redacted_json(pages)?;
    std::fs::write(path, json).map_err(|e| RelayError::Persistence {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "EAAGm0PX4ZCpsBAKZAsecretTOKEN1234";

    fn two_pages() -> String {
        format!(
            r#"[
                {{"page_name": "Berita Kilat", "page_id": "1111", "access_token": "{t}"}},
                {{"page_name": "Klip Harian", "page_id": 2222, "access_token": "{t}"}}
            ]"#,
            t = TOKEN
        )
    }

    #[test]
    fn test_parse_valid_pages() {
        let pages = parse(&two_pages()).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page_id, "1111");
        assert_eq!(pages[1].page_id, "2222");
        assert_eq!(pages[1].page_name, "Klip Harian");
        assert_eq!(pages[0].access_token(), TOKEN);
    }

    #[test]
    fn test_missing_page_id_rejects_whole_set() {
        let json = format!(
            r#"[
                {{"page_name": "A", "page_id": "1", "access_token": "{t}"}},
                {{"page_name": "B", "access_token": "{t}"}}
            ]"#,
            t = TOKEN
        );
        let err = parse(&json).unwrap_err();
        assert!(matches!(err, RelayError::Config(ref m) if m.contains("page_id")));
    }

    #[test]
    fn test_missing_page_name_rejected() {
        let json = format!(r#"[{{"page_id": "1", "access_token": "{}"}}]"#, TOKEN);
        let err = parse(&json).unwrap_err();
        assert!(matches!(err, RelayError::Config(ref m) if m.contains("page_name")));
    }

    #[test]
    fn test_empty_set_rejected() {
        assert!(matches!(parse("[]").unwrap_err(), RelayError::Config(_)));
    }

    #[test]
    fn test_not_a_list_rejected() {
        assert!(matches!(parse(r#"{"page_id": "1"}"#).unwrap_err(), RelayError::Config(_)));
        assert!(matches!(parse("not json").unwrap_err(), RelayError::Config(_)));
    }

    #[test]
    fn test_duplicate_page_id_rejected() {
        let json = format!(
            r#"[
                {{"page_name": "A", "page_id": "1", "access_token": "{t}"}},
                {{"page_name": "B", "page_id": "1", "access_token": "{t}"}}
            ]"#,
            t = TOKEN
        );
        let err = parse(&json).unwrap_err();
        assert!(matches!(err, RelayError::Config(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = load(Path::new("/nonexistent/facebook_pages.json")).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_debug_never_prints_token() {
        let pages = parse(&two_pages()).unwrap();
        let dbg = format!("{:?}", pages);
        assert!(!dbg.contains(TOKEN));
        assert!(dbg.contains("****1234"));
    }

    #[test]
    fn test_redacted_json_masks_tokens() {
        let pages = parse(&two_pages()).unwrap();
        let json = redacted_json(&pages).unwrap();
        assert!(!json.contains(TOKEN));
        assert!(json.contains("Berita Kilat"));
        assert_eq!(redact_token("short"), "****");
    }
}
