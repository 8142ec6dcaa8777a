//! Structured content returned by fetchers.

use serde::{Deserialize, Serialize};

/// Pointer to one chapter on the source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChapterRef {
    /// 1-based position in the novel.
    pub number: i64,
    pub title: String,
    pub url: String,
}

/// A novel's metadata and ordered chapter list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NovelIndex {
    pub title: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub chapters: Vec<ChapterRef>,
}

/// A downloaded chapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchedChapter {
    pub number: i64,
    pub title: String,
    pub content: String,
}

/// URL-safe slug: lowercase alphanumerics joined by single dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for c in title.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Sword Saint: Rebirth!"), "sword-saint-rebirth");
        assert_eq!(slugify("  --  "), "untitled");
        assert_eq!(slugify("剑圣 重生"), "剑圣-重生");
    }
}
