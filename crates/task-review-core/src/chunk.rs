//! Recursive character text splitter.
//!
//! Splits page text into overlapping chunks of at most `chunk_size`
//! characters. The splitter tries each separator in turn (`"\n\n"`, `"\n"`,
//! `" "`, then individual characters), so chunks break on paragraph
//! boundaries where possible and only fall back to finer boundaries for
//! oversized pieces. Consecutive chunks share up to `chunk_overlap`
//! characters of context.
//!
//! Sizes are measured in characters, not bytes.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};

pub const DEFAULT_CHUNK_SIZE: usize = 600;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// Maximum length of a chunk title, in characters.
pub const MAX_TITLE_CHARS: usize = 200;

const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// A chunk cut from one page of a source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageChunk {
    /// 1-based page number.
    pub page: usize,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be greater than zero");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split `text` into trimmed, non-empty chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    /// Split each page separately, keeping the page number on every chunk.
    pub fn split_pages(&self, pages: &[String]) -> Vec<PageChunk> {
        pages
            .iter()
            .enumerate()
            .flat_map(|(i, page)| {
                self.split(page)
                    .into_iter()
                    .map(move |text| PageChunk { page: i + 1, text })
            })
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut finer: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = sep.as_str();
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep.as_str();
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut pending: Vec<String> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge(&pending));
                pending.clear();
            }
            if finer.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    chunks.push(trimmed.to_string());
                }
            } else {
                chunks.extend(self.split_recursive(&piece, finer));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge(&pending));
        }
        chunks
    }

    /// Greedily pack small pieces into chunks, carrying a tail of up to
    /// `chunk_overlap` characters into the next chunk.
    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let mut out = Vec::new();
        let mut window: Vec<(&str, usize)> = Vec::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&mut out, &window);
                while total > self.chunk_overlap
                    || (total + len > self.chunk_size && total > 0)
                {
                    let (_, first_len) = window.remove(0);
                    total -= first_len;
                }
            }
            window.push((piece.as_str(), len));
            total += len;
        }

        push_joined(&mut out, &window);
        out
    }
}

fn push_joined(out: &mut Vec<String>, window: &[(&str, usize)]) {
    let joined: String = window.iter().map(|(s, _)| *s).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Split on `separator`, attaching each separator to the start of the piece
/// that follows it. An empty separator splits into single characters.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }
    let mut pieces = Vec::new();
    for (i, part) in text.split(separator).enumerate() {
        let piece = if i == 0 {
            part.to_string()
        } else {
            format!("{}{}", separator, part)
        };
        if !piece.is_empty() {
            pieces.push(piece);
        }
    }
    pieces
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// SHA-256 of `text`, lowercase hex.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Title of a chunk: its first non-empty line, capped at [`MAX_TITLE_CHARS`].
pub fn chunk_title(text: &str) -> Option<String> {
    let first = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    Some(first.chars().take(MAX_TITLE_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let splitter = TextSplitter::new(600, 100).unwrap();
        assert_eq!(splitter.split("Hello, world!"), vec!["Hello, world!"]);
    }

    #[test]
    fn test_empty_and_blank_text() {
        let splitter = TextSplitter::new(600, 100).unwrap();
        assert!(splitter.split("").is_empty());
        assert!(splitter.split("   \n\n  ").is_empty());
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let splitter = TextSplitter::new(12, 0).unwrap();
        assert_eq!(
            splitter.split("para one.\n\npara two."),
            vec!["para one.", "para two."]
        );
    }

    #[test]
    fn test_overlap_between_chunks() {
        let splitter = TextSplitter::new(10, 5).unwrap();
        assert_eq!(
            splitter.split("aaaa bbbb cccc dddd eeee"),
            vec!["aaaa bbbb", "bbbb cccc", "cccc dddd", "dddd eeee"]
        );
    }

    #[test]
    fn test_unbroken_text_falls_back_to_characters() {
        let splitter = TextSplitter::new(10, 0).unwrap();
        assert_eq!(
            splitter.split("abcdefghijklmnopqrstuvwxy"),
            vec!["abcdefghij", "klmnopqrst", "uvwxy"]
        );
    }

    #[test]
    fn test_chunks_never_exceed_size() {
        let text = "Deployments require a change ticket.\n\n".repeat(40)
            + &"Rollback plans must be documented before release. ".repeat(30);
        let splitter = TextSplitter::new(120, 20).unwrap();
        let chunks = splitter.split(&text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 120, "chunk too long: {}", c.len());
            assert!(!c.is_empty());
        }
    }

    #[test]
    fn test_sizes_count_characters() {
        let splitter = TextSplitter::new(4, 0).unwrap();
        for c in splitter.split("ééééééééé") {
            assert!(c.chars().count() <= 4);
        }
    }

    #[test]
    fn test_split_pages_numbers_from_one() {
        let splitter = TextSplitter::new(600, 100).unwrap();
        let chunks = splitter.split_pages(&["first".to_string(), "".to_string(), "third".to_string()]);
        assert_eq!(
            chunks,
            vec![
                PageChunk { page: 1, text: "first".into() },
                PageChunk { page: 3, text: "third".into() },
            ]
        );
    }

    #[test]
    fn test_invalid_overlap_rejected() {
        assert!(TextSplitter::new(100, 100).is_err());
        assert!(TextSplitter::new(0, 0).is_err());
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_chunk_title() {
        assert_eq!(chunk_title("\n  Release policy\nbody"), Some("Release policy".into()));
        assert_eq!(chunk_title(&"t".repeat(300)).unwrap().chars().count(), 200);
        assert_eq!(chunk_title("  \n "), None);
    }
}
