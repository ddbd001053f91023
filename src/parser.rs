//! Recursive separator-based text splitting.
//!
//! Text is split on the first separator that occurs in it; pieces still
//! longer than `chunk_size` are split again with the remaining separators.
//! Adjacent small pieces are merged back into chunks of at most
//! `chunk_size` characters, carrying up to `chunk_overlap` characters of
//! context from the previous chunk.

use std::collections::VecDeque;

use anyhow::{ensure, Result};

use crate::model::{Knowledge, KnowledgeType, SplitConfig, Text, TextSplitConfig};
use crate::registry::Parser;

pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

/// Knowledge types handled by [`TextParser`].
pub const TEXT_PARSER_TYPES: &[KnowledgeType] = &[
    KnowledgeType::Text,
    KnowledgeType::Markdown,
    KnowledgeType::Json,
    KnowledgeType::Rst,
    KnowledgeType::Python,
    KnowledgeType::Js,
    KnowledgeType::Ts,
    KnowledgeType::Go,
    KnowledgeType::Java,
    KnowledgeType::Cpp,
    KnowledgeType::C,
    KnowledgeType::CSharp,
    KnowledgeType::Kotlin,
    KnowledgeType::Swift,
    KnowledgeType::Php,
    KnowledgeType::Ruby,
    KnowledgeType::Rust,
    KnowledgeType::Scala,
    KnowledgeType::Sol,
    KnowledgeType::Html,
    KnowledgeType::Lua,
    KnowledgeType::Latex,
    KnowledgeType::GithubRepo,
];

#[derive(Debug, Clone, Copy, Default)]
pub struct TextParser;

#[async_trait::async_trait]
impl Parser for TextParser {
    async fn parse(&self, knowledge: &Knowledge, text: Text) -> Result<Vec<Text>> {
        let config = match &knowledge.split_config {
            SplitConfig::Text(c) | SplitConfig::Markdown(c) => c.clone(),
            SplitConfig::GithubRepo(_) => TextSplitConfig::default(),
        };
        ensure!(config.chunk_size > 0, "chunk_size must be greater than 0");
        ensure!(
            config.chunk_overlap < config.chunk_size,
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            config.chunk_overlap,
            config.chunk_size
        );

        let separators: Vec<&str> = if config.separators.is_empty() {
            DEFAULT_SEPARATORS.to_vec()
        } else {
            config.separators.iter().map(String::as_str).collect()
        };

        Ok(split_text(&text.content, config.chunk_size, config.chunk_overlap, &separators)
            .into_iter()
            .map(|chunk| Text::with_metadata(chunk, text.metadata.clone()))
            .collect())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `text` into chunks of at most `chunk_size` characters (a single
/// unsplittable piece may exceed it when no separator applies).
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize, separators: &[&str]) -> Vec<String> {
    let (separator, rest) = match separators
        .iter()
        .position(|s| s.is_empty() || text.contains(s))
    {
        Some(i) => (separators[i], &separators[i + 1..]),
        None => ("", &[][..]),
    };

    let pieces: Vec<String> = if separator.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        text.split(separator).map(str::to_string).collect()
    };

    let mut chunks = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    for piece in pieces {
        if char_len(&piece) < chunk_size {
            pending.push(piece);
            continue;
        }
        if !pending.is_empty() {
            chunks.extend(merge(&pending, separator, chunk_size, chunk_overlap));
            pending.clear();
        }
        if rest.is_empty() {
            chunks.push(piece);
        } else {
            chunks.extend(split_text(&piece, chunk_size, chunk_overlap, rest));
        }
    }
    if !pending.is_empty() {
        chunks.extend(merge(&pending, separator, chunk_size, chunk_overlap));
    }
    chunks
}

fn merge(pieces: &[String], separator: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut out = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);
        let joined_len = |window: &VecDeque<&str>| if window.is_empty() { 0 } else { sep_len };

        if total + len + joined_len(&window) > chunk_size && !window.is_empty() {
            push_joined(&mut out, &window, separator);
            while total > chunk_overlap
                || (total + len + joined_len(&window) > chunk_size && total > 0)
            {
                let Some(front) = window.pop_front() else {
                    break;
                };
                total -= char_len(front) + if window.is_empty() { 0 } else { sep_len };
            }
        }
        total += len + joined_len(&window);
        window.push_back(piece);
    }
    push_joined(&mut out, &window, separator);
    out
}

fn push_joined(out: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}
