//! Code detection: paragraphs that read like source code become code blocks.

use super::Enricher;
use crate::document::{BlockKind, DocumentTree};
use crate::error::EnrichmentError;
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_CODE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        [;{}]\s*$                                   # statement / block terminators
        | ^\s*(fn|def|class|import|from|use|let|const|var|function|return|if|for|while|pub|impl|struct|package|public|private|\#include)\b
        | (=>|->|::|==|!=|\+=|&&|\|\|)
        | ^\s*(//|\#\s|/\*)
        | \w+\(.*\)\s*[:;{]?\s*$                    # call or signature at end of line
        ",
    )
    .unwrap()
});

/// `(language, pattern)` pairs, checked in order.
static LANGUAGES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("rust", r"\bfn\s+\w+\s*\(|\blet\s+mut\b|\bimpl\b|\bpub\s+(fn|struct)\b"),
        ("python", r"^\s*def\s+\w+\(|^\s*(from\s+\S+\s+)?import\s+\w+|\bself\.\w+|:\s*$"),
        ("javascript", r"\bfunction\s+\w*\(|\bconst\s+\w+\s*=|=>|console\.log"),
        ("c", r"\#include\s*<|\bint\s+main\s*\(|printf\("),
        ("java", r"\bpublic\s+(static\s+)?(class|void)\b|System\.out"),
        ("sql", r"(?i)^\s*(select|insert|update|delete|create)\b.*\b(from|into|set|table)\b"),
        ("bash", r"^\s*\$\s+\w+|^\#!/bin/|\becho\s+"),
    ]
    .into_iter()
    .filter_map(|(lang, pattern)| Regex::new(pattern).ok().map(|re| (lang, re)))
    .collect()
});

/// Guess the language of a code snippet.
pub fn guess_language(lines: &[String]) -> Option<String> {
    LANGUAGES
        .iter()
        .find(|(_, re)| lines.iter().any(|l| re.is_match(l)))
        .map(|(lang, _)| lang.to_string())
}

/// True when the paragraph lines look like source code.
pub fn looks_like_code(lines: &[String]) -> bool {
    let signals = lines.iter().filter(|l| RE_CODE_LINE.is_match(l)).count();
    match lines.len() {
        0 => false,
        1 => {
            let line = &lines[0];
            RE_CODE_LINE.find_iter(line).count() >= 2 && !line.ends_with('.')
        }
        n => signals * 10 >= n * 6,
    }
}

pub struct CodeEnricher;

impl Enricher for CodeEnricher {
    fn name(&self) -> &str {
        "code"
    }

    fn enrich<'a>(
        &'a self,
        doc: &'a mut DocumentTree,
    ) -> BoxFuture<'a, Result<usize, EnrichmentError>> {
        Box::pin(async move {
            let mut changed = 0;
            for block in &mut doc.blocks {
                let BlockKind::Paragraph { lines } = &block.kind else {
                    continue;
                };
                if !looks_like_code(lines) {
                    continue;
                }
                let language = guess_language(lines);
                let text = lines.join("\n");
                block.kind = BlockKind::Code { text, language };
                changed += 1;
            }
            Ok(changed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Block;
    use crate::enrich::tests::tree;

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn detects_rust() {
        let l = lines(&["fn main() {", "let mut x = 1;", "x += 2;", "}"]);
        assert!(looks_like_code(&l));
        assert_eq!(guess_language(&l).as_deref(), Some("rust"));
    }

    #[test]
    fn detects_python() {
        let l = lines(&["def area(r):", "    return 3.14 * r * r"]);
        assert!(looks_like_code(&l));
        assert_eq!(guess_language(&l).as_deref(), Some("python"));
    }

    #[test]
    fn prose_is_not_code() {
        let l = lines(&[
            "The pipeline converts each document in turn.",
            "Failures are recorded and the batch continues.",
        ]);
        assert!(!looks_like_code(&l));
    }

    #[test]
    fn converts_paragraph_blocks() {
        let mut doc = tree(vec![
            Block::new(
                1,
                None,
                BlockKind::Paragraph {
                    lines: lines(&["import os", "print(os.getcwd())"]),
                },
            ),
            Block::new(
                1,
                None,
                BlockKind::Paragraph {
                    lines: lines(&["Plain words here."]),
                },
            ),
        ]);
        let changed = tokio_test::block_on(CodeEnricher.enrich(&mut doc)).unwrap();
        assert_eq!(changed, 1);
        assert_eq!(
            doc.blocks[0].kind,
            BlockKind::Code {
                text: "import os\nprint(os.getcwd())".into(),
                language: Some("python".into())
            }
        );
        assert!(matches!(doc.blocks[1].kind, BlockKind::Paragraph { .. }));
    }
}
