//! Formula detection: short, symbol-dense paragraphs become display formulas.

use super::Enricher;
use crate::document::{join_lines, BlockKind, DocumentTree};
use crate::error::EnrichmentError;
use futures::future::BoxFuture;

const MAX_FORMULA_CHARS: usize = 160;

fn is_math_symbol(c: char) -> bool {
    matches!(
        c,
        '=' | '+' | '−' | '×' | '÷' | '±' | '∑' | '∏' | '∫' | '∂' | '√' | '∞' | '≤' | '≥' | '≠'
            | '≈' | '∈' | '∉' | '⊂' | '∪' | '∩' | '→' | '⇒' | '∀' | '∃' | '^' | '_' | '/' | '<'
            | '>' | '·'
    ) || ('α'..='ω').contains(&c)
        || ('Α'..='Ω').contains(&c)
        || ('⁰'..='⁹').contains(&c)
        || matches!(c, '²' | '³' | '¹')
        || ('₀'..='₉').contains(&c)
}

/// True when `text` reads as a standalone formula rather than prose.
pub fn looks_like_formula(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() || text.chars().count() > MAX_FORMULA_CHARS {
        return false;
    }
    let has_relation = text
        .chars()
        .any(|c| matches!(c, '=' | '≤' | '≥' | '≠' | '≈' | '∑' | '∫' | '∏'));
    if !has_relation {
        return false;
    }
    let long_words = text
        .split_whitespace()
        .filter(|w| w.chars().filter(|c| c.is_ascii_alphabetic()).count() >= 4)
        .count();
    if long_words > 2 {
        return false;
    }
    let visible: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    let symbols = visible.iter().filter(|c| is_math_symbol(**c)).count();
    symbols * 4 >= visible.len()
}

pub struct FormulaEnricher;

impl Enricher for FormulaEnricher {
    fn name(&self) -> &str {
        "formula"
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
                if lines.len() > 3 {
                    continue;
                }
                let text = join_lines(lines);
                if looks_like_formula(&text) {
                    block.kind = BlockKind::Formula { text };
                    changed += 1;
                }
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

    #[test]
    fn symbol_dense_lines_are_formulas() {
        assert!(looks_like_formula("E = mc²"));
        assert!(looks_like_formula("∑ xᵢ / n = μ"));
        assert!(looks_like_formula("a² + b² = c²"));
    }

    #[test]
    fn prose_with_equals_is_not() {
        assert!(!looks_like_formula(
            "The threshold value = the configured limit for every worker"
        ));
        assert!(!looks_like_formula("Results are summarised below"));
    }

    #[test]
    fn converts_paragraphs() {
        let mut doc = tree(vec![Block::new(
            1,
            None,
            BlockKind::Paragraph {
                lines: vec!["a² + b² = c²".into()],
            },
        )]);
        let changed = tokio_test::block_on(FormulaEnricher.enrich(&mut doc)).unwrap();
        assert_eq!(changed, 1);
        assert_eq!(
            doc.blocks[0].kind,
            BlockKind::Formula {
                text: "a² + b² = c²".into()
            }
        );
    }
}
