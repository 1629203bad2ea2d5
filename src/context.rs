/// Context assembly: turns ranked matches into the text block the language
/// model is grounded on.
///
/// Sizes are measured in characters (Unicode scalar values). Blocks are
/// taken in rank order and joined by a blank line; the first block that does
/// not fit ends assembly. Only the very first block may be cut, and only when
/// it alone is larger than the budget.
use crate::models::RetrievedMatch;

const BLOCK_SEPARATOR: &str = "\n\n";

/// Bounded, ordered context built from retrieved matches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssembledContext {
    pub text: String,
    /// Ranks of the matches whose blocks made it in, in order.
    pub included: Vec<usize>,
    /// Set when the first block had to be cut at the budget boundary.
    pub truncated: bool,
}

impl AssembledContext {
    /// Size of the context in characters.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Render one match the way it is shown to the model.
#[must_use]
pub fn format_block(m: &RetrievedMatch) -> String {
    let r = &m.record;
    format!(
        "{}. Type: {} | Title: {}\n   Domain: {} | Owner: {}\n   Tool: {} | Tags: {}\n   Summary: {}",
        m.rank,
        r.field_or_missing("type"),
        r.field_or_missing("title"),
        r.field_or_missing("domain"),
        r.field_or_missing("owner"),
        r.field_or_missing("bi_tool"),
        r.field_or_missing("tags"),
        r.page_content,
    )
}

/// Assemble `matches` into a context of at most `budget` characters.
#[must_use]
pub fn assemble(matches: &[RetrievedMatch], budget: usize) -> AssembledContext {
    let mut ctx = AssembledContext::default();
    let mut used = 0usize;

    for m in matches {
        let block = format_block(m);
        let block_len = block.chars().count();
        let sep_len = if ctx.included.is_empty() {
            0
        } else {
            BLOCK_SEPARATOR.len()
        };

        if used + sep_len + block_len <= budget {
            if sep_len > 0 {
                ctx.text.push_str(BLOCK_SEPARATOR);
            }
            ctx.text.push_str(&block);
            ctx.included.push(m.rank);
            used += sep_len + block_len;
            continue;
        }

        if ctx.included.is_empty() && budget > 0 {
            ctx.text = block.chars().take(budget).collect();
            ctx.included.push(m.rank);
            ctx.truncated = true;
        }
        break;
    }

    ctx
}
