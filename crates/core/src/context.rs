use crate::models::RetrievalHit;

pub const CONTEXT_SEPARATOR: &str = "\n---\n";
pub const UNRESOLVED_PLACEHOLDER: &str = "[Error loading text]";
pub const NOT_IN_CONTEXT: &str = "The answer is not contained in the context.";

/// Renders hits into one context block per hit, in the order given.
/// Never reorders, filters or truncates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextAssembler;

impl ContextAssembler {
    pub fn assemble(&self, hits: &[RetrievalHit]) -> String {
        hits.iter()
            .map(render_block)
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR)
    }
}

fn render_block(hit: &RetrievalHit) -> String {
    let text = hit.text.as_deref().unwrap_or(UNRESOLVED_PLACEHOLDER);
    format!(
        "Source: {}, Paragraph {}:\n{}\n",
        hit.metadata.source_label(),
        hit.metadata.paragraph_label(),
        text
    )
}

pub fn render_prompt(context: &str, question: &str) -> String {
    format!(
        "Context:\n---\n{context}\n---\nQuestion: {question}\n\n\
         Instruction: Answer the question briefly, using only information from the context above. \
         If the answer is not in the context, say \"{NOT_IN_CONTEXT}\".\n\n\
         Answer:"
    )
}
