//! Prompt templates for notes generation and figure analysis.
//!
//! Every prompt lives here so the generator logic never embeds wording and
//! tests can assert on exactly what a model receives.

/// Instruction sent with every figure thumbnail.
pub const FIGURE_ANALYSIS_PROMPT: &str =
    "Analyze this image and provide a brief description of its content.";

/// Single-pass summarisation prompt.
///
/// `text` must already be truncated to the configured character budget.
pub fn single_pass_prompt(text: &str, figure_count: usize) -> String {
    format!(
        "Summarize the following document content:\n\
         {text}\n\n\
         Generate a comprehensive summary including key points and a conclusion. \
         The document contains {figure_count} figures."
    )
}

/// First prompt of the incremental mode: draft with figure placeholders.
pub fn initial_draft_prompt(text: &str, figure_count: usize, table_count: usize) -> String {
    format!(
        "Summarize the following document content:\n\
         {text}\n\n\
         Generate a comprehensive summary including key points and a conclusion. \
         The document contains {figure_count} figures and {table_count} tables.\n\n\
         Your summary should include placeholders for figure descriptions, which will be \
         added later. Use the format [Figure X] to indicate where each figure should be described."
    )
}

/// Rewrite prompt for one batch of figure analyses.
///
/// `analyses` pairs each figure's 1-based discovery index with its
/// description.
pub fn update_prompt(draft: &str, analyses: &[(usize, &str)]) -> String {
    let lines = analyses
        .iter()
        .map(|(index, text)| format!("Figure {index}: {text}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Update the following notes with these image analyses:\n\n\
         {draft}\n\n\
         Image analyses:\n\
         {lines}\n\n\
         Replace the [Figure X] placeholders with the corresponding image analyses where appropriate."
    )
}
