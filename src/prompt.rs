use std::collections::BTreeMap;

use crate::validation::Language;

/// Separator between prompt blocks.
const BLOCK_SEPARATOR: &str = "\n\n";

/// Assembles the instruction text sent to the provider.
///
/// Every method is a pure function of the system prompt and its arguments:
/// identical inputs always yield byte-identical output. Nothing is escaped.
///
/// # Example
///
/// ```
/// use std::collections::BTreeMap;
/// use codegen_pipeline::prompt::PromptBuilder;
/// use codegen_pipeline::validation::Language;
///
/// let builder = PromptBuilder::new("  You write code.  ");
/// let prompt = builder.build(Language::Python, &BTreeMap::new(), " reverse a list ");
/// assert_eq!(
///     prompt,
///     "You write code.\n\nTarget language: python\n\nInstruction: reverse a list"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBuilder {
    system_prompt: String,
}

impl PromptBuilder {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into().trim().to_string(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Prompt for a generation request.
    ///
    /// The language line is left out for [`Language::Auto`]; the context
    /// block is left out when `context` is empty.
    pub fn build(&self, language: Language, context: &BTreeMap<String, String>, instruction: &str) -> String {
        let mut blocks = vec![self.system_prompt.clone()];
        if language != Language::Auto {
            blocks.push(format!("Target language: {}", language));
        }
        if !context.is_empty() {
            blocks.push(context_block(context));
        }
        blocks.push(format!("Instruction: {}", instruction.trim()));
        blocks.join(BLOCK_SEPARATOR)
    }

    /// Prompt asking for a review of `code`.
    pub fn review(&self, code: &str) -> String {
        self.with_code("Review this code and suggest improvements:", code)
    }

    /// Prompt asking for a step-by-step explanation of `code`.
    pub fn explain(&self, code: &str) -> String {
        self.with_code("Explain this code step by step:", code)
    }

    fn with_code(&self, ask: &str, code: &str) -> String {
        [self.system_prompt.as_str(), ask, code].join(BLOCK_SEPARATOR)
    }
}

/// Render `context` as a `## Context` section, one `key: value` line per
/// entry in key order.
pub fn context_block(context: &BTreeMap<String, String>) -> String {
    let lines = context
        .iter()
        .map(|(key, value)| format!("{}: {}", key, value))
        .collect::<Vec<_>>()
        .join("\n");
    section("Context", &lines)
}

/// Wrap text in a labeled section.
pub fn section(label: &str, content: &str) -> String {
    format!("## {}\n{}", label, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> PromptBuilder {
        PromptBuilder::new("SYS")
    }

    #[test]
    fn test_auto_language_omits_language_line() {
        let prompt = builder().build(Language::Auto, &BTreeMap::new(), "hello");
        assert_eq!(prompt, "SYS\n\nInstruction: hello");
    }

    #[test]
    fn test_context_block_in_key_order() {
        let context = BTreeMap::from([
            ("version".to_string(), "3.12".to_string()),
            ("framework".to_string(), "flask".to_string()),
        ]);
        let prompt = builder().build(Language::Python, &context, "make an app");
        assert_eq!(
            prompt,
            "SYS\n\nTarget language: python\n\n## Context\nframework: flask\nversion: 3.12\n\nInstruction: make an app"
        );
    }

    #[test]
    fn test_build_is_deterministic() {
        let context = BTreeMap::from([("k".to_string(), "v".to_string())]);
        let a = builder().build(Language::Rust, &context, "  same  ");
        let b = builder().build(Language::Rust, &context.clone(), "  same  ");
        assert_eq!(a, b);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_no_escaping() {
        let prompt = builder().build(Language::Auto, &BTreeMap::new(), "use {braces} and \"quotes\"");
        assert!(prompt.ends_with("Instruction: use {braces} and \"quotes\""));
    }

    #[test]
    fn test_review_and_explain() {
        assert_eq!(
            builder().review("fn main() {}"),
            "SYS\n\nReview this code and suggest improvements:\n\nfn main() {}"
        );
        assert_eq!(
            builder().explain("x = 1"),
            "SYS\n\nExplain this code step by step:\n\nx = 1"
        );
    }

    #[test]
    fn test_system_prompt_trimmed() {
        assert_eq!(PromptBuilder::new("\n  SYS \n").system_prompt(), "SYS");
    }

    #[test]
    fn test_section() {
        assert_eq!(section("Title", "body"), "## Title\nbody");
    }
}
