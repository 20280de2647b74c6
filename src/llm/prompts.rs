//! Prompt assembly for the rewrite stage.

use serde::{Deserialize, Serialize};

/// Cleanup tasks the rewrite stage may perform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CleanupFlags {
    pub remove_stutters: bool,
    pub add_punctuation: bool,
    pub fix_grammar: bool,
    pub remove_filler_words: bool,
}

impl Default for CleanupFlags {
    fn default() -> Self {
        Self {
            remove_stutters: true,
            add_punctuation: true,
            fix_grammar: false,
            remove_filler_words: true,
        }
    }
}

impl CleanupFlags {
    fn tasks(&self) -> Vec<&'static str> {
        let mut tasks = Vec::new();
        if self.remove_stutters {
            tasks.push("Remove stutters and repeated words");
        }
        if self.add_punctuation {
            tasks.push("Add appropriate punctuation and capitalization");
        }
        if self.fix_grammar {
            tasks.push("Fix obvious grammatical mistakes");
        }
        if self.remove_filler_words {
            tasks.push("Remove filler words such as 'um', 'uh' and 'you know'");
        }
        tasks
    }
}

/// Build the system prompt: enabled cleanup tasks, the invariants every
/// rewrite must respect, and an optional context-keywords line.
pub fn build_system_prompt(flags: &CleanupFlags, keywords: &[String]) -> String {
    let mut prompt = String::from(
        "You clean up voice-dictated text. Apply the following to the text you receive:\n",
    );

    let tasks = flags.tasks();
    if tasks.is_empty() {
        prompt.push_str("- Clean up the text while preserving its meaning\n");
    } else {
        for task in tasks {
            prompt.push_str("- ");
            prompt.push_str(task);
            prompt.push('\n');
        }
    }

    prompt.push_str(
        "\nRules:\n\
         - Preserve the original meaning exactly\n\
         - Keep the same language as the input\n\
         - Output only the cleaned text, with no commentary\n\
         - If the input is empty or nonsensical, return it unchanged\n",
    );

    if !keywords.is_empty() {
        prompt.push_str("\nContext keywords that may appear in the text: ");
        prompt.push_str(&keywords.join(", "));
        prompt.push('\n');
    }

    prompt
}

/// Build the user message: the raw text, or the custom prompt wrapping it.
pub fn build_user_message(custom_prompt: Option<&str>, text: &str) -> String {
    match custom_prompt {
        Some(custom) if !custom.trim().is_empty() => {
            format!("{}\n\nText to process:\n{}", custom.trim(), text)
        }
        _ => text.to_string(),
    }
}
