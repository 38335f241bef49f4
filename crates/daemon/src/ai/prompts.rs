//! Prompt builders for the assistant endpoints.

use protocol::{ChatTurn, CodeIndexEntry};

/// What the assistant is told about the directory the user is looking at.
#[derive(Debug, Clone, Default)]
pub struct DirectoryContext {
    /// Directory path relative to the workspace root.
    pub path: String,
    /// Output of [`crate::files::index::directory_summary`].
    pub listing: String,
    /// Stored code index of the directory.
    pub index: Vec<CodeIndexEntry>,
}

pub fn suggest(language: &str, code: &str) -> String {
    format!(
        "Suggest an improvement or next step for this {language} code:\n\n{code}\n\n\
         Respond with only the code suggestion or next edit, no explanation."
    )
}

pub fn review(language: &str, code: &str) -> String {
    format!(
        "Review the following {language} code and provide feedback, suggestions, \
         and possible improvements.\n\n{code}"
    )
}

/// Chat prompt: optional directory context, then the flattened history,
/// ending with an open assistant turn.
pub fn chat(history: &[ChatTurn], directory: Option<&DirectoryContext>) -> String {
    let mut prompt = String::from("You are a helpful coding assistant.");

    if let Some(dir) = directory {
        prompt.push_str(&format!(
            "\nCurrent directory: {}\nDirectory contents:\n{}\n\
             First, explain the structure and contents of this directory to the user \
             in clear language. Then continue the conversation as normal.",
            dir.path, dir.listing
        ));
        if !dir.index.is_empty() {
            prompt.push_str("\nHere is an index of code in this directory:");
            for item in &dir.index {
                prompt.push_str(&format!("\n- File: {} ({})", item.path, item.kind));
                if let Some(functions) = item.functions.as_ref().filter(|f| !f.is_empty()) {
                    prompt.push_str(&format!("\n  Functions: {}", functions.join(", ")));
                }
                if let Some(classes) = item.classes.as_ref().filter(|c| !c.is_empty()) {
                    prompt.push_str(&format!("\n  Classes: {}", classes.join(", ")));
                }
                if let Some(snippet) = &item.snippet {
                    prompt.push_str(&format!("\n  Snippet:\n{snippet}\n"));
                }
            }
        }
    }

    prompt.push_str("\nHere is the conversation so far:\n");
    for turn in history {
        prompt.push_str(&format!("{}: {}\n", turn.role.label(), turn.content));
    }
    prompt.push_str("Assistant:");
    prompt
}

/// Asks for a complete rewrite of one file.
pub fn suggest_changes(path: &str, listing: &str, filename: &str, code: &str) -> String {
    format!(
        "You are an expert developer. The file is located at: {path}\n\
         Directory contents:\n{listing}\n\n\
         Analyze and suggest improvements or refactoring for the following code. \
         Respond with the complete improved code only, no explanation.\n\n\
         Filename: {filename}\nCode:\n{code}"
    )
}

pub fn next_lines(language: &str, code: &str) -> String {
    format!("Suggest the next lines of {language} code given the following context:\n{code}\n")
}

pub fn analyze(language: &str, code: &str) -> String {
    format!(
        "Analyze the following {language} code. Identify any unfinished functions, \
         missing imports, or incomplete logic, and propose the missing code.\n\n\
         Code:\n{code}\n\nAnalysis and proposed code:"
    )
}

pub fn check(language: &str, code: &str) -> String {
    format!(
        "Check the following {language} code for correctness, including logic errors, \
         syntax errors, and style issues. Provide a list of problems and suggestions \
         for improvement.\n\nCode:\n{code}\n\nProblems and suggestions:"
    )
}

pub fn answer(language: &str, code: &str, question: &str) -> String {
    format!(
        "You are an expert coding assistant. Answer the following user question about \
         their {language} code. If code context is provided, use it to give a more \
         accurate answer.\n\nCode context (if provided):\n{code}\n\n\
         User question: {question}\n\nAI answer:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::ChatRole;

    #[test]
    fn test_chat_without_directory() {
        let history = vec![
            ChatTurn {
                role: ChatRole::User,
                content: "hi".to_string(),
            },
            ChatTurn {
                role: ChatRole::Assistant,
                content: "hello".to_string(),
            },
        ];
        let prompt = chat(&history, None);

        assert!(prompt.starts_with("You are a helpful coding assistant."));
        assert!(prompt.ends_with("User: hi\nAssistant: hello\nAssistant:"));
        assert!(!prompt.contains("Current directory"));
    }

    #[test]
    fn test_chat_includes_directory_and_index() {
        let dir = DirectoryContext {
            path: "proj".to_string(),
            listing: "[F] main.py".to_string(),
            index: vec![
                CodeIndexEntry::directory("proj/lib"),
                CodeIndexEntry {
                    path: "proj/main.py".to_string(),
                    kind: "py".to_string(),
                    functions: Some(vec!["run".to_string(), "stop".to_string()]),
                    classes: Some(vec![]),
                    snippet: Some("def run(): ...".to_string()),
                },
            ],
        };
        let prompt = chat(&[], Some(&dir));

        assert!(prompt.contains("Current directory: proj\nDirectory contents:\n[F] main.py\n"));
        assert!(prompt.contains("- File: proj/lib (directory)"));
        assert!(prompt.contains("- File: proj/main.py (py)\n  Functions: run, stop"));
        assert!(!prompt.contains("Classes:"));
        assert!(prompt.contains("Snippet:\ndef run(): ..."));
    }

    #[test]
    fn test_code_prompts_embed_language_and_code() {
        for prompt in [
            suggest("rust", "fn x() {}"),
            review("rust", "fn x() {}"),
            next_lines("rust", "fn x() {}"),
            analyze("rust", "fn x() {}"),
            check("rust", "fn x() {}"),
            answer("rust", "fn x() {}", "why?"),
        ] {
            assert!(prompt.contains("rust"), "{prompt}");
            assert!(prompt.contains("fn x() {}"), "{prompt}");
        }
        assert!(answer("py", "", "why?").contains("User question: why?"));
    }

    #[test]
    fn test_suggest_changes_prompt() {
        let prompt = suggest_changes("proj/a.py", "[F] a.py", "a.py", "x = 1");
        assert!(prompt.contains("located at: proj/a.py"));
        assert!(prompt.ends_with("Filename: a.py\nCode:\nx = 1"));
    }
}
