// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use rook_tools::ToolSchemaEntry;

const BASE_PROMPT: &str = "\
You are an autonomous software engineering agent operating inside a user's \
workspace. You work in turns: on each turn you either call exactly one tool \
or finish with a loop-breaking tool.

## Tool protocol

To call a tool, emit exactly one block in this form, and nothing after it:

<tool>
<server>local</server>
<name>TOOL_NAME</name>
<arguments>
<param>value</param>
</arguments>
</tool>

Rules:
- One tool call per message. Text before the block is shown to the user.
- Argument values are plain text; do not wrap them in quotes or JSON.
- You may reason inside <thinking>...</thinking> tags; thinking is never \
shown as your answer and is never a tool call.
- When the task is done, call task_completion with a summary. To ask the \
user something, call ask_question. For conversation with no work to do, \
call converse. Every turn must end with one of these three.
";

/// Ambient facts injected into the system prompt.
#[derive(Debug, Default, Clone)]
pub struct PromptContext<'a> {
    pub workspace_dir: Option<&'a str>,
    /// Project facts gathered by the driver (branch, layout, conventions)
    pub repository_context: Option<&'a str>,
    /// User-supplied additions appended after the built-in sections
    pub custom_instructions: Option<&'a str>,
}

/// Build the system prompt for one iteration.
///
/// Rebuilt fresh before every model call so tool registration and
/// context changes take effect mid-session.  A non-empty `override_prompt`
/// replaces everything except the tool list.
pub fn system_prompt(
    override_prompt: Option<&str>,
    ctx: &PromptContext<'_>,
    tools: &[ToolSchemaEntry],
) -> String {
    let mut prompt = String::new();
    match override_prompt {
        Some(text) => prompt.push_str(text),
        None => {
            prompt.push_str(BASE_PROMPT);
            if let Some(dir) = ctx.workspace_dir {
                prompt.push_str(&format!("\n## Workspace\n\nWorking directory: {dir}\n"));
            }
            if let Some(repo) = ctx.repository_context {
                prompt.push_str(&format!("\n## Repository context\n\n{repo}\n"));
            }
            if let Some(extra) = ctx.custom_instructions {
                prompt.push_str(&format!("\n## Additional instructions\n\n{extra}\n"));
            }
        }
    }

    prompt.push_str("\n## Available tools\n");
    for tool in tools {
        prompt.push_str(&format!(
            "\n### {}\n{}\nArguments schema: {}\n",
            tool.name, tool.description, tool.schema
        ));
    }
    prompt
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
