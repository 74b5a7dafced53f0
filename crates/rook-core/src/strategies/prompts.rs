// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Summary prompts shared by the compaction strategies.
//!
//! These prompts are behaviour, not decoration: they decide what survives
//! compaction.  Both demand a first-person episodic-memory voice so the
//! summaries read as the agent's own recollection on later turns, and both
//! hard-require the concrete artifacts (paths, function names, error
//! strings, test names) that the agent will need verbatim.

/// System prompt for content summaries (tool-call batches and
/// half-compaction).
pub const CONTENT_SUMMARY_PROMPT: &str = "\
You are writing your own episodic memory. Compress the conversation \
history below into a first-person record of what you did and learned.

Hard requirements:
- Write in the first person (\"I read\", \"I changed\", \"the user asked me\").
- Preserve verbatim: every file path, function name, error message, test \
name, command, and statement of user intent that appears in the history.
- No hedging language (\"it seems\", \"possibly\", \"might have\").
- No XML or markup of any kind.
- Never narrate in the third person.

Use EXACTLY the following Markdown sections, in this order:

## Milestones
What was completed, in order.

## Key Decisions
Every technical decision and the constraint that forced it.

## Findings
Facts discovered about the codebase, environment, or problem.

## Dead Ends
Approaches tried and abandoned, with the reason, so I never retry them.

## Current State
Where the work stands right now.

## Open Items
What remains to be done.";

/// System prompt for second-layer goal batches: several complete user turns
/// collapsed into one arc.
pub const GOAL_BATCH_PROMPT: &str = "\
You are consolidating several completed work episodes into one long-term \
memory. Each episode below is a user goal followed by your own summarised \
record of achieving it. Write a single first-person account of the whole arc.

Hard requirements:
- Write in the first person.
- Preserve verbatim: file paths, function names, error strings, test names, \
and every explicit instruction the user gave.
- No hedging language, no XML or markup, no third-person narration.

Use EXACTLY the following Markdown sections, in this order:

## Goal Arc
The sequence of goals and how each led to the next.

## Human Direction
Every instruction, preference, and correction the user expressed.

## What Was Achieved
The concrete outcomes, per goal.

## Dead Ends
Abandoned approaches and why, so I never retry them.

## Lasting Constraints
Rules and requirements that still bind future work.

## Key Artifacts
Files, functions, commands, and tests that future work will touch again.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_prompt_demands_required_sections() {
        for section in [
            "## Milestones",
            "## Key Decisions",
            "## Findings",
            "## Dead Ends",
            "## Current State",
            "## Open Items",
        ] {
            assert!(CONTENT_SUMMARY_PROMPT.contains(section), "missing {section}");
        }
    }

    #[test]
    fn goal_batch_prompt_demands_required_sections() {
        for section in [
            "## Goal Arc",
            "## Human Direction",
            "## What Was Achieved",
            "## Dead Ends",
            "## Lasting Constraints",
            "## Key Artifacts",
        ] {
            assert!(GOAL_BATCH_PROMPT.contains(section), "missing {section}");
        }
    }

    #[test]
    fn prompts_forbid_hedging_and_markup() {
        for p in [CONTENT_SUMMARY_PROMPT, GOAL_BATCH_PROMPT] {
            assert!(p.contains("first person") || p.contains("first-person"));
            assert!(p.contains("No hedging") || p.contains("no hedging"));
            assert!(p.contains("XML"));
        }
    }
}
