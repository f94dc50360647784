//! Stage prompt assembly.

use crate::domain::models::{AgentRole, Task};

/// Verbatim role guidance embedded in every stage prompt.
pub fn role_instructions(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Coder => {
            "Implement the task requirements. Follow the specification and plan exactly. \
             When complete, output: IMPLEMENTATION COMPLETE. If you encounter blockers, \
             output: BLOCKED: <reason>."
        }
        AgentRole::Reviewer => {
            "Review the code changes for this task. Output REVIEW PASSED or REVIEW FAILED: <issues>."
        }
        AgentRole::Tester => {
            "Write and run tests. Output TESTS PASSED or TESTS FAILED: <details>."
        }
        AgentRole::Qa => {
            "Perform final QA validation. Output QA PASSED or QA FAILED: <issues>."
        }
    }
}

/// Machine-readable directive teaching the agent how to spawn follow-up
/// tasks without duplicating existing ones.
fn followup_directive(task: &Task) -> String {
    format!(
        "FOLLOW-UP TASKS:\n\
         If you discover work that should become its own task, create it with:\n\
         `specforge task-followup <id> {spec} \"<title>\" --parent {parent}`\n\
         Prefix the id to categorize it: PLACEHOLDER-, TECH-DEBT-, REFACTOR-, \
         TEST-GAP-, EDGE-CASE-, or DOC-.\n\
         First run `specforge list-tasks --spec {spec} --json` and skip anything \
         already covered by an existing task.",
        spec = task.spec_id,
        parent = task.id,
    )
}

/// Inputs for one stage prompt.
pub struct PromptContext<'a> {
    pub task: &'a Task,
    pub stage_name: &'a str,
    pub role: AgentRole,
    pub iteration: u32,
    pub workspace: &'a str,
    /// Contents of specs/<spec_id>/spec.md, when present
    pub spec_document: Option<&'a str>,
    /// Contents of specs/<spec_id>/plan.md, when present
    pub plan_document: Option<&'a str>,
}

/// Assemble the full prompt for one iteration of one stage.
pub fn build_stage_prompt(ctx: &PromptContext<'_>) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(format!(
        "STAGE: {} (agent role: {})\nITERATION: {}",
        ctx.stage_name,
        ctx.role.as_str(),
        ctx.iteration,
    ));

    sections.push(format!(
        "TASK: {id}\nTITLE: {title}\nPRIORITY: {priority}\nWORKSPACE: {workspace}\n\n\
         DESCRIPTION:\n{description}",
        id = ctx.task.id,
        title = ctx.task.title,
        priority = ctx.task.priority.as_i64(),
        workspace = ctx.workspace,
        description = if ctx.task.description.is_empty() {
            "(none)"
        } else {
            &ctx.task.description
        },
    ));

    if let Some(ref completion) = ctx.task.completion_spec {
        let mut block = format!("EXPECTED OUTCOME:\n{}", completion.outcome);
        if !completion.acceptance_criteria.is_empty() {
            block.push_str("\n\nACCEPTANCE CRITERIA:");
            for (i, criterion) in completion.acceptance_criteria.iter().enumerate() {
                block.push_str(&format!("\n{}. {criterion}", i + 1));
            }
        }
        sections.push(block);
    }

    if let Some(spec) = ctx.spec_document {
        sections.push(format!("SPECIFICATION:\n{spec}"));
    }
    if let Some(plan) = ctx.plan_document {
        sections.push(format!("PLAN:\n{plan}"));
    }

    sections.push(format!("INSTRUCTIONS:\n{}", role_instructions(ctx.role)));
    sections.push(followup_directive(ctx.task));

    sections.join("\n\n---\n\n")
}
