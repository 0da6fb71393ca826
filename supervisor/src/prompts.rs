//! Prompt template rendering: substitutes `{project_root, run_id, config,
//! iteration, has_review}` into the four agent prompt templates (or the
//! two-phase verifier pair), per SPEC_FULL §4.17. Prompt body content
//! itself is out of scope — only the substitution contract is implemented.
//!
//! Grounded in the `andrey-moor-plan-forge` pack repo's use of `minijinja`
//! for its equivalent agent-prompt rendering step; the teacher has no
//! template engine of its own.

use std::path::Path;

use minijinja::{context, Environment};
use thiserror::Error;

use crate::run::AgentName;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("failed to render template for {agent}: {source}")]
    Render {
        agent: AgentName,
        #[source]
        source: minijinja::Error,
    },

    #[error("io error writing prompt for {agent}: {source}")]
    Io {
        agent: AgentName,
        #[source]
        source: std::io::Error,
    },
}

/// Values substituted into every agent prompt template (SPEC_FULL §4.14
/// step 4).
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub project_root: String,
    pub run_id: String,
    pub config: serde_json::Value,
    pub iteration: u32,
    pub has_review: bool,
    /// Present only on a restart triggered by a Human Resolution
    /// (SPEC_FULL §4.3's `restartAgentWithClarification`).
    pub clarification: Option<String>,
}

/// Renders one agent's prompt template and writes the rendered body to
/// `prompts/<agent>.md` in the run directory via an atomic write, matching
/// every other run-directory writer's discipline.
pub fn render_prompt(
    env: &Environment<'_>,
    template_name: &str,
    ctx: &PromptContext,
    agent: AgentName,
    out_path: &Path,
) -> Result<(), PromptError> {
    let template = env
        .get_template(template_name)
        .map_err(|source| PromptError::Render { agent, source })?;
    let rendered = template
        .render(context! {
            project_root => ctx.project_root,
            run_id => ctx.run_id,
            config => ctx.config,
            iteration => ctx.iteration,
            has_review => ctx.has_review,
            clarification => ctx.clarification,
        })
        .map_err(|source| PromptError::Render { agent, source })?;

    crate::run::dir::atomic_write(out_path, rendered.as_bytes())
        .map_err(|source| PromptError::Io { agent, source })
}

/// Template name for an agent, honouring two-phase verifier mode (SPEC_FULL
/// §4.14 step 4: `verifier-phase1.md`/`verifier-phase2.md` instead of
/// `verifier.md` when enabled).
pub fn template_name_for(agent: AgentName, two_phase_verifier: bool, phase: VerifierPhase) -> String {
    if agent == AgentName::Verifier && two_phase_verifier {
        match phase {
            VerifierPhase::One => "verifier-phase1.md".to_string(),
            VerifierPhase::Two => "verifier-phase2.md".to_string(),
        }
    } else {
        format!("{agent}.md")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierPhase {
    One,
    Two,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_name_is_plain_for_non_verifier() {
        assert_eq!(
            template_name_for(AgentName::Builder, true, VerifierPhase::One),
            "builder.md"
        );
    }

    #[test]
    fn template_name_splits_verifier_in_two_phase_mode() {
        assert_eq!(
            template_name_for(AgentName::Verifier, true, VerifierPhase::One),
            "verifier-phase1.md"
        );
        assert_eq!(
            template_name_for(AgentName::Verifier, true, VerifierPhase::Two),
            "verifier-phase2.md"
        );
    }

    #[test]
    fn template_name_is_plain_verifier_when_two_phase_disabled() {
        assert_eq!(
            template_name_for(AgentName::Verifier, false, VerifierPhase::One),
            "verifier.md"
        );
    }

    #[test]
    fn render_prompt_substitutes_context_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let mut env = Environment::new();
        env.add_template("builder.md", "Run {{ run_id }} iteration {{ iteration }} in {{ project_root }}")
            .unwrap();

        let ctx = PromptContext {
            project_root: "/proj".into(),
            run_id: "run-20260727000000".into(),
            config: serde_json::json!({}),
            iteration: 2,
            has_review: false,
            clarification: None,
        };

        let out_path = tmp.path().join("builder.md");
        render_prompt(&env, "builder.md", &ctx, AgentName::Builder, &out_path).unwrap();
        let rendered = std::fs::read_to_string(&out_path).unwrap();
        assert_eq!(rendered, "Run run-20260727000000 iteration 2 in /proj");
    }
}
