//! Rendering of command results as text or JSON.

use anyhow::Result;
use nova_config::OutputFormat;
use nova_pipeline::{DeploymentOutcome, DeploymentReport, DeploymentSummary};
use serde::Serialize;
use serde_json::json;

/// Deploy order of one component, dependencies first.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentPlan {
    pub component: String,
    pub order: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectCheck {
    pub project: String,
    pub components: Vec<ComponentPlan>,
}

pub fn render_report(report: &DeploymentReport, format: OutputFormat) -> Result<String> {
    if let Some(summary) = &report.summary {
        return render_summary(summary, format);
    }

    let ctx = &report.context;
    let (outcome, message) = match report.outcome {
        DeploymentOutcome::NothingToDeploy => (
            "nothing-to-deploy",
            format!("\nNothing to deploy for {}: the template is empty.", ctx.component),
        ),
        DeploymentOutcome::DryRun | DeploymentOutcome::Deployed => (
            "dry-run",
            format!(
                "\nTemplate for stack '{}' is valid. No changes were made.",
                ctx.stack_name
            ),
        ),
    };

    Ok(match format {
        OutputFormat::Text => message,
        OutputFormat::Json => serde_json::to_string_pretty(&json!({
            "outcome": outcome,
            "project": ctx.component.project,
            "component": ctx.component.component,
            "stack_name": ctx.stack_name,
        }))?,
    })
}

/// Text: a blank line, `Output:`, a blank line, then one tab-indented
/// `key: value` line per field. JSON: one flat object.
pub fn render_summary(summary: &DeploymentSummary, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Text => {
            let mut text = String::from("\nOutput:\n");
            for (key, value) in summary.fields() {
                text.push_str(&format!("\n\t{key}: {value}"));
            }
            text
        }
        OutputFormat::Json => serde_json::to_string_pretty(summary)?,
    })
}

pub fn render_check(check: &ProjectCheck, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Text => {
            let mut text = format!(
                "Project '{}' is valid ({} components)",
                check.project,
                check.components.len()
            );
            for plan in &check.components {
                text.push_str(&format!("\n\t{}: {}", plan.component, plan.order.join(" -> ")));
            }
            text
        }
        OutputFormat::Json => serde_json::to_string_pretty(check)?,
    })
}

pub fn render_plan(plan: &ComponentPlan, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Text => plan.order.join("\n"),
        OutputFormat::Json => serde_json::to_string_pretty(plan)?,
    })
}
