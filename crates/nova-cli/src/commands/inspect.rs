//! Offline project inspection: validation and deploy order.

use anyhow::{Context, Result};
use nova_core::ComponentRef;
use nova_core::graph::resolve;

use super::Settings;
use crate::output::{self, ComponentPlan, ProjectCheck};

pub fn validate(settings: &Settings, project: &str) -> Result<()> {
    let check = check_project(settings, project)?;
    println!("{}", output::render_check(&check, settings.output_format())?);
    Ok(())
}

pub fn order(settings: &Settings, target: &str) -> Result<()> {
    let plan = plan_component(settings, target)?;
    println!("{}", output::render_plan(&plan, settings.output_format())?);
    Ok(())
}

/// Parse the project and resolve the dependency graph of every component.
pub fn check_project(settings: &Settings, name: &str) -> Result<ProjectCheck> {
    let spec = settings.load_project(name)?;
    let names: Vec<String> = spec.components.iter().map(|c| c.name.clone()).collect();
    let project = spec.into_project();

    let components = names
        .into_iter()
        .map(|component| {
            let order = resolve(&project, &component)
                .with_context(|| format!("Component '{component}' has an invalid dependency graph"))?;
            Ok(ComponentPlan { component, order })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ProjectCheck {
        project: name.to_string(),
        components,
    })
}

pub fn plan_component(settings: &Settings, target: &str) -> Result<ComponentPlan> {
    let target = ComponentRef::parse(target)?;
    let project = settings.load_project(&target.project)?.into_project();
    let order = resolve(&project, &target.component)
        .with_context(|| format!("Failed to resolve dependencies of {target}"))?;
    Ok(ComponentPlan {
        component: target.to_string(),
        order,
    })
}
