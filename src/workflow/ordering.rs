//! Step Ordering
//!
//! Structural checks on a step list:
//! - Declared order: unique names, every dependency present and earlier
//! - Dependency order: Kahn's algorithm, stable by `order` then position

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use log::debug;

use crate::error::EngineError;
use crate::step::StepConfig;

/// Structural problems found in a step list.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderingError {
    EmptyStepName(usize),
    DuplicateStep(String),
    UnknownDependency { step: String, dependency: String },
    DependencyAfterStep { step: String, dependency: String },
    CyclicDependency(Vec<String>),
}

impl fmt::Display for OrderingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyStepName(index) => write!(f, "Step at position {} has an empty name", index),
            Self::DuplicateStep(name) => write!(f, "Duplicate step name: '{}'", name),
            Self::UnknownDependency { step, dependency } => {
                write!(f, "Step '{}' depends on unknown step '{}'", step, dependency)
            }
            Self::DependencyAfterStep { step, dependency } => write!(
                f,
                "Step '{}' depends on '{}', which is declared after it",
                step, dependency
            ),
            Self::CyclicDependency(steps) => write!(
                f,
                "Steps depend on each other in a loop: {}",
                steps.join(", ")
            ),
        }
    }
}

impl From<OrderingError> for EngineError {
    fn from(e: OrderingError) -> Self {
        EngineError::Configuration(e.to_string())
    }
}

fn check_names(configs: &[&StepConfig]) -> Result<HashMap<String, usize>, OrderingError> {
    let mut positions = HashMap::with_capacity(configs.len());
    for (index, config) in configs.iter().enumerate() {
        if config.name.trim().is_empty() {
            return Err(OrderingError::EmptyStepName(index));
        }
        if positions.insert(config.name.clone(), index).is_some() {
            return Err(OrderingError::DuplicateStep(config.name.clone()));
        }
    }
    Ok(positions)
}

/// Verifies that the list can run as declared.
pub fn check_declared_order(configs: &[&StepConfig]) -> Result<(), OrderingError> {
    let positions = check_names(configs)?;

    for (index, config) in configs.iter().enumerate() {
        for dependency in &config.dependencies {
            match positions.get(dependency) {
                None => {
                    return Err(OrderingError::UnknownDependency {
                        step: config.name.clone(),
                        dependency: dependency.clone(),
                    })
                }
                Some(&position) if position >= index => {
                    return Err(OrderingError::DependencyAfterStep {
                        step: config.name.clone(),
                        dependency: dependency.clone(),
                    })
                }
                Some(_) => {}
            }
        }
    }

    Ok(())
}

/// Returns positions of `configs` sorted so dependencies come first.
///
/// Among steps that are ready at the same time, lower `order` runs first,
/// then earlier declaration.
pub fn dependency_order(configs: &[&StepConfig]) -> Result<Vec<usize>, OrderingError> {
    let positions = check_names(configs)?;

    let mut in_degree = vec![0usize; configs.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); configs.len()];

    for (index, config) in configs.iter().enumerate() {
        // Repeated dependencies count once
        let unique: HashSet<&String> = config.dependencies.iter().collect();
        for dependency in unique {
            let &position = positions.get(dependency).ok_or_else(|| {
                OrderingError::UnknownDependency {
                    step: config.name.clone(),
                    dependency: dependency.clone(),
                }
            })?;
            in_degree[index] += 1;
            successors[position].push(index);
        }
    }

    // Ready set keyed by (order, position) keeps the result deterministic
    let mut ready: BTreeSet<(i64, usize)> = configs
        .iter()
        .enumerate()
        .filter(|(index, _)| in_degree[*index] == 0)
        .map(|(index, config)| (config.order, index))
        .collect();

    let mut sorted = Vec::with_capacity(configs.len());
    while let Some(next) = ready.pop_first() {
        let (_, index) = next;
        sorted.push(index);

        for &successor in &successors[index] {
            in_degree[successor] -= 1;
            if in_degree[successor] == 0 {
                ready.insert((configs[successor].order, successor));
            }
        }
    }

    if sorted.len() != configs.len() {
        let stuck: Vec<String> = configs
            .iter()
            .enumerate()
            .filter(|(index, _)| in_degree[*index] > 0)
            .map(|(_, config)| config.name.clone())
            .collect();
        return Err(OrderingError::CyclicDependency(stuck));
    }

    debug!(
        "Dependency order: {:?}",
        sorted.iter().map(|&i| configs[i].name.as_str()).collect::<Vec<_>>()
    );
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str, order: i64, deps: &[&str]) -> StepConfig {
        let mut config = StepConfig::new(name, "test step", "custom").with_order(order);
        config.dependencies = deps.iter().map(|d| d.to_string()).collect();
        config
    }

    fn names(configs: &[StepConfig], order: &[usize]) -> Vec<String> {
        order.iter().map(|&i| configs[i].name.clone()).collect()
    }

    #[test]
    fn test_declared_order_valid() {
        let configs = [step("a", 0, &[]), step("b", 0, &["a"]), step("c", 0, &["a", "b"])];
        let refs: Vec<&StepConfig> = configs.iter().collect();
        assert!(check_declared_order(&refs).is_ok());
    }

    #[test]
    fn test_declared_order_duplicate() {
        let configs = [step("a", 0, &[]), step("a", 0, &[])];
        let refs: Vec<&StepConfig> = configs.iter().collect();
        assert_eq!(
            check_declared_order(&refs),
            Err(OrderingError::DuplicateStep("a".into()))
        );
    }

    #[test]
    fn test_declared_order_forward_and_unknown_reference() {
        let configs = [step("a", 0, &["b"]), step("b", 0, &[])];
        let refs: Vec<&StepConfig> = configs.iter().collect();
        assert!(matches!(
            check_declared_order(&refs),
            Err(OrderingError::DependencyAfterStep { .. })
        ));

        let configs = [step("a", 0, &["ghost"])];
        let refs: Vec<&StepConfig> = configs.iter().collect();
        assert!(matches!(
            check_declared_order(&refs),
            Err(OrderingError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_dependency_order_linear() {
        let configs = [step("deploy", 0, &["test"]), step("test", 0, &["build"]), step("build", 0, &[])];
        let refs: Vec<&StepConfig> = configs.iter().collect();
        let order = dependency_order(&refs).unwrap();
        assert_eq!(names(&configs, &order), vec!["build", "test", "deploy"]);
    }

    #[test]
    fn test_dependency_order_stable_by_order_then_position() {
        let configs = [
            step("docs", 5, &[]),
            step("lint", 1, &[]),
            step("fmt", 1, &[]),
            step("review", 0, &["lint", "docs"]),
        ];
        let refs: Vec<&StepConfig> = configs.iter().collect();
        let order = dependency_order(&refs).unwrap();
        assert_eq!(names(&configs, &order), vec!["lint", "fmt", "docs", "review"]);
    }

    #[test]
    fn test_dependency_order_cycle() {
        let configs = [step("a", 0, &["c"]), step("b", 0, &["a"]), step("c", 0, &["b"]), step("d", 0, &[])];
        let refs: Vec<&StepConfig> = configs.iter().collect();
        match dependency_order(&refs) {
            Err(OrderingError::CyclicDependency(stuck)) => assert_eq!(stuck, vec!["a", "b", "c"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_error_converts_to_configuration() {
        let err: EngineError = OrderingError::DuplicateStep("x".into()).into();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
        assert!(err.to_string().contains("Duplicate step name: 'x'"));
    }
}
