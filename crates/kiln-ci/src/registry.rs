//! Named pipelines and their resolution into executable plans.
//!
//! A pipeline is an ordered list of [`Step`]s. Steps may reference other
//! pipelines by name; [`PipelineRegistry::resolve`] flattens those references
//! into a [`Plan`] and rejects unknown names and cycles up front, so a bad
//! definition fails at startup instead of halfway through a run.

use std::collections::BTreeMap;
use thiserror::Error;

use kiln_core::{GateDecision, RuntimeGate};

use crate::stage::Task;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error("pipeline {0} is already registered")]
    Duplicate(String),

    #[error("pipeline cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("pipeline {0} nests an instrumented scope inside another")]
    NestedInstrumentation(String),
}

/// One entry of a pipeline definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Task(GateDecision<Task>),
    /// Every step of another pipeline, in order.
    Pipeline(String),
    /// Steps that run against the instrumented artifact and record coverage.
    Instrumented(Vec<Step>),
}

impl Step {
    pub fn run(task: Task) -> Self {
        Step::Task(GateDecision::Run(task))
    }

    pub fn pipeline(name: impl Into<String>) -> Self {
        Step::Pipeline(name.into())
    }
}

/// A resolved step: no pipeline references remain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanNode {
    Task(GateDecision<Task>),
    Instrumented(Vec<PlanNode>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub pipeline: String,
    pub nodes: Vec<PlanNode>,
}

impl Plan {
    /// Number of task nodes, skipped ones included.
    pub fn task_count(&self) -> usize {
        fn count(nodes: &[PlanNode]) -> usize {
            nodes
                .iter()
                .map(|n| match n {
                    PlanNode::Task(_) => 1,
                    PlanNode::Instrumented(inner) => count(inner),
                })
                .sum()
        }
        count(&self.nodes)
    }

    /// Tasks in execution order.
    pub fn tasks(&self) -> Vec<GateDecision<Task>> {
        fn walk(nodes: &[PlanNode], out: &mut Vec<GateDecision<Task>>) {
            for node in nodes {
                match node {
                    PlanNode::Task(decision) => out.push(*decision),
                    PlanNode::Instrumented(inner) => walk(inner, out),
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.nodes, &mut out);
        out
    }

    /// Indented, one line per node.
    pub fn describe(&self) -> Vec<String> {
        fn walk(nodes: &[PlanNode], depth: usize, out: &mut Vec<String>) {
            let indent = "  ".repeat(depth);
            for node in nodes {
                match node {
                    PlanNode::Task(GateDecision::Run(task)) => {
                        out.push(format!("{indent}{task}"));
                    }
                    PlanNode::Task(GateDecision::SkipWithLog(task)) => {
                        out.push(format!("{indent}{task} (skipped on this runtime)"));
                    }
                    PlanNode::Instrumented(inner) => {
                        out.push(format!("{indent}[instrumented]"));
                        walk(inner, depth + 1, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.nodes, 1, &mut out);
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineRegistry {
    pipelines: BTreeMap<String, Vec<Step>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard pipelines. Gated tasks are decided here, once.
    pub fn standard(gate: &RuntimeGate) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register(
            "build",
            vec![
                Step::run(Task::Bundle),
                Step::run(Task::CopyJs),
                Step::run(Task::CopyCss),
            ],
        )?;
        registry.register(
            "test",
            vec![
                Step::Task(gate.gate(Task::Lint)),
                Step::run(Task::Markup),
                Step::run(Task::TestNode),
                Step::run(Task::TestBrowser),
            ],
        )?;
        registry.register(
            "coverage",
            vec![
                Step::pipeline("build"),
                Step::run(Task::Instrument),
                Step::Instrumented(vec![Step::pipeline("test")]),
                Step::run(Task::MakeReport),
                Step::run(Task::Upload),
            ],
        )?;
        registry.register("default", vec![Step::pipeline("build"), Step::pipeline("test")])?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn register(&mut self, name: impl Into<String>, steps: Vec<Step>) -> Result<(), RegistryError> {
        let name = name.into();
        if self.pipelines.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.pipelines.insert(name, steps);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pipelines.contains_key(name)
    }

    /// Resolve every registered pipeline.
    pub fn validate(&self) -> Result<(), RegistryError> {
        for name in self.pipelines.keys() {
            self.resolve(name)?;
        }
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Plan, RegistryError> {
        let mut stack = Vec::new();
        let nodes = self.expand(name, &mut stack, false)?;
        Ok(Plan {
            pipeline: name.to_string(),
            nodes,
        })
    }

    fn expand(
        &self,
        name: &str,
        stack: &mut Vec<String>,
        instrumented: bool,
    ) -> Result<Vec<PlanNode>, RegistryError> {
        let steps = self
            .pipelines
            .get(name)
            .ok_or_else(|| RegistryError::UnknownPipeline(name.to_string()))?;

        if stack.iter().any(|n| n == name) {
            let mut cycle = stack.clone();
            cycle.push(name.to_string());
            return Err(RegistryError::Cycle(cycle));
        }
        stack.push(name.to_string());
        let nodes = self.expand_steps(name, steps, stack, instrumented)?;
        stack.pop();
        Ok(nodes)
    }

    fn expand_steps(
        &self,
        owner: &str,
        steps: &[Step],
        stack: &mut Vec<String>,
        instrumented: bool,
    ) -> Result<Vec<PlanNode>, RegistryError> {
        let mut nodes = Vec::with_capacity(steps.len());
        for step in steps {
            match step {
                Step::Task(decision) => nodes.push(PlanNode::Task(*decision)),
                Step::Pipeline(inner) => {
                    nodes.extend(self.expand(inner, stack, instrumented)?);
                }
                Step::Instrumented(inner) => {
                    if instrumented {
                        return Err(RegistryError::NestedInstrumentation(owner.to_string()));
                    }
                    let body = self.expand_steps(owner, inner, stack, true)?;
                    nodes.push(PlanNode::Instrumented(body));
                }
            }
        }
        Ok(nodes)
    }
}
