use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One role in the crew. Built once per orchestration session and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDefinition {
    role: String,
    goal: String,
    persona: String,
    can_delegate: bool,
    tool_names: BTreeSet<String>,
}

impl AgentDefinition {
    pub fn coordinator(
        role: impl Into<String>,
        goal: impl Into<String>,
        persona: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            goal: goal.into(),
            persona: persona.into(),
            can_delegate: true,
            tool_names: BTreeSet::new(),
        }
    }

    pub fn specialist<I, S>(
        role: impl Into<String>,
        goal: impl Into<String>,
        persona: impl Into<String>,
        tool_names: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            role: role.into(),
            goal: goal.into(),
            persona: persona.into(),
            can_delegate: false,
            tool_names: tool_names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn persona(&self) -> &str {
        &self.persona
    }

    pub fn can_delegate(&self) -> bool {
        self.can_delegate
    }

    pub fn tool_names(&self) -> &BTreeSet<String> {
        &self.tool_names
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tool_names.contains(name)
    }

    /// System prompt an engine hands to the model when acting as this role.
    pub fn system_prompt(&self) -> String {
        format!(
            "You are the {role}.\nGoal: {goal}\n\n{persona}",
            role = self.role,
            goal = self.goal,
            persona = self.persona.trim()
        )
    }
}
