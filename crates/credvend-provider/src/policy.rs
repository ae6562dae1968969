//! Inline session policies
//!
//! IAM-style policy documents attached to STS `AssumeRole` calls so the
//! resulting token can reach nothing beyond the requested scope. AWS and
//! Aliyun share the document shape and differ in version and action names.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// A session policy document
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionPolicy {
    /// Policy language version (`2012-10-17` for AWS, `1` for Aliyun)
    pub version: String,
    #[serde(rename = "Statement")]
    pub statements: Vec<PolicyStatement>,
}

impl SessionPolicy {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            statements: Vec::new(),
        }
    }

    /// Add a statement to the policy
    pub fn add_statement(&mut self, statement: PolicyStatement) {
        self.statements.push(statement);
    }

    /// Serialize to compact JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A policy statement (session policies carry no principal)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub effect: &'static str,
    pub action: OneOrMany,
    pub resource: OneOrMany,
    /// operator -> condition key -> values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<BTreeMap<String, BTreeMap<String, OneOrMany>>>,
}

impl PolicyStatement {
    /// Start an Allow statement
    pub fn allow() -> PolicyStatementBuilder {
        PolicyStatementBuilder::default()
    }
}

/// Builder for policy statements
#[derive(Default)]
pub struct PolicyStatementBuilder {
    actions: Vec<String>,
    resources: Vec<String>,
    conditions: BTreeMap<String, BTreeMap<String, OneOrMany>>,
}

impl PolicyStatementBuilder {
    #[must_use]
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    #[must_use]
    pub fn actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions.extend(actions.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(resource.into());
        self
    }

    #[must_use]
    pub fn resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources.extend(resources.into_iter().map(Into::into));
        self
    }

    /// Add a condition, e.g. `("StringLike", "s3:prefix", [...])`
    #[must_use]
    pub fn condition<I, S>(mut self, operator: &str, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conditions
            .entry(operator.to_string())
            .or_default()
            .insert(
                key.to_string(),
                OneOrMany(values.into_iter().map(Into::into).collect()),
            );
        self
    }

    pub fn build(self) -> PolicyStatement {
        PolicyStatement {
            effect: "Allow",
            action: OneOrMany(self.actions),
            resource: OneOrMany(self.resources),
            condition: if self.conditions.is_empty() {
                None
            } else {
                Some(self.conditions)
            },
        }
    }
}

/// Serializes as a bare string when it holds exactly one value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneOrMany(pub Vec<String>);

impl Serialize for OneOrMany {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if self.0.len() == 1 {
            self.0[0].serialize(serializer)
        } else {
            self.0.serialize(serializer)
        }
    }
}
