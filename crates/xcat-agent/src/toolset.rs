//! Fixed capability set every transport binding must provide
//!
//! The orchestrator only sees `Toolset`; transport versions and response
//! wrapping differences stay inside the binding and the normalizer.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use xcat_core::{tool_names, Result, ToolInfo, XcatError};

/// A connected set of remote tools
#[async_trait]
pub trait Toolset: Send + Sync {
    /// List the tools the remote side exposes
    async fn list_tools(&self) -> Result<Vec<ToolInfo>>;

    /// Invoke a tool by name with named arguments
    ///
    /// Returns the raw, possibly wrapped, tool result. Callers pass it
    /// through [`crate::normalize_output`].
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value>;

    /// Release the underlying connection
    async fn close(&self) -> Result<()>;
}

/// Names of the tools that survived the client's tool filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCatalog {
    names: BTreeSet<String>,
}

impl ToolCatalog {
    /// Keep only tools in [`tool_names::TOOL_FILTER`]
    pub fn from_tools(tools: &[ToolInfo]) -> Self {
        let names = tools
            .iter()
            .map(|t| t.name.as_str())
            .filter(|name| tool_names::TOOL_FILTER.contains(name))
            .map(str::to_string)
            .collect();
        Self { names }
    }

    /// Sorted tool names
    pub fn names(&self) -> Vec<String> {
        self.names.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Fail unless `name` was listed
    pub fn require(&self, name: &str) -> Result<()> {
        if self.names.contains(name) {
            Ok(())
        } else {
            Err(XcatError::MissingTool {
                name: name.to_string(),
                available: self.names(),
            })
        }
    }

    /// Fail unless every tool the handshake calls was listed
    pub fn require_handshake_tools(&self) -> Result<()> {
        if self.is_empty() {
            return Err(XcatError::NoTools);
        }
        for name in tool_names::HANDSHAKE_TOOLS {
            self.require(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> ToolInfo {
        ToolInfo {
            name: name.to_string(),
            description: None,
        }
    }

    #[test]
    fn test_catalog_filters_and_sorts() {
        let catalog = ToolCatalog::from_tools(&[
            tool("x402_topup"),
            tool("delete_everything"),
            tool("create_crawl_task"),
        ]);
        assert_eq!(catalog.names(), vec!["create_crawl_task", "x402_topup"]);
    }

    #[test]
    fn test_require_handshake_tools() {
        let catalog = ToolCatalog::from_tools(&[
            tool("create_crawl_task"),
            tool("x402_topup"),
            tool("get_task_status"),
            tool("get_result_download_url"),
        ]);
        assert!(catalog.require_handshake_tools().is_ok());
    }

    #[test]
    fn test_empty_catalog() {
        let catalog = ToolCatalog::from_tools(&[]);
        assert!(matches!(
            catalog.require_handshake_tools(),
            Err(XcatError::NoTools)
        ));
    }

    #[test]
    fn test_missing_tool() {
        let catalog = ToolCatalog::from_tools(&[tool("create_crawl_task")]);
        match catalog.require_handshake_tools() {
            Err(XcatError::MissingTool { name, available }) => {
                assert_eq!(name, "x402_topup");
                assert_eq!(available, vec!["create_crawl_task"]);
            }
            other => panic!("expected MissingTool, got {:?}", other),
        }
    }
}
