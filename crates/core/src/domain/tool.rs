use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A prerequisite tool: how to detect it and, optionally, how to install it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ToolSpec {
    pub name: String,
    /// Detection command; the tool counts as installed when it exits 0
    pub check: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<String>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, check: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            check: check.into(),
            install: None,
        }
    }

    pub fn with_install(mut self, install: impl Into<String>) -> Self {
        self.install = Some(install.into());
        self
    }

    /// Label attached to this tool's install execution.
    pub fn install_label(&self) -> String {
        format!("install-{}", self.name)
    }
}

pub fn default_tools() -> Vec<ToolSpec> {
    let node = ToolSpec::new("Node.js", "node --version");
    let npm = ToolSpec::new("NPM", "npm --version").with_install("npm install -g npm");
    let docker = ToolSpec::new("Docker", "docker --version");

    if cfg!(windows) {
        vec![
            node.with_install(
                "winget install OpenJS.NodeJS --accept-package-agreements --accept-source-agreements",
            ),
            npm,
            docker.with_install(
                "winget install Docker.DockerDesktop --accept-package-agreements --accept-source-agreements",
            ),
        ]
    } else {
        vec![node, npm, docker]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Installed,
    Missing,
}

/// Result of one detection run. Never cached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ToolCheck {
    pub name: String,
    pub status: ToolStatus,
    pub version: Option<String>,
}

impl ToolCheck {
    pub fn installed(name: impl Into<String>, version: impl Into<String>) -> Self {
        let version = version.into();
        Self {
            name: name.into(),
            status: ToolStatus::Installed,
            version: (!version.is_empty()).then_some(version),
        }
    }

    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ToolStatus::Missing,
            version: None,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.status == ToolStatus::Installed
    }
}
